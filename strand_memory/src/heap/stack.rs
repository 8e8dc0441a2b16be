use crate::fatal::FatalError;
use crate::fatal::crash;
use crate::object::HeapMetadata;
use crate::object::HeapObject;
use super::UnsafeHandle;

use core::ptr::NonNull;

/// Initialize the header of an object in storage the heap does not own,
/// such as a stack frame.
///
/// The object is counted like any other,
/// and its last release destroys it as usual,
/// but its weak count holds one extra unit for the owner of the storage,
/// so the heap never frees it.
/// The owner ends the lifetime of the object by giving up its strong
/// reference and checking
/// [`verify_end_of_lifetime`][`UnsafeHandle::verify_end_of_lifetime`]
/// before reusing the storage.
///
/// # Safety
///
/// The storage must be valid for writes of the object's instance size
/// and aligned to its instance alignment.
pub unsafe fn init_stack_object(
    metadata: &'static HeapMetadata,
    storage: NonNull<HeapObject>,
) -> UnsafeHandle
{
    storage.as_ptr().write(HeapObject::new_for_stack(NonNull::from(metadata)));
    UnsafeHandle::new(storage)
}

impl UnsafeHandle
{
    /// End the process if anything still refers to a stack object.
    ///
    /// Once destroyed, a stack object's weak count is down to the unit
    /// of the storage owner.
    ///
    /// # Safety
    ///
    /// The handle must point to an object initialized with
    /// [`init_stack_object`] whose storage is still valid.
    pub unsafe fn verify_end_of_lifetime(self)
    {
        let header = self.header();
        if header.ref_count.count() != 0 {
            crash(FatalError::StackObjectEscaped);
        }
        if header.weak_ref_count.count() != 1 {
            crash(FatalError::WeakReferenceToStackObject);
        }
    }
}
