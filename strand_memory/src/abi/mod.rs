//! Entry points called by generated code.
//!
//! These are thin `extern "C"` wrappers around [`crate::heap`].
//! Object pointers may be null wherever generated code can produce null;
//! operations on a null object do nothing.

#[macro_use] mod macros;

use crate::heap::BoxPair;
use crate::heap::UnsafeHandle;
use crate::heap::WeakReference;
use crate::heap::allocate_box;
use crate::heap::allocate_object;
use crate::heap::dealloc_object;
use crate::heap::deallocate_box;
use crate::heap::init_stack_object;
use crate::heap::project_box;
use crate::object::HeapMetadata;
use crate::object::HeapObject;
use crate::object::ValueType;

use core::ptr::NonNull;

nullable_exports!
{
    /// Take one more strong reference.
    pub fn strand_retain(object) => retain();

    /// Give up one strong reference.
    pub fn strand_release(object) => release();

    /// Take `n` more strong references.
    pub fn strand_retain_n(object, n: u32) => retain_n(n);

    /// Give up `n` strong references.
    pub fn strand_release_n(object, n: u32) => release_n(n);

    /// Take one more strong reference, without atomicity.
    pub fn strand_nonatomic_retain(object) => retain_non_atomic();

    /// Give up one strong reference, without atomicity.
    pub fn strand_nonatomic_release(object) => release_non_atomic();

    /// Take `n` more strong references, without atomicity.
    pub fn strand_nonatomic_retain_n(object, n: u32) => retain_n_non_atomic(n);

    /// Give up `n` strong references, without atomicity.
    pub fn strand_nonatomic_release_n(object, n: u32) => release_n_non_atomic(n);

    /// Clear the pin and give up its strong reference.
    pub fn strand_unpin(object) => unpin();

    /// Clear the pin and give up its strong reference, without atomicity.
    pub fn strand_nonatomic_unpin(object) => unpin_non_atomic();

    /// Take one more unowned reference.
    pub fn strand_unowned_retain(object) => unowned_retain(1);

    /// Give up one unowned reference.
    pub fn strand_unowned_release(object) => unowned_release(1);

    /// Take `n` more unowned references.
    pub fn strand_unowned_retain_n(object, n: u32) => unowned_retain(n);

    /// Give up `n` unowned references.
    pub fn strand_unowned_release_n(object, n: u32) => unowned_release(n);

    /// Take a strong reference through an unowned reference.
    pub fn strand_unowned_retain_strong(object) => unowned_retain_strong();

    /// Trade an unowned reference for a strong reference.
    pub fn strand_unowned_retain_strong_and_release(object)
        => unowned_retain_strong_and_release();

    /// End the process if the object is deallocating.
    pub fn strand_unowned_check(object) => unowned_check();
}

/// See [`allocate_object`].
#[no_mangle]
pub unsafe extern "C" fn strand_alloc_object(
    metadata: &'static HeapMetadata,
    size: usize,
    align_mask: usize,
) -> UnsafeHandle
{
    allocate_object(metadata, size, align_mask)
}

/// See [`dealloc_object`].
#[no_mangle]
pub unsafe extern "C" fn strand_dealloc_object(
    object: UnsafeHandle,
    allocated_size: usize,
    allocated_align_mask: usize,
)
{
    dealloc_object(object, allocated_size, allocated_align_mask);
}

/// See [`init_stack_object`].
#[no_mangle]
pub unsafe extern "C" fn strand_init_stack_object(
    metadata: &'static HeapMetadata,
    storage: NonNull<HeapObject>,
) -> UnsafeHandle
{
    init_stack_object(metadata, storage)
}

/// See [`UnsafeHandle::verify_end_of_lifetime`].
#[no_mangle]
pub unsafe extern "C" fn strand_verify_end_of_lifetime(object: UnsafeHandle)
{
    object.verify_end_of_lifetime();
}

/// See [`UnsafeHandle::try_retain`]. Null for a null object.
#[no_mangle]
pub unsafe extern "C" fn strand_try_retain(object: Option<UnsafeHandle>)
    -> Option<UnsafeHandle>
{
    object?.try_retain()
}

/// See [`UnsafeHandle::try_pin`]. Null for a null object.
#[no_mangle]
pub unsafe extern "C" fn strand_try_pin(object: Option<UnsafeHandle>)
    -> Option<UnsafeHandle>
{
    object?.try_pin()
}

/// See [`UnsafeHandle::try_pin_non_atomic`]. Null for a null object.
#[no_mangle]
pub unsafe extern "C" fn strand_nonatomic_try_pin(object: Option<UnsafeHandle>)
    -> Option<UnsafeHandle>
{
    object?.try_pin_non_atomic()
}

/// See [`UnsafeHandle::set_deallocating`].
#[no_mangle]
pub unsafe extern "C" fn strand_set_deallocating(object: UnsafeHandle)
{
    object.set_deallocating();
}

/// See [`UnsafeHandle::is_deallocating`]. False for a null object.
#[no_mangle]
pub unsafe extern "C" fn strand_is_deallocating(object: Option<UnsafeHandle>) -> bool
{
    object.map_or(false, |object| object.is_deallocating())
}

/// See [`UnsafeHandle::retain_count`].
#[no_mangle]
pub unsafe extern "C" fn strand_retain_count(object: UnsafeHandle) -> usize
{
    object.retain_count()
}

/// See [`UnsafeHandle::unowned_retain_count`].
#[no_mangle]
pub unsafe extern "C" fn strand_unowned_retain_count(object: UnsafeHandle) -> usize
{
    object.unowned_retain_count()
}

/// See [`WeakReference::is_native`].
#[no_mangle]
pub extern "C" fn strand_is_native_weak_reference(slot: &WeakReference) -> bool
{
    slot.is_native()
}

/// See [`WeakReference::init`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_init(
    slot: &WeakReference,
    object: Option<UnsafeHandle>,
)
{
    slot.init(object);
}

/// See [`WeakReference::assign`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_assign(
    slot: &WeakReference,
    object: Option<UnsafeHandle>,
)
{
    slot.assign(object);
}

/// See [`WeakReference::load_strong`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_load_strong(slot: &WeakReference)
    -> Option<UnsafeHandle>
{
    slot.load_strong()
}

/// See [`WeakReference::take_strong`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_take_strong(slot: &WeakReference)
    -> Option<UnsafeHandle>
{
    slot.take_strong()
}

/// See [`WeakReference::destroy`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_destroy(slot: &WeakReference)
{
    slot.destroy();
}

/// See [`WeakReference::copy_init`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_copy_init(dest: &WeakReference, src: &WeakReference)
{
    dest.copy_init(src);
}

/// See [`WeakReference::copy_assign`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_copy_assign(dest: &WeakReference, src: &WeakReference)
{
    dest.copy_assign(src);
}

/// See [`WeakReference::take_init`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_take_init(dest: &WeakReference, src: &WeakReference)
{
    dest.take_init(src);
}

/// See [`WeakReference::take_assign`].
#[no_mangle]
pub unsafe extern "C" fn strand_weak_take_assign(dest: &WeakReference, src: &WeakReference)
{
    dest.take_assign(src);
}

/// See [`allocate_box`].
#[no_mangle]
pub extern "C" fn strand_alloc_box(boxed_type: &'static ValueType) -> BoxPair
{
    allocate_box(boxed_type)
}

/// See [`project_box`].
#[no_mangle]
pub unsafe extern "C" fn strand_project_box(object: Option<UnsafeHandle>)
    -> Option<NonNull<u8>>
{
    project_box(object)
}

/// See [`deallocate_box`].
#[no_mangle]
pub unsafe extern "C" fn strand_dealloc_box(object: UnsafeHandle)
{
    deallocate_box(object);
}

#[cfg(test)]
mod tests
{
    use super::*;

    use crate::test_support::destroyed;
    use crate::test_support::new_counted;

    #[test]
    fn null_is_a_no_op()
    {
        unsafe {
            strand_retain(None);
            strand_release(None);
            strand_retain_n(None, 3);
            strand_release_n(None, 3);
            strand_nonatomic_retain(None);
            strand_nonatomic_release(None);
            strand_unowned_retain(None);
            strand_unowned_release(None);
            strand_unpin(None);
            assert_eq!(strand_try_retain(None), None);
            assert_eq!(strand_try_pin(None), None);
            assert!(!strand_is_deallocating(None));
            assert_eq!(strand_project_box(None), None);
        }
    }

    #[test]
    fn entry_points_reach_the_heap()
    {
        let (object, counter) = new_counted();
        let slot = WeakReference::empty();
        unsafe {
            strand_retain_n(Some(object), 2);
            assert_eq!(strand_retain_count(object), 3);

            strand_weak_init(&slot, Some(object));
            assert!(strand_is_native_weak_reference(&slot));
            assert_eq!(strand_unowned_retain_count(object), 2);

            let pinned = strand_try_pin(Some(object));
            assert_eq!(pinned, Some(object));
            assert_eq!(strand_nonatomic_try_pin(Some(object)), None);
            strand_unpin(pinned);

            strand_release_n(Some(object), 3);
            assert_eq!(destroyed(counter), 1);
            assert_eq!(strand_weak_load_strong(&slot), None);
            strand_weak_destroy(&slot);
        }
    }
}
