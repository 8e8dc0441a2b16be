use crate::object::HeapMetadata;
use crate::object::HeapObject;

use core::ptr::NonNull;

/// Pointer to a heap object with no guarantees.
///
/// Much like with the primitive [pointer] type,
/// using an unsafe handle is not guaranteed to be safe:
/// the object may have been destroyed or freed in the meantime.
/// Keeping the object alive is up to whoever holds the handle,
/// by owning one unit of its strong or weak count.
///
/// The handle is a single non-null pointer,
/// and `Option<UnsafeHandle>` is a nullable pointer,
/// which is what generated code passes around.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnsafeHandle
{
    pointer: NonNull<HeapObject>,
}

// All mutation of a shared header goes through its atomic counts.
unsafe impl Send for UnsafeHandle {}
unsafe impl Sync for UnsafeHandle {}

impl UnsafeHandle
{
    /// Create a handle from a pointer.
    #[inline]
    pub fn new(pointer: NonNull<HeapObject>) -> Self
    {
        Self{pointer}
    }

    /// Create a handle from a pointer that may be null.
    #[inline]
    pub fn from_ptr(pointer: *mut HeapObject) -> Option<Self>
    {
        NonNull::new(pointer).map(Self::new)
    }

    /// Access the handle as a pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut HeapObject
    {
        self.pointer.as_ptr()
    }

    /// Address of the object, as an integer.
    #[inline]
    pub fn addr(self) -> usize
    {
        self.as_ptr() as usize
    }

    /// Get the header of the object referenced by this handle.
    ///
    /// # Safety
    ///
    /// The handle must point to an object whose storage is not yet freed,
    /// for as long as the returned reference is used.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a HeapObject
    {
        &*self.as_ptr()
    }

    /// Get the metadata of the object referenced by this handle.
    ///
    /// # Safety
    ///
    /// The handle must point to an object whose storage is not yet freed.
    #[inline]
    pub unsafe fn metadata(self) -> &'static HeapMetadata
    {
        self.header().metadata.as_ref()
    }

    /// Get the metadata pointer stored in the header of the object.
    ///
    /// Unlike [`metadata`][`Self::metadata`], the result may be cast
    /// to a structure that embeds the heap metadata as its first field.
    ///
    /// # Safety
    ///
    /// The handle must point to an object whose storage is not yet freed.
    #[inline]
    pub unsafe fn metadata_ptr(self) -> NonNull<HeapMetadata>
    {
        self.header().metadata
    }
}
