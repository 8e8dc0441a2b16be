//! In-memory representation of objects.

pub use self::metadata::*;
pub use self::refcount::*;

use core::mem::align_of;
use core::mem::size_of;
use core::ptr::NonNull;

mod metadata;
mod refcount;

/// Header at the very start of each heap object.
///
/// The address of the header is the address of the object.
/// Whatever the type of the object stores follows the header,
/// at an offset determined by its alignment.
#[repr(C)]
pub struct HeapObject
{
    /// Describes the size, alignment and destruction of the object.
    /// Written once at allocation and never changed.
    ///
    /// Kept as a pointer so that metadata embedded in a larger structure,
    /// like [`BoxMetadata`][`crate::heap::BoxMetadata`],
    /// can be reached from it.
    pub metadata: NonNull<HeapMetadata>,

    /// See [`StrongRefCount`].
    pub ref_count: StrongRefCount,

    /// See [`WeakRefCount`].
    pub weak_ref_count: WeakRefCount,
}

impl HeapObject
{
    /// Size of the header in bytes.
    pub const SIZE: usize = size_of::<Self>();

    /// Alignment mask of the header.
    pub const ALIGN_MASK: usize = align_of::<Self>() - 1;

    /// Header of a freshly allocated heap object.
    ///
    /// The metadata must live for the rest of the process.
    #[inline]
    pub fn new(metadata: NonNull<HeapMetadata>) -> Self
    {
        Self{
            metadata,
            ref_count: StrongRefCount::new(),
            weak_ref_count: WeakRefCount::new(),
        }
    }

    /// Header of an object whose storage this crate must never free.
    #[inline]
    pub fn new_for_stack(metadata: NonNull<HeapMetadata>) -> Self
    {
        Self{
            metadata,
            ref_count: StrongRefCount::new(),
            weak_ref_count: WeakRefCount::new_for_stack(),
        }
    }
}

// The metadata is immutable and never freed.
unsafe impl Send for HeapObject {}
unsafe impl Sync for HeapObject {}

/// Whether `mask` is one less than a power of two.
#[inline]
pub const fn is_alignment_mask(mask: usize) -> bool
{
    mask & mask.wrapping_add(1) == 0
}
