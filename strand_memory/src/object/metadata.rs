use crate::heap::UnsafeHandle;

use core::mem::align_of;
use core::mem::size_of;
use core::ptr;

/// Tears down the contents of a heap object whose strong count reached zero.
///
/// It releases the references the object holds and runs user teardown code.
/// It must not free the object; the runtime does that afterwards.
pub type DestroyFn = unsafe extern "C" fn(UnsafeHandle);

/// Destroys a value of some type in place.
pub type ValueDestroyFn = unsafe extern "C" fn(*mut u8);

/// Distinguishes the layouts that extend [`HeapMetadata`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataKind
{
    /// A class instance laid out by the compiler.
    Class,

    /// A box synthesized by [`allocate_box`][`crate::heap::allocate_box`].
    /// The metadata is the prefix of a
    /// [`BoxMetadata`][`crate::heap::BoxMetadata`].
    GenericBox,
}

/// What the heap needs to know about the type of a heap object.
#[repr(C)]
pub struct HeapMetadata
{
    /// See [`MetadataKind`].
    pub kind: MetadataKind,

    /// Size in bytes of an instance, header included.
    pub instance_size: usize,

    /// Alignment mask of an instance.
    pub instance_align_mask: usize,

    /// See [`DestroyFn`].
    pub destroy: DestroyFn,
}

impl HeapMetadata
{
    /// Metadata for a class whose instances have the given layout.
    pub const fn class(
        instance_size: usize,
        instance_align_mask: usize,
        destroy: DestroyFn,
    ) -> Self
    {
        Self{
            kind: MetadataKind::Class,
            instance_size,
            instance_align_mask,
            destroy,
        }
    }
}

/// Describes a value type that can be stored in a box.
#[repr(C)]
pub struct ValueType
{
    /// Size of a value in bytes.
    pub size: usize,

    /// Alignment mask of a value.
    pub align_mask: usize,

    /// See [`ValueDestroyFn`].
    pub destroy: ValueDestroyFn,
}

impl ValueType
{
    /// Describe the Rust type `T`.
    ///
    /// Destroying a value runs its [`Drop`] implementation.
    pub const fn of<T>() -> Self
    {
        Self{
            size: size_of::<T>(),
            align_mask: align_of::<T>() - 1,
            destroy: drop_value::<T>,
        }
    }
}

unsafe extern "C" fn drop_value<T>(value: *mut u8)
{
    ptr::drop_in_place(value.cast::<T>());
}
