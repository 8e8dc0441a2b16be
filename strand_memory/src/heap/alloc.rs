use crate::fatal::FatalError;
use crate::fatal::crash;
use crate::object::HeapMetadata;
use crate::object::HeapObject;
use crate::object::is_alignment_mask;
use super::UnsafeHandle;

use std::alloc::Layout;
use std::alloc::alloc;
use std::alloc::dealloc;
use std::alloc::handle_alloc_error;
use core::ptr::NonNull;

/// Allocate raw storage.
///
/// Ends the process if the layout is invalid or memory is exhausted;
/// there is no way to recover from allocation failure at this level.
/// The size must not be zero.
pub fn slow_alloc(size: usize, align_mask: usize) -> NonNull<u8>
{
    let layout = match layout(size, align_mask) {
        Some(layout) if size != 0 => layout,
        _ => crash(FatalError::InvalidLayout{size, align_mask}),
    };

    // SAFETY: The layout has a non-zero size.
    let pointer = unsafe { alloc(layout) };

    match NonNull::new(pointer) {
        Some(pointer) => pointer,
        None => {
            log::error!("could not allocate {} bytes", size);
            handle_alloc_error(layout)
        },
    }
}

/// Free raw storage.
///
/// # Safety
///
/// The storage must have come from [`slow_alloc`]
/// with the same size and alignment mask, and must not be used again.
pub unsafe fn slow_dealloc(pointer: NonNull<u8>, size: usize, align_mask: usize)
{
    let layout = Layout::from_size_align_unchecked(size, align_mask + 1);
    dealloc(pointer.as_ptr(), layout);
}

fn layout(size: usize, align_mask: usize) -> Option<Layout>
{
    if !is_alignment_mask(align_mask) {
        return None;
    }
    Layout::from_size_align(size, align_mask.checked_add(1)?).ok()
}

/// Allocate a heap object and initialize its header.
///
/// The object starts out with a strong count of one.
/// Everything after the header is left uninitialized.
///
/// # Safety
///
/// The size and alignment mask must be the instance size and alignment mask
/// of the metadata, which must describe a layout that starts with the header.
/// The rest of the object must be initialized
/// before anything could run its `destroy` function.
pub unsafe fn allocate_object(
    metadata: &'static HeapMetadata,
    size: usize,
    align_mask: usize,
) -> UnsafeHandle
{
    allocate_object_with(NonNull::from(metadata), size, align_mask)
}

/// Like [`allocate_object`], but storing the metadata pointer as given,
/// so it keeps access to whatever structure embeds the metadata.
pub (super) unsafe fn allocate_object_with(
    metadata: NonNull<HeapMetadata>,
    size: usize,
    align_mask: usize,
) -> UnsafeHandle
{
    debug_assert!(is_alignment_mask(align_mask));
    debug_assert!(size >= HeapObject::SIZE, "object smaller than its header");
    debug_assert!(align_mask >= HeapObject::ALIGN_MASK, "object less aligned than its header");
    debug_assert_eq!(size, metadata.as_ref().instance_size);
    debug_assert_eq!(align_mask, metadata.as_ref().instance_align_mask);

    let pointer = slow_alloc(size, align_mask).cast::<HeapObject>();
    pointer.as_ptr().write(HeapObject::new(metadata));

    let object = UnsafeHandle::new(pointer);

    #[cfg(feature = "leak-tracking")]
    super::leaks::start_tracking(object);

    object
}

/// Give up the weak unit held by the strong side of a deallocating object,
/// freeing its storage if no weak or unowned references remain.
///
/// # Safety
///
/// The object must be deallocating and its contents destroyed.
/// The size and alignment mask must be those it was allocated with.
/// No strong reference may be used afterwards.
pub unsafe fn dealloc_object(
    object: UnsafeHandle,
    allocated_size: usize,
    allocated_align_mask: usize,
)
{
    let header = object.header();

    debug_assert!(is_alignment_mask(allocated_align_mask));
    debug_assert!(header.ref_count.is_deallocating(), "freeing a live object");

    #[cfg(feature = "leak-tracking")]
    super::leaks::stop_tracking(object);

    #[cfg(feature = "clobber-freed")]
    clobber(object, allocated_size);

    // A plain load is enough here. The strong count has reached zero,
    // and while it was positive the weak count was at least one.
    // A weak retain that does not race with deallocation
    // therefore happens before this point and is visible.
    // A weak release may race, but then we merely miss it
    // and take the atomic path below, which is always correct.
    //
    // A stack object's weak count holds a unit for the owner of its
    // storage, so it takes the atomic path and is never freed.
    if header.weak_ref_count.count() == 1 {
        free_object(object, allocated_size, allocated_align_mask);
    } else {
        log::trace!(
            "object {:#x} deallocating; storage outlives it for weak references",
            object.addr(),
        );
        object.unowned_release(1);
    }
}

/// Return the storage of an object to the allocator.
pub (super) unsafe fn free_object(object: UnsafeHandle, size: usize, align_mask: usize)
{
    slow_dealloc(NonNull::new_unchecked(object.as_ptr().cast()), size, align_mask);
}

/// Written over the contents of destroyed objects.
#[cfg(feature = "clobber-freed")]
pub const CLOBBER_PATTERN: [u8; 8] = [0xAB, 0xAD, 0x1D, 0xEA, 0xF4, 0xEE, 0xD0, 0xB9];

/// Overwrite everything after the header with [`CLOBBER_PATTERN`].
#[cfg(feature = "clobber-freed")]
unsafe fn clobber(object: UnsafeHandle, size: usize)
{
    let payload = object.as_ptr().cast::<u8>().add(HeapObject::SIZE);
    let payload = core::slice::from_raw_parts_mut(payload, size - HeapObject::SIZE);
    for (byte, pattern) in payload.iter_mut().zip(CLOBBER_PATTERN.iter().cycle()) {
        *byte = *pattern;
    }
}
