use crate::object::HeapMetadata;
use crate::object::HeapObject;
use crate::object::MetadataKind;
use crate::object::ValueType;
use super::UnsafeHandle;
use super::alloc::allocate_object_with;
use super::dealloc_object;

use core::ptr::NonNull;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Metadata of a box holding a value of some type.
///
/// A box is a heap object whose payload is a single value,
/// placed after the header at the first offset suitably aligned for it.
/// The heap metadata comes first, so the metadata pointer in the header
/// of a box is also a pointer to the box metadata.
#[repr(C)]
pub struct BoxMetadata
{
    /// Metadata seen by the heap. Its kind is [`MetadataKind::GenericBox`].
    pub heap: HeapMetadata,

    /// Offset of the payload from the start of the object.
    pub payload_offset: usize,

    /// Type of the value in the box.
    pub boxed_type: &'static ValueType,
}

impl BoxMetadata
{
    /// Compute the metadata for boxes holding values of the given type.
    pub fn new(boxed_type: &'static ValueType) -> Self
    {
        let payload_offset = payload_offset(boxed_type);
        let instance_size = payload_offset + boxed_type.size;
        let instance_align_mask = boxed_type.align_mask | HeapObject::ALIGN_MASK;
        Self{
            heap: HeapMetadata{
                kind: MetadataKind::GenericBox,
                instance_size,
                instance_align_mask,
                destroy: destroy_generic_box,
            },
            payload_offset,
            boxed_type,
        }
    }

    /// Get the box metadata of a box.
    ///
    /// # Safety
    ///
    /// The object must be a box whose storage is not yet freed.
    #[inline]
    pub unsafe fn of(object: UnsafeHandle) -> &'static Self
    {
        debug_assert_eq!(object.metadata().kind, MetadataKind::GenericBox, "not a box");
        &*object.metadata_ptr().cast::<Self>().as_ptr()
    }

    /// Address of the payload of a box with this metadata.
    ///
    /// # Safety
    ///
    /// The object must be a box with this metadata.
    #[inline]
    pub unsafe fn project(&self, object: UnsafeHandle) -> NonNull<u8>
    {
        let payload = object.as_ptr().cast::<u8>().add(self.payload_offset);
        NonNull::new_unchecked(payload)
    }
}

/// The header size, rounded up to the alignment of the value type.
#[inline]
fn payload_offset(boxed_type: &ValueType) -> usize
{
    (HeapObject::SIZE + boxed_type.align_mask) & !boxed_type.align_mask
}

unsafe extern "C" fn destroy_generic_box(object: UnsafeHandle)
{
    let metadata = BoxMetadata::of(object);
    (metadata.boxed_type.destroy)(metadata.project(object).as_ptr());
}

/// Box metadata for every value type boxed so far.
///
/// Entries are created on first use and live until the process ends.
/// When several threads box a type for the first time at once,
/// each computes an entry, the first to insert it wins,
/// and the others discard theirs and use the winner.
#[derive(Default)]
pub struct BoxCache
{
    entries: RwLock<HashMap<usize, &'static BoxMetadata>>,
}

impl BoxCache
{
    /// Get the entry for the value type, creating it if needed.
    pub fn get_or_insert(&self, boxed_type: &'static ValueType)
        -> &'static BoxMetadata
    {
        let key = boxed_type as *const ValueType as usize;

        if let Some(entry) = self.entries.read().get(&key).copied() {
            return entry;
        }

        let candidate = BoxMetadata::new(boxed_type);

        match self.entries.write().entry(key) {
            Entry::Occupied(entry) => {
                log::trace!("box metadata for type {:#x} created concurrently", key);
                *entry.get()
            },
            Entry::Vacant(entry) => {
                log::debug!(
                    "box metadata for type {:#x}: size {}, payload at {}",
                    key, candidate.heap.instance_size, candidate.payload_offset,
                );
                *entry.insert(Box::leak(Box::new(candidate)))
            },
        }
    }

    /// Number of entries in the cache.
    pub fn len(&self) -> usize
    {
        self.entries.read().len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

static BOXES: Lazy<BoxCache> = Lazy::new(BoxCache::default);

/// The cache used by [`allocate_box`].
pub fn box_cache() -> &'static BoxCache
{
    &BOXES
}

/// A freshly allocated box and the address of its payload.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BoxPair
{
    /// The box, with a strong count of one.
    pub object: UnsafeHandle,

    /// Uninitialized storage for the value.
    pub projection: NonNull<u8>,
}

/// Allocate a box for a value of the given type.
///
/// The payload is left uninitialized.
/// The caller must initialize it before the box can be destroyed,
/// or free the box with [`deallocate_uninitialized_box`].
pub fn allocate_box(boxed_type: &'static ValueType) -> BoxPair
{
    let metadata = BOXES.get_or_insert(boxed_type);
    let heap = &metadata.heap;
    unsafe {
        // Derived from the whole box metadata, so that BoxMetadata::of
        // may read past the heap metadata.
        let pointer = NonNull::from(metadata).cast::<HeapMetadata>();
        let object = allocate_object_with(pointer, heap.instance_size, heap.instance_align_mask);
        let projection = metadata.project(object);
        BoxPair{object, projection}
    }
}

/// Address of the payload of a box.
///
/// A box of a zero-sized type may be represented by null,
/// in which case the result is null too.
///
/// # Safety
///
/// The object, if any, must be a box whose storage is not yet freed.
#[inline]
pub unsafe fn project_box(object: Option<UnsafeHandle>) -> Option<NonNull<u8>>
{
    let object = object?;
    Some(BoxMetadata::of(object).project(object))
}

/// Destroy the value in a box and free the box.
///
/// # Safety
///
/// The caller must hold the only strong reference to the box,
/// and the payload must be initialized.
pub unsafe fn deallocate_box(object: UnsafeHandle)
{
    object.set_deallocating();
    object.release_dealloc();
}

/// Free a box without destroying its value.
///
/// # Safety
///
/// The caller must hold the only strong reference to the box,
/// and the payload must be uninitialized or moved out.
pub unsafe fn deallocate_uninitialized_box(object: UnsafeHandle)
{
    let metadata = BoxMetadata::of(object);
    object.set_deallocating();
    dealloc_object(object, metadata.heap.instance_size, metadata.heap.instance_align_mask);
}

#[cfg(test)]
mod tests
{
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[repr(align(32))]
    struct Wide
    {
        bytes: [u8; 40],
    }

    static WORD: ValueType = ValueType::of::<u64>();
    static WIDE: ValueType = ValueType::of::<Wide>();
    static SHARED: ValueType = ValueType::of::<Arc<()>>();
    static RACED: ValueType = ValueType::of::<u16>();
    static EMPTY: ValueType = ValueType::of::<()>();

    #[test]
    fn same_type_shares_metadata()
    {
        let a = allocate_box(&WORD);
        let b = allocate_box(&WORD);
        unsafe {
            assert!(core::ptr::eq(a.object.metadata(), b.object.metadata()));
            assert_ne!(a.object, b.object);
            assert_ne!(a.projection, b.projection);

            for pair in [a, b] {
                assert_eq!(project_box(Some(pair.object)), Some(pair.projection));
                let offset = pair.projection.as_ptr() as usize - pair.object.addr();
                assert_eq!(offset, (HeapObject::SIZE + 7) & !7);
                pair.projection.as_ptr().cast::<u64>().write(7);
                pair.object.release();
            }
        }
    }

    #[test]
    fn payload_offset_respects_alignment()
    {
        let pair = allocate_box(&WIDE);
        unsafe {
            let offset = pair.projection.as_ptr() as usize - pair.object.addr();
            assert_eq!(offset, 32);
            assert_eq!(pair.projection.as_ptr() as usize % 32, 0);
            assert_eq!(pair.object.metadata().instance_size, 32 + core::mem::size_of::<Wide>());

            let payload = pair.projection.as_ptr().cast::<Wide>();
            payload.write(Wide{bytes: [9; 40]});
            assert_eq!((*payload).bytes[39], 9);
            deallocate_box(pair.object);
        }
    }

    #[test]
    fn release_drops_value()
    {
        let value = Arc::new(());
        let pair = allocate_box(&SHARED);
        unsafe {
            pair.projection.as_ptr().cast::<Arc<()>>().write(value.clone());
            assert_eq!(Arc::strong_count(&value), 2);
            pair.object.retain();
            pair.object.release();
            assert_eq!(Arc::strong_count(&value), 2);
            pair.object.release();
        }
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn deallocate_box_drops_value()
    {
        let value = Arc::new(());
        let pair = allocate_box(&SHARED);
        unsafe {
            pair.projection.as_ptr().cast::<Arc<()>>().write(value.clone());
            deallocate_box(pair.object);
        }
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn uninitialized_box_skips_destroy()
    {
        let pair = allocate_box(&SHARED);
        unsafe {
            // Garbage in the payload; destroying it would drop a wild Arc.
            pair.projection.as_ptr().write_bytes(0xFF, core::mem::size_of::<Arc<()>>());
            deallocate_uninitialized_box(pair.object);
        }
    }

    #[test]
    fn null_box_projects_to_null()
    {
        unsafe { assert_eq!(project_box(None), None) };
        let pair = allocate_box(&EMPTY);
        unsafe {
            assert_eq!(pair.projection.as_ptr() as usize - pair.object.addr(), HeapObject::SIZE);
            pair.object.release();
        }
    }

    #[test]
    fn concurrent_first_use_inserts_once()
    {
        let cache = BoxCache::default();
        let entries: Vec<usize> = thread::scope(|scope| {
            let handles: Vec<_> = (0 .. 8)
                .map(|_| scope.spawn(|| {
                    cache.get_or_insert(&RACED) as *const BoxMetadata as usize
                }))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(entries.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }
}
