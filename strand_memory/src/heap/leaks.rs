//! Bookkeeping of live heap objects, for finding leaks.
//!
//! Every object allocated by [`allocate_object`][`super::allocate_object`]
//! is recorded until [`dealloc_object`][`super::dealloc_object`] runs for it.

use super::UnsafeHandle;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;

static LIVE: Lazy<Mutex<HashSet<usize>>> = Lazy::new(Default::default);

pub (super) fn start_tracking(object: UnsafeHandle)
{
    LIVE.lock().insert(object.addr());
}

pub (super) fn stop_tracking(object: UnsafeHandle)
{
    LIVE.lock().remove(&object.addr());
}

/// Number of objects allocated and not yet deallocated.
pub fn live_object_count() -> usize
{
    LIVE.lock().len()
}

/// Log every object allocated and not yet deallocated.
///
/// Returns the number of such objects.
///
/// # Safety
///
/// No object may be freed concurrently.
pub unsafe fn dump_leaks() -> usize
{
    let live = LIVE.lock();
    for &address in live.iter() {
        let object = UnsafeHandle::from_ptr(address as *mut _);
        if let Some(object) = object {
            log::warn!(
                "leaked object {:#x}: {:?}, {} strong, {} weak",
                address,
                object.metadata().kind,
                object.retain_count(),
                object.unowned_retain_count(),
            );
        }
    }
    live.len()
}
