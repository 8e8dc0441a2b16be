//! Fixtures shared by the tests of several modules.

use crate::heap::UnsafeHandle;
use crate::heap::allocate_object;
use crate::object::HeapMetadata;
use crate::object::HeapObject;

use core::mem::align_of;
use core::mem::size_of;
use core::ptr::addr_of_mut;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::SeqCst;

/// Object that counts how often it is destroyed.
#[repr(C)]
pub struct Counted
{
    pub header: HeapObject,
    pub destroyed: &'static AtomicUsize,
}

unsafe extern "C" fn destroy_counted(object: UnsafeHandle)
{
    let counted = &*object.as_ptr().cast::<Counted>();
    counted.destroyed.fetch_add(1, SeqCst);
}

pub static COUNTED: HeapMetadata = HeapMetadata::class(
    size_of::<Counted>(),
    align_of::<Counted>() - 1,
    destroy_counted,
);

/// Allocate a counted object with its own counter.
pub fn new_counted() -> (UnsafeHandle, &'static AtomicUsize)
{
    let counter: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
    unsafe {
        let object = allocate_object(
            &COUNTED,
            COUNTED.instance_size,
            COUNTED.instance_align_mask,
        );
        addr_of_mut!((*object.as_ptr().cast::<Counted>()).destroyed).write(counter);
        (object, counter)
    }
}

/// How often the object owning the counter was destroyed.
pub fn destroyed(counter: &AtomicUsize) -> usize
{
    counter.load(SeqCst)
}
