//! Allocation, reference counting and boxes.
//!
//! # Object lifecycle
//!
//! An object is created by [`allocate_object`] with a strong count of one
//! and a weak count of one. The weak unit stands for all strong references
//! together. When a release brings the strong count to zero,
//! the object starts deallocating: the `destroy` function from its metadata
//! tears down its contents and [`dealloc_object`] gives up the weak unit.
//! The storage is freed when the weak count reaches zero,
//! which is right away unless weak or unowned references remain.
//!
//! # References
//!
//! | Reference kind        | Keeps alive      | Operations                        |
//! |-----------------------|------------------|-----------------------------------|
//! | Strong                | Object           | [`retain`], [`release`], ...      |
//! | Unowned               | Storage          | [`unowned_retain`], ...           |
//! | Weak ([`WeakReference`]) | Storage, until observed dead | [`load_strong`], ... |
//!
//! The operations are methods on [`UnsafeHandle`] and [`WeakReference`].
//! Entry points for generated code, which accept null, live in
//! [`crate::abi`].
//!
//! [`retain`]: UnsafeHandle::retain
//! [`release`]: UnsafeHandle::release
//! [`unowned_retain`]: UnsafeHandle::unowned_retain
//! [`load_strong`]: WeakReference::load_strong

pub use self::alloc::*;
pub use self::boxes::*;
pub use self::handle::*;
pub use self::stack::*;
pub use self::weak::*;

// The order of these declarations influences
// the order of the UnsafeHandle impls in rustdoc.
mod handle;
mod retain;
mod unowned;
mod stack;

mod alloc;
mod boxes;
mod weak;

#[cfg(feature = "leak-tracking")]
pub mod leaks;
