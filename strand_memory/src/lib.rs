//! Reference-counted heap objects for the Strand runtime.
//!
//! Every object that compiled code manipulates by reference starts with a
//! [`HeapObject`][`object::HeapObject`] header: a pointer to its type
//! metadata, a strong reference count and a weak reference count.
//! Generated code calls into this crate on every copy and destruction of a
//! reference, so the operations here are small and lock-free.
//! Objects are destroyed deterministically the moment their strong count
//! reaches zero; there is no tracing collector.

#![warn(missing_docs)]

pub mod abi;
pub mod fatal;
pub mod heap;
pub mod object;

#[cfg(test)]
mod test_support;
