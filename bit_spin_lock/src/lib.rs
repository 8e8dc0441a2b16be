//! Spin lock living in a single bit of an [`AtomicUsize`].
//!
//! The remaining bits of the word keep their meaning while the lock is held,
//! so a tagged pointer can carry its own lock.
//! The lock is meant for critical sections of a handful of instructions.
//! Waiters busy-spin for [`SPIN_LIMIT`] iterations and then yield,
//! so the wait is bounded by the critical section of another thread,
//! never by arbitrary code. It is not a general purpose mutex.

#![warn(missing_docs)]

use core::hint::spin_loop;
use core::mem::forget;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::Acquire;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::Ordering::Release;
use std::thread::yield_now;

/// Number of busy spins after which a waiting thread yields.
pub const SPIN_LIMIT: u32 = 64;

/// Lock over one bit of a word.
#[derive(Clone, Copy)]
pub struct BitSpinLock<'a>
{
    word: &'a AtomicUsize,
    bit: usize,
}

impl<'a> BitSpinLock<'a>
{
    /// Use the given bit of the word as a lock.
    ///
    /// The bit must be a power of two.
    #[inline]
    pub fn new(word: &'a AtomicUsize, bit: usize) -> Self
    {
        debug_assert!(bit.is_power_of_two(), "lock bit must be a single bit");
        Self{word, bit}
    }

    /// Whether some thread holds the lock right now.
    #[inline]
    pub fn is_locked(self) -> bool
    {
        self.word.load(Relaxed) & self.bit != 0
    }

    /// Acquire the lock, waiting for the current holder if there is one.
    ///
    /// The guard remembers the value the word had when the lock was taken.
    /// Dropping the guard stores that value back, which releases the lock.
    pub fn lock(self) -> BitSpinGuard<'a>
    {
        let mut observed = self.word.fetch_or(self.bit, Acquire);
        while observed & self.bit != 0 {
            self.wait();
            observed = self.word.fetch_or(self.bit, Acquire);
        }
        BitSpinGuard{word: self.word, bit: self.bit, observed}
    }

    /// Wait until the bit is observed clear.
    #[cold]
    fn wait(self)
    {
        let mut spins = 0;
        while self.is_locked() {
            spins += 1;
            if spins == SPIN_LIMIT {
                yield_now();
                spins = 0;
            } else {
                spin_loop();
            }
        }
    }
}

/// Proof that the lock bit is held.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct BitSpinGuard<'a>
{
    word: &'a AtomicUsize,
    bit: usize,
    observed: usize,
}

impl<'a> BitSpinGuard<'a>
{
    /// The value of the word just before the lock was taken.
    ///
    /// The lock bit is always clear in this value.
    #[inline]
    pub fn observed(&self) -> usize
    {
        self.observed
    }

    /// Release the lock, leaving the given value in the word.
    ///
    /// The value must not have the lock bit set.
    #[inline]
    pub fn unlock_to(self, value: usize)
    {
        debug_assert!(value & self.bit == 0, "unlocking to a locked value");
        self.word.store(value, Release);
        forget(self);
    }
}

impl<'a> Drop for BitSpinGuard<'a>
{
    #[inline]
    fn drop(&mut self)
    {
        self.word.store(self.observed, Release);
    }
}
