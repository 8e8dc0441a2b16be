use bitflags::bitflags;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Acquire;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::Ordering::Release;
use core::sync::atomic::fence;

bitflags!
{
    /// Flags stored in the low bits of a [`StrongRefCount`].
    pub struct StrongFlags: u32
    {
        /// Some caller holds exclusive in-place access to the object.
        ///
        /// A pin always comes with one unit of the live count,
        /// so a pinned object cannot start deallocating.
        const PINNED = 1 << 0;

        /// The live count has reached zero.
        ///
        /// Once set, this flag is never cleared
        /// and the object can no longer be retained.
        const DEALLOCATING = 1 << 1;
    }
}

bitflags!
{
    /// Flags stored in the low bits of a [`WeakRefCount`].
    pub struct WeakFlags: u32
    {
        /// The object lives in storage this crate does not own,
        /// such as a stack frame, and must never be freed by it.
        const STACK_ALLOCATED = 1 << 0;
    }
}

const STRONG_SHIFT: u32 = 2;
const STRONG_ONE: u32 = 1 << STRONG_SHIFT;
const STRONG_COUNT_MASK: u32 = !(STRONG_ONE - 1);

const WEAK_SHIFT: u32 = 1;
const WEAK_ONE: u32 = 1 << WEAK_SHIFT;

/// Strong reference count with pin and deallocation flags.
///
/// The count and both flags share a single word,
/// so every transition is a single atomic step.
///
/// Every mutating operation comes in two flavors.
/// The plain ones are safe under unrestricted concurrency.
/// The `_non_atomic` ones perform a plain load and store,
/// and are only correct when no other thread
/// can touch the same count at the same time.
#[repr(transparent)]
pub struct StrongRefCount
{
    bits: AtomicU32,
}

impl StrongRefCount
{
    /// A count of one, neither pinned nor deallocating.
    #[inline]
    pub const fn new() -> Self
    {
        Self{bits: AtomicU32::new(STRONG_ONE)}
    }

    /// Add `n` to the live count.
    #[inline]
    pub fn increment(&self, n: u32)
    {
        let old = self.bits.fetch_add(n << STRONG_SHIFT, Relaxed);
        debug_assert_retainable(old, n);
    }

    /// Add `n` to the live count, without atomicity.
    #[inline]
    pub fn increment_non_atomic(&self, n: u32)
    {
        let old = self.bits.load(Relaxed);
        debug_assert_retainable(old, n);
        self.bits.store(old + (n << STRONG_SHIFT), Relaxed);
    }

    /// Add one to the live count unless the object is deallocating.
    ///
    /// Returns whether the count was incremented.
    /// A deallocating object is never resurrected by this method.
    #[inline]
    pub fn try_increment(&self) -> bool
    {
        let mut old = self.bits.load(Relaxed);
        loop {
            if flags(old).contains(StrongFlags::DEALLOCATING) {
                return false;
            }
            let new = old + STRONG_ONE;
            match self.bits.compare_exchange_weak(old, new, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(actual) => old = actual,
            }
        }
    }

    /// Add one to the live count and set the pinned flag,
    /// unless the object is already pinned or is deallocating.
    ///
    /// Returns whether the count was incremented.
    #[inline]
    pub fn try_increment_and_pin(&self) -> bool
    {
        let mut old = self.bits.load(Relaxed);
        loop {
            let Some(new) = pinned(old) else { return false };
            match self.bits.compare_exchange_weak(old, new, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(actual) => old = actual,
            }
        }
    }

    /// Like [`try_increment_and_pin`][`Self::try_increment_and_pin`],
    /// but without atomicity.
    #[inline]
    pub fn try_increment_and_pin_non_atomic(&self) -> bool
    {
        let old = self.bits.load(Relaxed);
        match pinned(old) {
            Some(new) => { self.bits.store(new, Relaxed); true },
            None => false,
        }
    }

    /// Subtract `n` from the live count.
    ///
    /// Returns true if and only if the count reached zero,
    /// in which case the deallocating flag was set in the same step.
    /// Among racing decrements exactly one observes the transition.
    #[inline]
    pub fn decrement_should_deallocate(&self, n: u32) -> bool
    {
        let mut old = self.bits.load(Relaxed);
        loop {
            let (new, deallocate) = decremented(old, n);
            match self.bits.compare_exchange_weak(old, new, Release, Relaxed) {
                Ok(_) => {
                    if deallocate {
                        // Synchronize with every earlier release,
                        // so that destruction sees all their writes.
                        fence(Acquire);
                    }
                    return deallocate;
                },
                Err(actual) => old = actual,
            }
        }
    }

    /// Like [`decrement_should_deallocate`][`Self::decrement_should_deallocate`],
    /// but without atomicity.
    #[inline]
    pub fn decrement_should_deallocate_non_atomic(&self, n: u32) -> bool
    {
        let (new, deallocate) = decremented(self.bits.load(Relaxed), n);
        self.bits.store(new, Relaxed);
        deallocate
    }

    /// Subtract one from the live count and clear the pinned flag,
    /// as a single step.
    ///
    /// Returns true if and only if the count reached zero,
    /// in which case the deallocating flag was set in the same step.
    /// No thread can observe the object unpinned
    /// before the deallocation decision has been made.
    #[inline]
    pub fn decrement_and_unpin_should_deallocate(&self) -> bool
    {
        let mut old = self.bits.load(Relaxed);
        loop {
            let (new, deallocate) = unpinned(old);
            match self.bits.compare_exchange_weak(old, new, Release, Relaxed) {
                Ok(_) => {
                    if deallocate {
                        fence(Acquire);
                    }
                    return deallocate;
                },
                Err(actual) => old = actual,
            }
        }
    }

    /// Like [`decrement_and_unpin_should_deallocate`][`Self::decrement_and_unpin_should_deallocate`],
    /// but without atomicity.
    #[inline]
    pub fn decrement_and_unpin_should_deallocate_non_atomic(&self) -> bool
    {
        let (new, deallocate) = unpinned(self.bits.load(Relaxed));
        self.bits.store(new, Relaxed);
        deallocate
    }

    /// Move from a count of exactly one straight to deallocating.
    ///
    /// For callers that know they hold the only reference.
    #[inline]
    pub fn decrement_from_one_and_deallocate_non_atomic(&self)
    {
        debug_assert_eq!(
            self.bits.load(Relaxed) & !StrongFlags::PINNED.bits(),
            STRONG_ONE,
            "setting deallocating on an object that is not uniquely referenced",
        );
        self.bits.store(StrongFlags::DEALLOCATING.bits(), Relaxed);
    }

    /// Whether the live count has reached zero.
    #[inline]
    pub fn is_deallocating(&self) -> bool
    {
        flags(self.bits.load(Relaxed)).contains(StrongFlags::DEALLOCATING)
    }

    /// Whether the pinned flag is set.
    #[inline]
    pub fn is_pinned(&self) -> bool
    {
        flags(self.bits.load(Relaxed)).contains(StrongFlags::PINNED)
    }

    /// The live count.
    #[inline]
    pub fn count(&self) -> u32
    {
        self.bits.load(Relaxed) >> STRONG_SHIFT
    }
}

impl Default for StrongRefCount
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[inline]
fn flags(bits: u32) -> StrongFlags
{
    StrongFlags::from_bits_truncate(bits)
}

#[inline]
fn debug_assert_retainable(old: u32, n: u32)
{
    debug_assert!(
        !flags(old).contains(StrongFlags::DEALLOCATING),
        "retaining an object that is deallocating",
    );
    debug_assert!(
        (old >> STRONG_SHIFT).checked_add(n)
            .map_or(false, |c| c <= STRONG_COUNT_MASK >> STRONG_SHIFT),
        "strong reference count overflow",
    );
}

/// New value after a decrement by `n`, and whether it claimed deallocation.
#[inline]
fn decremented(old: u32, n: u32) -> (u32, bool)
{
    debug_assert!(
        !flags(old).contains(StrongFlags::DEALLOCATING),
        "releasing an object that is deallocating",
    );
    debug_assert!(old >> STRONG_SHIFT >= n, "strong reference count underflow");
    let new = old - (n << STRONG_SHIFT);
    if new & STRONG_COUNT_MASK == 0 {
        (new | StrongFlags::DEALLOCATING.bits(), true)
    } else {
        (new, false)
    }
}

/// New value after pinning, or [`None`] if pinning is not allowed.
#[inline]
fn pinned(old: u32) -> Option<u32>
{
    let forbidden = StrongFlags::PINNED | StrongFlags::DEALLOCATING;
    if flags(old).intersects(forbidden) {
        None
    } else {
        Some((old + STRONG_ONE) | StrongFlags::PINNED.bits())
    }
}

#[inline]
fn unpinned(old: u32) -> (u32, bool)
{
    debug_assert!(flags(old).contains(StrongFlags::PINNED), "unpinning an object that is not pinned");
    decremented(old & !StrongFlags::PINNED.bits(), 1)
}

/// Count of weak and unowned references,
/// plus one unit held on behalf of all strong references together.
///
/// The strong side gives up its unit when the object is deallocated,
/// so storage is freed when this count reaches zero.
#[repr(transparent)]
pub struct WeakRefCount
{
    bits: AtomicU32,
}

impl WeakRefCount
{
    /// A count of one, for an object on the heap.
    #[inline]
    pub const fn new() -> Self
    {
        Self{bits: AtomicU32::new(WEAK_ONE)}
    }

    /// A count of two, for an object whose storage is not ours to free.
    ///
    /// The second unit belongs to the owner of the storage
    /// and is never given up, so deallocation stops short of freeing.
    #[inline]
    pub const fn new_for_stack() -> Self
    {
        Self{bits: AtomicU32::new(2 * WEAK_ONE | WeakFlags::STACK_ALLOCATED.bits())}
    }

    /// Add `n` to the count.
    #[inline]
    pub fn increment(&self, n: u32)
    {
        let old = self.bits.fetch_add(n << WEAK_SHIFT, Relaxed);
        debug_assert!(old >> WEAK_SHIFT != 0, "weak retain of a freed object");
    }

    /// Add `n` to the count, without atomicity.
    #[inline]
    pub fn increment_non_atomic(&self, n: u32)
    {
        let old = self.bits.load(Relaxed);
        debug_assert!(old >> WEAK_SHIFT != 0, "weak retain of a freed object");
        self.bits.store(old + (n << WEAK_SHIFT), Relaxed);
    }

    /// Subtract `n` from the count.
    ///
    /// Returns true if and only if the count reached zero,
    /// meaning no weak references and no strong references remain
    /// and the storage may be freed.
    #[inline]
    pub fn decrement_should_deallocate(&self, n: u32) -> bool
    {
        let old = self.bits.fetch_sub(n << WEAK_SHIFT, Release);
        debug_assert!(old >> WEAK_SHIFT >= n, "weak reference count underflow");
        if old >> WEAK_SHIFT == n {
            fence(Acquire);
            true
        } else {
            false
        }
    }

    /// Like [`decrement_should_deallocate`][`Self::decrement_should_deallocate`],
    /// but without atomicity.
    #[inline]
    pub fn decrement_should_deallocate_non_atomic(&self, n: u32) -> bool
    {
        let old = self.bits.load(Relaxed);
        debug_assert!(old >> WEAK_SHIFT >= n, "weak reference count underflow");
        self.bits.store(old - (n << WEAK_SHIFT), Relaxed);
        old >> WEAK_SHIFT == n
    }

    /// Whether the object was initialized for stack storage.
    #[inline]
    pub fn is_stack_allocated(&self) -> bool
    {
        WeakFlags::from_bits_truncate(self.bits.load(Relaxed))
            .contains(WeakFlags::STACK_ALLOCATED)
    }

    /// The count, including the unit held by the strong side.
    #[inline]
    pub fn count(&self) -> u32
    {
        self.bits.load(Relaxed) >> WEAK_SHIFT
    }
}

impl Default for WeakRefCount
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    use proptest::collection::vec;
    use proptest::proptest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;
    use std::thread;

    #[test]
    fn strong_starts_at_one()
    {
        let count = StrongRefCount::new();
        assert_eq!(count.count(), 1);
        assert!(!count.is_deallocating());
        assert!(!count.is_pinned());
    }

    #[test]
    fn try_increment_fails_once_deallocating()
    {
        let count = StrongRefCount::new();
        assert!(count.try_increment());
        assert!(!count.decrement_should_deallocate(1));
        assert!(count.decrement_should_deallocate(1));
        assert!(count.is_deallocating());
        assert!(!count.try_increment());
        assert_eq!(count.count(), 0);
    }

    #[test]
    fn pin_is_exclusive()
    {
        let count = StrongRefCount::new();
        assert!(count.try_increment_and_pin());
        assert!(count.is_pinned());
        assert_eq!(count.count(), 2);
        assert!(!count.try_increment_and_pin());
        assert!(!count.try_increment_and_pin_non_atomic());
        assert!(!count.decrement_and_unpin_should_deallocate());
        assert!(!count.is_pinned());
        assert_eq!(count.count(), 1);
        assert!(count.try_increment_and_pin_non_atomic());
        assert!(!count.decrement_and_unpin_should_deallocate_non_atomic());
    }

    #[test]
    fn unpin_of_last_reference_deallocates()
    {
        let count = StrongRefCount::new();
        assert!(count.try_increment_and_pin());
        assert!(!count.decrement_should_deallocate(1));
        assert!(count.decrement_and_unpin_should_deallocate());
        assert!(count.is_deallocating());
        assert!(!count.is_pinned());
    }

    #[test]
    fn set_deallocating_from_one()
    {
        let count = StrongRefCount::new();
        count.decrement_from_one_and_deallocate_non_atomic();
        assert!(count.is_deallocating());
        assert_eq!(count.count(), 0);
    }

    #[test]
    fn weak_floor()
    {
        let count = WeakRefCount::new();
        count.increment(2);
        assert_eq!(count.count(), 3);
        assert!(!count.decrement_should_deallocate(1));
        assert!(!count.decrement_should_deallocate_non_atomic(1));
        assert!(count.decrement_should_deallocate(1));
        assert!(!count.is_stack_allocated());
        assert!(WeakRefCount::new_for_stack().is_stack_allocated());
        assert_eq!(WeakRefCount::new_for_stack().count(), 2);
    }

    #[test]
    fn racing_decrements_elect_one_deallocator()
    {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 1_000;

        let count = StrongRefCount::new();
        count.increment(THREADS * PER_THREAD - 1);
        let winners = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0 .. THREADS {
                scope.spawn(|| {
                    for _ in 0 .. PER_THREAD {
                        if count.decrement_should_deallocate(1) {
                            winners.fetch_add(1, SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(winners.load(SeqCst), 1);
        assert!(count.is_deallocating());
    }

    proptest!
    {
        #[test]
        fn batches_balance(batches in vec(1u32 .. 100, 0 .. 32))
        {
            let count = StrongRefCount::new();
            for &n in &batches {
                count.increment(n);
            }
            let total: u32 = batches.iter().sum();
            assert_eq!(count.count(), total + 1);
            for &n in batches.iter().rev() {
                assert!(!count.decrement_should_deallocate(n));
            }
            assert!(count.decrement_should_deallocate(1));
        }

        #[test]
        fn non_atomic_matches_atomic(
            retains in 0u32 .. 1_000,
            releases in 0u32 .. 1_000,
        )
        {
            let releases = releases.min(retains);
            let atomic = StrongRefCount::new();
            let local = StrongRefCount::new();
            atomic.increment(retains);
            local.increment_non_atomic(retains);
            let a = atomic.decrement_should_deallocate(releases.max(1));
            let b = local.decrement_should_deallocate_non_atomic(releases.max(1));
            assert_eq!(a, b);
            assert_eq!(atomic.count(), local.count());
            assert_eq!(atomic.is_deallocating(), local.is_deallocating());
        }
    }
}
