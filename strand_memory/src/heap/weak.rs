use crate::object::HeapObject;
use super::UnsafeHandle;

use bit_spin_lock::BitSpinLock;
use bitflags::bitflags;
use core::mem::align_of;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::Acquire;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::Ordering::Release;

bitflags!
{
    /// Tag bits in the low end of a [`WeakReference`] word.
    struct Tag: usize
    {
        /// The referent is counted by this crate.
        const NATIVE = 1 << 0;

        /// Held while a thread reads the slot and acts on what it read.
        const READING = 1 << 1;
    }
}

const _: () = assert!(
    align_of::<HeapObject>() > Tag::all().bits(),
    "tag bits must not overlap object addresses",
);

const POINTER_MASK: usize = !Tag::all().bits();

/// Which object model manages the referent of a [`WeakReference`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Management
{
    /// Counted by this crate.
    NativeManaged,

    /// Counted by a foreign object model.
    /// Such slots are handled by the interoperability layer, not here.
    ForeignManaged,
}

/// Slot holding a weak reference.
///
/// A weak reference owns a unit of the weak count of its referent,
/// so the storage of the referent outlives the slot.
/// Loading from the slot yields a strong reference,
/// or nothing once the referent has started deallocating;
/// at that point the slot drops its unit and becomes empty.
///
/// A slot has a single owner, which may mutate it
/// while other threads load from it.
/// [`load_strong`][`Self::load_strong`] and the copy operations
/// read the referent and act on it while holding the
/// slot's reading bit, so they can never act on a referent
/// that another thread is concurrently replacing.
#[repr(transparent)]
pub struct WeakReference
{
    value: AtomicUsize,
}

impl WeakReference
{
    /// An empty slot.
    #[inline]
    pub const fn empty() -> Self
    {
        Self{value: AtomicUsize::new(0)}
    }

    /// Which object model manages the referent.
    ///
    /// An empty slot has no native referent and reports foreign.
    #[inline]
    pub fn management(&self) -> Management
    {
        let value = self.value.load(Relaxed);
        if value & Tag::NATIVE.bits() != 0 && value & POINTER_MASK != 0 {
            Management::NativeManaged
        } else {
            Management::ForeignManaged
        }
    }

    /// Whether the slot refers to an object counted by this crate.
    #[inline]
    pub fn is_native(&self) -> bool
    {
        self.management() == Management::NativeManaged
    }

    /// Whether the slot is empty.
    ///
    /// A non-empty slot may still refer to a deallocating object.
    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.value.load(Relaxed) & POINTER_MASK == 0
    }

    #[inline]
    fn lock(&self) -> BitSpinLock<'_>
    {
        BitSpinLock::new(&self.value, Tag::READING.bits())
    }

    /// Initialize the slot to refer to the object.
    ///
    /// # Safety
    ///
    /// The slot must be empty or its value otherwise accounted for,
    /// and no other thread may access it yet.
    /// The caller must own a strong reference to the object.
    pub unsafe fn init(&self, object: Option<UnsafeHandle>)
    {
        self.value.store(encode(object), Release);
        if let Some(object) = object {
            object.unowned_retain(1);
        }
    }

    /// Make the slot refer to another object.
    ///
    /// The new referent gains a weak unit before the slot changes,
    /// and the old referent loses its unit after.
    ///
    /// # Safety
    ///
    /// The caller must own the slot and a strong reference to the object.
    pub unsafe fn assign(&self, object: Option<UnsafeHandle>)
    {
        if let Some(object) = object {
            object.unowned_retain(1);
        }
        let guard = self.lock().lock();
        let old = decode(guard.observed());
        guard.unlock_to(encode(object));
        release_unit(old);
    }

    /// Obtain a strong reference to the referent.
    ///
    /// Returns [`None`] if the slot is empty or the referent is
    /// deallocating. In the latter case the slot is emptied as well.
    ///
    /// # Safety
    ///
    /// The slot must be initialized and not destroyed.
    pub unsafe fn load_strong(&self) -> Option<UnsafeHandle>
    {
        if self.value.load(Relaxed) == 0 {
            return None;
        }

        let guard = self.lock().lock();
        let object = decode(guard.observed())?;

        if object.is_deallocating() {
            guard.unlock_to(0);
            object.unowned_release(1);
            return None;
        }

        let result = object.try_retain();
        drop(guard);
        result
    }

    /// Obtain a strong reference to the referent and destroy the slot.
    ///
    /// # Safety
    ///
    /// The caller must own the slot, and no other thread may access it.
    pub unsafe fn take_strong(&self) -> Option<UnsafeHandle>
    {
        let object = decode(self.value.load(Acquire))?;
        let result = object.try_retain();
        self.value.store(0, Relaxed);
        object.unowned_release(1);
        result
    }

    /// Destroy the slot, giving up its weak unit.
    ///
    /// The slot is left empty, so destroying it again does nothing.
    ///
    /// # Safety
    ///
    /// The caller must own the slot, and no other thread may access it.
    pub unsafe fn destroy(&self)
    {
        let object = decode(self.value.load(Acquire));
        self.value.store(0, Relaxed);
        release_unit(object);
    }

    /// Initialize this slot as a copy of another.
    ///
    /// If the referent of `src` is deallocating,
    /// both slots end up empty.
    ///
    /// # Safety
    ///
    /// This slot must be uninitialized or empty and not visible
    /// to other threads. The source slot must be initialized.
    pub unsafe fn copy_init(&self, src: &WeakReference)
    {
        if src.value.load(Relaxed) == 0 {
            self.value.store(0, Relaxed);
            return;
        }

        let guard = src.lock().lock();
        match decode(guard.observed()) {
            None => {
                guard.unlock_to(0);
                self.value.store(0, Relaxed);
            },
            Some(object) if object.is_deallocating() => {
                guard.unlock_to(0);
                object.unowned_release(1);
                self.value.store(0, Relaxed);
            },
            Some(object) => {
                object.unowned_retain(1);
                drop(guard);
                self.value.store(encode(Some(object)), Release);
            },
        }
    }

    /// Make this slot a copy of another, giving up its current referent.
    ///
    /// # Safety
    ///
    /// The caller must own this slot. The source slot must be initialized,
    /// and must not be this slot.
    pub unsafe fn copy_assign(&self, src: &WeakReference)
    {
        self.destroy();
        self.copy_init(src);
    }

    /// Initialize this slot by moving the referent out of another,
    /// leaving the source empty.
    ///
    /// # Safety
    ///
    /// This slot must be uninitialized or empty. The caller must own
    /// the source slot, and neither may be accessed by other threads.
    pub unsafe fn take_init(&self, src: &WeakReference)
    {
        let object = decode(src.value.load(Acquire));
        match object {
            Some(object) if object.is_deallocating() => {
                self.value.store(0, Relaxed);
                object.unowned_release(1);
            },
            _ => self.value.store(encode(object), Release),
        }
        src.value.store(0, Relaxed);
    }

    /// Move the referent out of another slot into this one,
    /// giving up this slot's current referent.
    ///
    /// # Safety
    ///
    /// The caller must own both slots,
    /// and neither may be accessed by other threads.
    pub unsafe fn take_assign(&self, src: &WeakReference)
    {
        self.destroy();
        self.take_init(src);
    }
}

impl Default for WeakReference
{
    fn default() -> Self
    {
        Self::empty()
    }
}

#[inline]
fn encode(object: Option<UnsafeHandle>) -> usize
{
    match object {
        Some(object) => object.addr() | Tag::NATIVE.bits(),
        None => 0,
    }
}

#[inline]
fn decode(value: usize) -> Option<UnsafeHandle>
{
    debug_assert!(
        value == 0 || value & Tag::NATIVE.bits() != 0,
        "foreign weak reference",
    );
    UnsafeHandle::from_ptr((value & POINTER_MASK) as *mut HeapObject)
}

#[inline]
unsafe fn release_unit(object: Option<UnsafeHandle>)
{
    if let Some(object) = object {
        object.unowned_release(1);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    use crate::test_support::destroyed;
    use crate::test_support::new_counted;

    use std::thread;

    #[test]
    fn load_strong_retains_once()
    {
        let (object, counter) = new_counted();
        let slot = WeakReference::empty();
        unsafe {
            slot.init(Some(object));
            assert!(slot.is_native());
            assert_eq!(object.unowned_retain_count(), 2);

            let before = object.retain_count();
            let loaded = slot.load_strong();
            assert_eq!(loaded, Some(object));
            assert_eq!(object.retain_count(), before + 1);
            assert!(!slot.is_empty());

            object.release();
            object.release();
            assert_eq!(destroyed(counter), 1);
            slot.destroy();
        }
    }

    #[test]
    fn load_after_death_clears_slot()
    {
        let (object, counter) = new_counted();
        let slot = WeakReference::empty();
        unsafe {
            slot.init(Some(object));
            object.release();
            assert_eq!(destroyed(counter), 1);

            assert_eq!(slot.load_strong(), None);
            assert!(slot.is_empty());
            assert!(!slot.is_native());
            assert_eq!(slot.load_strong(), None);

            slot.destroy();
            slot.destroy();
        }
    }

    #[test]
    fn empty_slot()
    {
        let slot = WeakReference::default();
        unsafe {
            slot.init(None);
            assert_eq!(slot.management(), Management::ForeignManaged);
            assert_eq!(slot.load_strong(), None);
            assert_eq!(slot.take_strong(), None);
            slot.destroy();
        }
    }

    #[test]
    fn assign_moves_weak_unit()
    {
        let (first, _) = new_counted();
        let (second, _) = new_counted();
        let slot = WeakReference::empty();
        unsafe {
            slot.init(Some(first));
            slot.assign(Some(second));
            assert_eq!(first.unowned_retain_count(), 1);
            assert_eq!(second.unowned_retain_count(), 2);

            let loaded = slot.load_strong().unwrap();
            assert_eq!(loaded, second);
            loaded.release();

            slot.assign(None);
            assert!(slot.is_empty());
            assert_eq!(second.unowned_retain_count(), 1);

            first.release();
            second.release();
        }
    }

    #[test]
    fn take_strong_destroys_slot()
    {
        let (object, counter) = new_counted();
        let slot = WeakReference::empty();
        unsafe {
            slot.init(Some(object));
            let taken = slot.take_strong();
            assert_eq!(taken, Some(object));
            assert!(slot.is_empty());
            assert_eq!(object.unowned_retain_count(), 1);
            object.release_n(2);
        }
        assert_eq!(destroyed(counter), 1);
    }

    #[test]
    fn copies_and_moves()
    {
        let (object, _) = new_counted();
        let a = WeakReference::empty();
        let b = WeakReference::empty();
        let c = WeakReference::empty();
        unsafe {
            a.init(Some(object));
            b.copy_init(&a);
            assert_eq!(object.unowned_retain_count(), 3);

            c.take_init(&b);
            assert!(b.is_empty());
            assert_eq!(object.unowned_retain_count(), 3);

            b.copy_assign(&c);
            assert_eq!(object.unowned_retain_count(), 4);
            c.take_assign(&a);
            assert!(a.is_empty());
            assert_eq!(object.unowned_retain_count(), 3);

            object.release();
            b.copy_assign(&c);
            assert!(b.is_empty());
            assert!(c.is_empty());

            a.destroy();
            b.destroy();
            c.destroy();
        }
    }

    #[test]
    fn take_init_of_dead_referent()
    {
        let (object, _) = new_counted();
        let a = WeakReference::empty();
        let b = WeakReference::empty();
        unsafe {
            a.init(Some(object));
            object.release();
            b.take_init(&a);
            assert!(a.is_empty());
            assert!(b.is_empty());
        }
    }

    #[test]
    fn concurrent_loads_race_release()
    {
        const ROUNDS: usize = 100;
        const READERS: usize = 4;

        for _ in 0 .. ROUNDS {
            let (object, counter) = new_counted();
            let slot = WeakReference::empty();
            unsafe { slot.init(Some(object)) };

            thread::scope(|scope| {
                for _ in 0 .. READERS {
                    scope.spawn(|| unsafe {
                        for _ in 0 .. 50 {
                            match slot.load_strong() {
                                Some(strong) => {
                                    assert_eq!(strong, object);
                                    strong.release();
                                },
                                None => break,
                            }
                        }
                    });
                }
                scope.spawn(|| unsafe { object.release() });
            });

            unsafe {
                assert_eq!(slot.load_strong(), None);
                assert!(slot.is_empty());
                slot.destroy();
            }
            assert_eq!(destroyed(counter), 1);
        }
    }

    #[test]
    fn concurrent_loads_race_assign()
    {
        const ASSIGNS: usize = 2000;
        const READERS: usize = 4;

        let (first, first_counter) = new_counted();
        let (second, second_counter) = new_counted();
        let slot = WeakReference::empty();
        unsafe { slot.init(Some(first)) };

        thread::scope(|scope| {
            for _ in 0 .. READERS {
                scope.spawn(|| unsafe {
                    for _ in 0 .. ASSIGNS {
                        let loaded = slot.load_strong();
                        assert!(loaded == Some(first) || loaded == Some(second));
                        if let Some(strong) = loaded {
                            strong.release();
                        }
                    }
                });
            }
            scope.spawn(|| unsafe {
                for round in 0 .. ASSIGNS {
                    let next = if round % 2 == 0 { second } else { first };
                    slot.assign(Some(next));
                }
            });
        });

        unsafe {
            slot.destroy();
            for object in [first, second] {
                assert_eq!(object.retain_count(), 1);
                assert_eq!(object.unowned_retain_count(), 1);
                object.release();
            }
        }
        assert_eq!(destroyed(first_counter), 1);
        assert_eq!(destroyed(second_counter), 1);
    }
}
