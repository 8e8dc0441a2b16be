use super::UnsafeHandle;
use super::dealloc_object;

use scopeguard::defer;

/// Methods for strong references.
///
/// Every method has the same safety requirement:
/// the handle must point to an object whose storage is not yet freed,
/// and except for [`try_retain`][`Self::try_retain`] and
/// [`is_deallocating`][`Self::is_deallocating`],
/// the caller must own a strong reference to it.
/// Methods ending in `_non_atomic` additionally require that
/// no other thread touches the object's counts concurrently.
impl UnsafeHandle
{
    /// Take one more strong reference.
    #[inline]
    pub unsafe fn retain(self)
    {
        self.header().ref_count.increment(1);
    }

    /// Take `n` more strong references at once.
    #[inline]
    pub unsafe fn retain_n(self, n: u32)
    {
        self.header().ref_count.increment(n);
    }

    /// Take one more strong reference, without atomicity.
    #[inline]
    pub unsafe fn retain_non_atomic(self)
    {
        self.header().ref_count.increment_non_atomic(1);
    }

    /// Take `n` more strong references at once, without atomicity.
    #[inline]
    pub unsafe fn retain_n_non_atomic(self, n: u32)
    {
        self.header().ref_count.increment_non_atomic(n);
    }

    /// Give up one strong reference,
    /// destroying the object if it was the last.
    #[inline]
    pub unsafe fn release(self)
    {
        if self.header().ref_count.decrement_should_deallocate(1) {
            self.release_dealloc();
        }
    }

    /// Give up `n` strong references at once,
    /// destroying the object if they were the last.
    #[inline]
    pub unsafe fn release_n(self, n: u32)
    {
        if self.header().ref_count.decrement_should_deallocate(n) {
            self.release_dealloc();
        }
    }

    /// Give up one strong reference, without atomicity.
    #[inline]
    pub unsafe fn release_non_atomic(self)
    {
        if self.header().ref_count.decrement_should_deallocate_non_atomic(1) {
            self.release_dealloc();
        }
    }

    /// Give up `n` strong references at once, without atomicity.
    #[inline]
    pub unsafe fn release_n_non_atomic(self, n: u32)
    {
        if self.header().ref_count.decrement_should_deallocate_non_atomic(n) {
            self.release_dealloc();
        }
    }

    /// Take a strong reference unless the object is deallocating.
    ///
    /// The caller only needs to keep the storage alive,
    /// for example through a weak or unowned reference.
    #[inline]
    pub unsafe fn try_retain(self) -> Option<Self>
    {
        if self.header().ref_count.try_increment() {
            Some(self)
        } else {
            None
        }
    }

    /// Pin the object and take a strong reference for the pin.
    ///
    /// Returns [`None`] if the object is already pinned,
    /// in which case nothing changes.
    /// Otherwise the caller must later call [`unpin`][`Self::unpin`].
    #[inline]
    pub unsafe fn try_pin(self) -> Option<Self>
    {
        if self.header().ref_count.try_increment_and_pin() {
            Some(self)
        } else {
            None
        }
    }

    /// Like [`try_pin`][`Self::try_pin`], but without atomicity.
    #[inline]
    pub unsafe fn try_pin_non_atomic(self) -> Option<Self>
    {
        if self.header().ref_count.try_increment_and_pin_non_atomic() {
            Some(self)
        } else {
            None
        }
    }

    /// Clear the pin and give up the strong reference taken for it,
    /// destroying the object if it was the last.
    #[inline]
    pub unsafe fn unpin(self)
    {
        if self.header().ref_count.decrement_and_unpin_should_deallocate() {
            self.release_dealloc();
        }
    }

    /// Like [`unpin`][`Self::unpin`], but without atomicity.
    #[inline]
    pub unsafe fn unpin_non_atomic(self)
    {
        if self.header().ref_count.decrement_and_unpin_should_deallocate_non_atomic() {
            self.release_dealloc();
        }
    }

    /// Run `then` while the object is pinned.
    ///
    /// If the object is already pinned, `then` is not called
    /// and this method returns [`None`].
    /// Otherwise the object is unpinned once `then` returns or panics.
    pub unsafe fn with_pin<F, R>(self, then: F) -> Option<R>
        where F: FnOnce(Self) -> R
    {
        let pinned = self.try_pin()?;
        defer! { pinned.unpin(); }
        Some(then(pinned))
    }

    /// Mark the object deallocating without destroying it.
    ///
    /// The caller must hold the only strong reference,
    /// and becomes responsible for destroying and freeing the object.
    #[inline]
    pub unsafe fn set_deallocating(self)
    {
        self.header().ref_count.decrement_from_one_and_deallocate_non_atomic();
    }

    /// Whether the strong count of the object has reached zero.
    #[inline]
    pub unsafe fn is_deallocating(self) -> bool
    {
        self.header().ref_count.is_deallocating()
    }

    /// The number of strong references to the object.
    #[inline]
    pub unsafe fn retain_count(self) -> usize
    {
        self.header().ref_count.count() as usize
    }

    /// Destroy the contents of a deallocating object,
    /// then give up its weak unit.
    ///
    /// # Safety
    ///
    /// The object must have just become deallocating,
    /// and its contents must not have been destroyed yet.
    #[cold]
    #[inline(never)]
    pub unsafe fn release_dealloc(self)
    {
        let metadata = self.metadata();
        (metadata.destroy)(self);
        dealloc_object(self, metadata.instance_size, metadata.instance_align_mask);
    }
}
