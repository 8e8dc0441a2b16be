use crate::fatal::FatalError;
use crate::fatal::crash;
use super::UnsafeHandle;
use super::alloc::free_object;

/// Methods for unowned references.
///
/// An unowned reference owns a unit of the weak count.
/// It keeps the storage of the object alive but not the object itself,
/// and it is a fatal error to go from a dead object back to a strong reference.
impl UnsafeHandle
{
    /// Take `n` more unowned references.
    ///
    /// # Safety
    ///
    /// The caller must own a strong or unowned reference to the object.
    #[inline]
    pub unsafe fn unowned_retain(self, n: u32)
    {
        self.header().weak_ref_count.increment(n);
    }

    /// Give up `n` unowned references,
    /// freeing the storage if nothing else refers to the object.
    ///
    /// # Safety
    ///
    /// The caller must own `n` unowned references to the object.
    #[inline]
    pub unsafe fn unowned_release(self, n: u32)
    {
        if self.header().weak_ref_count.decrement_should_deallocate(n) {
            self.free_after_weak_release();
        }
    }

    /// Take a strong reference through an unowned reference.
    ///
    /// Ends the process if the object is already deallocating.
    ///
    /// # Safety
    ///
    /// The caller must own an unowned reference to the object.
    #[inline]
    pub unsafe fn unowned_retain_strong(self)
    {
        debug_assert!(
            self.header().weak_ref_count.count() != 0,
            "object is not currently weakly retained",
        );
        if !self.header().ref_count.try_increment() {
            crash(FatalError::RetainedDeallocatedObject);
        }
    }

    /// Trade an unowned reference for a strong reference.
    ///
    /// Ends the process if the object is already deallocating.
    ///
    /// # Safety
    ///
    /// The caller must own an unowned reference to the object.
    #[inline]
    pub unsafe fn unowned_retain_strong_and_release(self)
    {
        self.unowned_retain_strong();

        // The strong reference just taken holds the weak unit,
        // so this decrement cannot reach zero.
        let free = self.header().weak_ref_count.decrement_should_deallocate(1);
        debug_assert!(!free, "retain-strong-and-release freed the object");
    }

    /// End the process if the object is deallocating.
    ///
    /// # Safety
    ///
    /// The caller must own an unowned reference to the object.
    #[inline]
    pub unsafe fn unowned_check(self)
    {
        debug_assert!(
            self.header().weak_ref_count.count() != 0,
            "object is not currently weakly retained",
        );
        if self.header().ref_count.is_deallocating() {
            crash(FatalError::RetainedDeallocatedObject);
        }
    }

    /// The weak count of the object,
    /// including the unit held on behalf of strong references.
    ///
    /// # Safety
    ///
    /// The storage of the object must not be freed.
    #[inline]
    pub unsafe fn unowned_retain_count(self) -> usize
    {
        self.header().weak_ref_count.count() as usize
    }

    #[cold]
    #[inline(never)]
    unsafe fn free_after_weak_release(self)
    {
        let metadata = self.metadata();
        debug_assert!(self.is_deallocating(), "weak count of a live object reached zero");
        if self.header().weak_ref_count.is_stack_allocated() {
            crash(FatalError::FreedStackObject);
        }
        free_object(self, metadata.instance_size, metadata.instance_align_mask);
    }
}
