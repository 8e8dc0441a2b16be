//! Process-terminating failures.
//!
//! Nothing in this crate returns a recoverable error.
//! An operation either succeeds, does nothing, or ends the process
//! through [`crash`] with a message naming the broken invariant.
//! Violations that are too expensive to detect in release builds
//! are only checked with debug assertions.

use core::fmt;

/// A condition from which the runtime cannot recover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalError
{
    /// Size and alignment mask do not describe a valid allocation.
    InvalidLayout
    {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment mask.
        align_mask: usize,
    },

    /// A strong retain went through an unowned reference
    /// to an object that had already started deallocating.
    RetainedDeallocatedObject,

    /// A stack object still had strong references at the end of its scope.
    StackObjectEscaped,

    /// A stack object still had weak or unowned references
    /// at the end of its scope.
    WeakReferenceToStackObject,

    /// The heap was asked to free storage of a stack object.
    FreedStackObject,
}

impl fmt::Display for FatalError
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::InvalidLayout{size, align_mask} =>
                write!(f, "invalid allocation layout \
                           (size {size}, alignment mask {align_mask:#x})"),
            Self::RetainedDeallocatedObject =>
                write!(f, "attempted to retain deallocated object"),
            Self::StackObjectEscaped =>
                write!(f, "stack object escaped"),
            Self::WeakReferenceToStackObject =>
                write!(f, "weak/unowned reference to stack object"),
            Self::FreedStackObject =>
                write!(f, "attempted to free a stack-allocated object"),
        }
    }
}

/// Report the error and abort the process.
#[cold]
#[inline(never)]
pub fn crash(error: FatalError) -> !
{
    log::error!("fatal error: {}", error);
    eprintln!("fatal error: {}", error);
    std::process::abort()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn messages()
    {
        assert_eq!(
            FatalError::RetainedDeallocatedObject.to_string(),
            "attempted to retain deallocated object",
        );
        assert_eq!(
            FatalError::InvalidLayout{size: 24, align_mask: 6}.to_string(),
            "invalid allocation layout (size 24, alignment mask 0x6)",
        );
    }
}
