//! Exit patching.

use crate::error::CacheError;

/// Patches compiled exits so one block jumps straight into another.
///
/// `exit` indexes the `exits` list the block was finalized with.
pub trait BlockLinker<T> {
    /// Whether this linker patches anything at all.
    fn can_link(&self) -> bool {
        true
    }

    /// Aim exit `exit` of `source` at `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit cannot be patched.
    fn link_exit(&mut self, source: &T, exit: usize, dest: &T) -> Result<(), CacheError>;

    /// Send exit `exit` of `source` back through the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit cannot be patched.
    fn unlink_exit(&mut self, source: &T, exit: usize) -> Result<(), CacheError>;
}

/// Linker for targets that cannot be linked. Exits stay on the dispatcher
/// path.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLink;

impl<T> BlockLinker<T> for NoLink {
    fn can_link(&self) -> bool {
        false
    }

    fn link_exit(&mut self, _: &T, _: usize, _: &T) -> Result<(), CacheError> {
        Ok(())
    }

    fn unlink_exit(&mut self, _: &T, _: usize) -> Result<(), CacheError> {
        Ok(())
    }
}
