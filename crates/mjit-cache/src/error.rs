//! Error types.

use mjit_state::MemoryError;
use thiserror::Error;

use crate::block::{BlockId, BlockState};

/// Block cache error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No block ids left; the cache must be cleared.
    #[error("block cache full ({max} blocks)")]
    Full { max: u32 },

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("block {id} is {state:?}, expected {expected:?}")]
    BadState {
        id: BlockId,
        state: BlockState,
        expected: BlockState,
    },

    #[error("saved sentinel table has {got} entries, cache has {expected} blocks")]
    SentinelCount { expected: usize, got: usize },

    #[error("exit patching failed: {0}")]
    Link(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl CacheError {
    /// Whether clearing the cache and retrying can succeed.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}
