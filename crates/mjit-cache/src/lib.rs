//! Translated block cache for the MIPS dynamic recompiler.
//!
//! [`BlockCache`] owns every translated block and keeps guest memory in
//! step with it: finalizing a block writes a sentinel over its first opcode
//! and marks its code pages, invalidation restores the opcode and unlinks
//! any exits that jump into the block. The cache is generic over the
//! compiled target so the IR interpreter and the native backend share it.

mod block;
mod cache;
mod config;
mod error;
mod link;
mod stats;

pub use block::{Block, BlockCounters, BlockExitLink, BlockId, BlockShape, BlockState};
pub use cache::BlockCache;
pub use config::{CacheConfig, DEFAULT_MAX_BLOCKS};
pub use error::CacheError;
pub use link::{BlockLinker, NoLink};
pub use stats::{BlockDebugInfo, CacheStats};
