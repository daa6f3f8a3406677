//! Cache configuration.

use mjit_isa::emuhack::MAX_SENTINEL_ID;

/// Default number of block ids before the cache must be cleared.
pub const DEFAULT_MAX_BLOCKS: u32 = 1 << 16;

/// Block cache configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Block ids available between clears. Capped at what a sentinel can
    /// encode.
    pub max_blocks: u32,
    /// Patch constant exits to jump straight into their target block.
    pub enable_linking: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
            enable_linking: true,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_blocks(mut self, max_blocks: u32) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    #[must_use]
    pub const fn with_linking(mut self, enabled: bool) -> Self {
        self.enable_linking = enabled;
        self
    }

    /// Usable block ids.
    #[must_use]
    pub const fn block_limit(&self) -> u32 {
        if self.max_blocks < MAX_SENTINEL_ID {
            self.max_blocks
        } else {
            MAX_SENTINEL_ID
        }
    }
}
