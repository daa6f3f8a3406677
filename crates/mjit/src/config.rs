//! Recompiler configuration.

use mjit_cache::CacheConfig;
use mjit_emit::{BackendKind, EmitConfig};
use mjit_isa::{FrontendConfig, JitDisable};
use mjit_state::{DEFAULT_MEMORY_BASE, DEFAULT_MEMORY_SIZE};

/// Everything needed to build a [`crate::Jit`].
#[derive(Clone, Debug)]
pub struct JitConfig {
    pub frontend: FrontendConfig,
    pub emit: EmitConfig,
    pub cache: CacheConfig,
    pub backend: BackendKind,
    /// Count runs and cycles per block.
    pub profile: bool,
    /// Lowest guest address.
    pub memory_base: u32,
    /// Guest memory size in bytes (power of two).
    pub memory_size: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        let backend = if BackendKind::X64.is_supported() {
            BackendKind::X64
        } else {
            BackendKind::Interpreter
        };
        Self {
            frontend: FrontendConfig::default(),
            emit: EmitConfig::default(),
            cache: CacheConfig::default(),
            backend,
            profile: false,
            memory_base: DEFAULT_MEMORY_BASE,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

impl JitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_frontend(mut self, frontend: FrontendConfig) -> Self {
        self.frontend = frontend;
        self
    }

    #[must_use]
    pub fn with_emit(mut self, emit: EmitConfig) -> Self {
        self.emit = emit;
        self
    }

    #[must_use]
    pub const fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Shorthand for `frontend.disable`.
    #[must_use]
    pub const fn with_disable(mut self, disable: JitDisable) -> Self {
        self.frontend.disable = disable;
        self
    }

    #[must_use]
    pub const fn with_max_block_instructions(mut self, n: u32) -> Self {
        self.frontend.max_block_instructions = n;
        self
    }

    #[must_use]
    pub const fn with_max_blocks(mut self, n: u32) -> Self {
        self.cache.max_blocks = n;
        self
    }

    #[must_use]
    pub const fn with_linking(mut self, enabled: bool) -> Self {
        self.cache.enable_linking = enabled;
        self
    }

    #[must_use]
    pub const fn with_profile(mut self, enabled: bool) -> Self {
        self.profile = enabled;
        self
    }

    #[must_use]
    pub const fn with_memory(mut self, base: u32, size: usize) -> Self {
        self.memory_base = base;
        self.memory_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backend_runs_on_host() {
        assert!(JitConfig::default().backend.is_supported());
    }

    #[test]
    fn test_builders_reach_nested_configs() {
        let config = JitConfig::new()
            .with_backend(BackendKind::Interpreter)
            .with_disable(JitDisable::FPU | JitDisable::LSU)
            .with_max_block_instructions(16)
            .with_max_blocks(8)
            .with_linking(false)
            .with_profile(true)
            .with_memory(0x1000_0000, 1 << 20);
        assert_eq!(config.backend, BackendKind::Interpreter);
        assert!(config.frontend.disable.contains(JitDisable::FPU));
        assert!(config.frontend.disable.contains(JitDisable::LSU));
        assert_eq!(config.frontend.max_block_instructions, 16);
        assert_eq!(config.cache.max_blocks, 8);
        assert!(!config.cache.enable_linking);
        assert!(config.profile);
        assert_eq!((config.memory_base, config.memory_size), (0x1000_0000, 1 << 20));
    }
}
