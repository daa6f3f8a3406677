//! Error types.

use mjit_ir::{IrOp, IrReg};
use thiserror::Error;

/// Register cache error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegCacheError {
    /// Every host register is spill-locked or static.
    #[error("out of spillable {class} registers at IR index {ir_index}")]
    Exhausted { class: &'static str, ir_index: usize },

    #[error("cannot set r0 to {0:#x}")]
    ZeroImm(u32),

    #[error("register {0} is not in this cache's class")]
    WrongClass(IrReg),

    #[error("host pointers need guest memory covering the full address space")]
    PointerifyDisabled,
}

/// Backend compile error.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    RegCache(#[from] RegCacheError),

    #[error("code space full: {needed} bytes requested, {free} free")]
    CodeSpaceFull { needed: usize, free: usize },

    #[error("code space mapping failed: {0}")]
    Mmap(#[from] nix::Error),

    #[error("jump displacement out of range")]
    JumpRange,

    #[error("label {0} used but never bound")]
    UnboundLabel(usize),

    #[error("{0:?} cannot be compiled by this backend")]
    Unsupported(IrOp),

    #[error("backend is not available on this host")]
    HostUnsupported,
}

impl EmitError {
    /// Whether clearing the code space and retrying can succeed.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::CodeSpaceFull { .. })
    }
}
