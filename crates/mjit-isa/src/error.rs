//! Error types.

use thiserror::Error;

/// Opcode fetch/decode error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot fetch opcode at {0:#010x}")]
    Fetch(u32),

    #[error("unresolved sentinel {op:#010x} at {addr:#010x}")]
    StaleSentinel { addr: u32, op: u32 },
}

/// Frontend compile error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("block start {0:#010x} is not a valid code address")]
    BadStart(u32),
}

/// Reference interpreter fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("unimplemented opcode {op:#010x} at {pc:#010x}")]
    Unimplemented { pc: u32, op: u32 },

    #[error("invalid opcode {op:#010x} at {pc:#010x}")]
    Invalid { pc: u32, op: u32 },

    #[error("cannot fetch opcode at {0:#010x}")]
    Fetch(u32),
}

impl InterpError {
    /// Faulting guest address.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        match self {
            Self::Unimplemented { pc, .. } | Self::Invalid { pc, .. } | Self::Fetch(pc) => *pc,
        }
    }
}
