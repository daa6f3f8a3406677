use mjit_cache::{BlockId, CacheError};
use mjit_emit::EmitError;
use mjit_isa::{CompileError, InterpError};
use mjit_state::MemoryError;
use thiserror::Error;

/// Recompiler errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("block cache: {0}")]
    Cache(#[from] CacheError),
    #[error("frontend: {0}")]
    Compile(#[from] CompileError),
    #[error("backend: {0}")]
    Emit(#[from] EmitError),
    #[error("guest memory: {0}")]
    Memory(#[from] MemoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block {0} has no compiled code")]
    NotCompiled(BlockId),
    #[error("save state: {0}")]
    State(String),
}

impl Error {
    /// Whether clearing the cache and retrying can succeed.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        match self {
            Self::Cache(e) => e.is_full(),
            Self::Emit(e) => e.is_full(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A guest-visible fault that ends a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestFault {
    /// Control reached an address that cannot hold code. `pc` is left at
    /// the target.
    #[error("invalid jump to {pc:#010x} from block at {from_block:#010x}")]
    InvalidJump { pc: u32, from_block: u32 },
    #[error("break {code:#x} at {pc:#010x}")]
    Break { pc: u32, code: u32 },
    #[error(transparent)]
    Interp(#[from] InterpError),
}

/// Why [`crate::Jit::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// The cycle budget ran out.
    OutOfCycles,
    /// The stop handle fired or a syscall handler asked to stop.
    Stopped,
    /// PC reached a breakpoint. Running again resumes past it.
    Breakpoint(u32),
    /// A syscall with no handler installed. PC is the return address.
    Syscall(u32),
    Fault(GuestFault),
}
