//! MIPS (Allegrex) dynamic recompiler.
//!
//! [`Jit`] ties the pieces together: the frontend lifts guest code at PC
//! into an IR block, the configured backend compiles it (x86-64 machine
//! code or interpreted IR), and the block cache installs it by writing a
//! sentinel opcode over the block's first instruction. The run loop then
//! dispatches block to block until the cycle budget runs out or something
//! needs the host's attention.
//!
//! ```no_run
//! use mjit::{Jit, JitConfig, RunExit};
//! use mjit_isa::asm;
//!
//! let mut jit = Jit::new(JitConfig::default())?;
//! let base = jit.config().memory_base;
//! let program = [asm::addiu(2, 0, 42), asm::syscall(0)];
//! jit.write_memory(base, &asm::to_bytes(&program))?;
//! assert_eq!(jit.run(1000)?, RunExit::Syscall(0));
//! assert_eq!(jit.state().gpr(2), 42);
//! # Ok::<(), mjit::Error>(())
//! ```

pub mod code;
pub mod config;
pub mod error;
pub mod jit;
pub mod metrics;
pub mod savestate;
pub mod syscall;

pub use code::{CompiledCode, Engine};
pub use config::JitConfig;
pub use error::{Error, GuestFault, Result, RunExit};
pub use jit::{BlockInfo, Jit, StopHandle};
pub use syscall::{SyscallAction, SyscallContext, SyscallHandler};

pub use mjit_cache::{BlockDebugInfo, BlockId, BlockState, CacheConfig, CacheStats};
pub use mjit_emit::{BackendKind, BlockExit, EmitConfig};
pub use mjit_isa::{FrontendConfig, JitDisable};
pub use mjit_state::{GuestMemory, GuestState};
