//! Backends for the MIPS dynamic recompiler.
//!
//! Two backends implement [`IrBackend`]:
//!
//! - [`InterpreterBackend`] keeps the IR and runs it with [`run_block`].
//! - `X64Backend` (x86-64 Unix hosts) emits machine code, using a
//!   [`RegCache`] per register class to keep guest registers in host
//!   registers within a block.
//!
//! Both leave guest state in exactly the same condition after a block, so
//! the interpreter doubles as the reference the native backend is tested
//! against.

pub mod backend;
pub mod config;
pub mod error;
pub mod interp;
pub mod regcache;
#[cfg(all(target_arch = "x86_64", unix))]
pub mod x86;

pub use backend::{InterpreterBackend, IrBackend};
pub use config::{BackendKind, EmitConfig};
pub use error::{EmitError, RegCacheError};
pub use interp::{BlockExit, run_block};
pub use regcache::{CacheEmitter, Location, RegCache};
#[cfg(all(target_arch = "x86_64", unix))]
pub use x86::{ExitSite, NativeBlock, X64Backend};
