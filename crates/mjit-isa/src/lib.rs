//! MIPS (Allegrex) instruction set support.
//!
//! This crate provides decoding, disassembly, a single-step reference
//! interpreter, and the frontend that lifts guest code into IR blocks.
//! The interpreter is the fallback for anything the frontend does not
//! translate and the oracle that compiled code is tested against.

pub mod analyst;
pub mod asm;
mod decode;
mod disasm;
pub mod emuhack;
mod error;
mod fields;
pub mod interp;
pub mod lift;

pub use analyst::{DelaySlotKind, classify_delay_slot};
pub use decode::*;
pub use disasm::disasm;
pub use emuhack::Sentinel;
pub use error::{CompileError, DecodeError, InterpError};
pub use fields::*;
pub use interp::StepResult;
pub use lift::{
    CompileHandlers, FrontendConfig, InstructionSource, IrFrontend, IrImmRegCache, JitDisable, MemorySource,
};
