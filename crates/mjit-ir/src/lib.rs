//! Intermediate representation for the MIPS dynamic recompiler.
//!
//! This crate provides pure IR types with no MIPS-specific decoding knowledge.
//! Lifting guest instructions into IR is implemented in `mjit-isa`, and
//! executing or compiling IR is implemented in `mjit-emit`.
//!
//! Every IR instruction is a fixed-width word (`IrInst`): an opcode, three
//! 8-bit register operands and a 32-bit constant. Register operands index the
//! guest register file directly (see [`reg`]).

mod analysis;
mod block;
mod disasm;
mod error;
mod inst;
mod op;
pub mod reg;
mod writer;

pub use analysis::*;
pub use block::*;
pub use disasm::*;
pub use error::IrError;
pub use inst::*;
pub use op::*;
pub use reg::{IrReg, RegClass};
pub use writer::*;
