//! Guest machine state for the MIPS dynamic recompiler.
//!
//! This crate provides the `GuestState` register file, laid out so native
//! code can address it through a single base register, and `GuestMemory`,
//! an mmap-backed flat guest address space that also carries the code-page
//! map used to detect self-modifying code.

mod fpu;
mod memory;
mod state;

pub use fpu::{HostRoundingGuard, RoundingMode, apply_host_rounding, host_rounding_bits, round_to_i32};
pub use memory::{
    CODE_PAGE_CODE, CODE_PAGE_DIRTY, CODE_PAGE_SHIFT, CODE_PAGE_SIZE, DEFAULT_MEMORY_BASE, DEFAULT_MEMORY_SIZE, GUARD_SIZE, GuestMemory,
    MemoryError,
};
pub use state::{DIRTY_OVERFLOW, DIRTY_RANGE_SLOTS, ExitReason, GuestState};
