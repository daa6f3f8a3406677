//! Guest register file.
//!
//! Native blocks keep a pointer to this struct in a reserved host register
//! and address every field by constant offset, so the layout is fixed.

use std::ffi::c_void;

use mjit_ir::reg::{IR_REG_COUNT, IRREG_FCR31, IRREG_FPCOND, IRREG_FPR_BASE, IRREG_HI, IRREG_LO, IrReg};

/// Dirty-code ranges tracked individually before guest stores fall back to
/// per-page dirty bits in the code-page map.
pub const DIRTY_RANGE_SLOTS: usize = 8;

/// `dirty_count` value once the range list has overflowed.
pub const DIRTY_OVERFLOW: u32 = DIRTY_RANGE_SLOTS as u32 + 1;

/// Why a block returned to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ExitReason {
    /// Normal exit; `pc` holds the next guest address.
    None = 0,
    /// Guest `syscall`; `exit_arg` holds the code, `pc` the return address.
    Syscall = 1,
    /// Guest `break`; `exit_arg` holds the code.
    Break = 2,
    /// A fallback instruction faulted; `exit_arg` holds the opcode.
    Fault = 3,
}

impl ExitReason {
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Syscall,
            2 => Self::Break,
            3 => Self::Fault,
            _ => Self::None,
        }
    }
}

/// Guest machine state.
///
/// # Layout
///
/// ```text
/// offset 0:    membase (*mut u8)
/// offset 8:    code_pages (*mut u8)
/// offset 16:   host (*mut c_void)
/// offset 24:   regs[128] (LO at 152, 8-byte aligned)
/// offset 536:  pc
/// offset 540:  downcount
/// offset 544:  mem_mask
/// offset 548:  mem_base
/// offset 552:  stop
/// offset 556:  exit_reason
/// offset 560:  exit_arg
/// offset 564:  dirty_count
/// offset 568:  dirty_ranges[8] ([lo, hi) pairs)
/// offset 632:  interrupt_pending (u8)
/// offset 633:  in_delay_slot (u8)
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct GuestState {
    /// Host address of guest memory offset 0.
    pub membase: *mut u8,
    /// Code-page map, one byte per 1 KiB page of guest memory.
    pub code_pages: *mut u8,
    /// Opaque pointer handed to native helper calls.
    pub host: *mut c_void,

    /// Register file, indexed by IR register number.
    pub regs: [u32; IR_REG_COUNT],

    pub pc: u32,
    /// Remaining cycle budget. Blocks run while it is non-negative.
    pub downcount: i32,

    /// Guest address to memory offset mask.
    pub mem_mask: u32,
    /// Lowest valid guest address.
    pub mem_base: u32,

    /// Nonzero asks linked blocks to return to the dispatcher.
    pub stop: u32,
    pub exit_reason: u32,
    pub exit_arg: u32,

    /// Entries used in `dirty_ranges`, or [`DIRTY_OVERFLOW`].
    pub dirty_count: u32,
    /// Memory offsets of code written by guest stores, `[lo, hi)` each.
    pub dirty_ranges: [[u32; 2]; DIRTY_RANGE_SLOTS],

    pub interrupt_pending: u8,
    pub in_delay_slot: u8,
    _pad: [u8; 2],
}

impl GuestState {
    /// Create a zeroed state, not yet attached to memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            membase: std::ptr::null_mut(),
            code_pages: std::ptr::null_mut(),
            host: std::ptr::null_mut(),
            regs: [0; IR_REG_COUNT],
            pc: 0,
            downcount: 0,
            mem_mask: 0,
            mem_base: 0,
            stop: 0,
            exit_reason: 0,
            exit_arg: 0,
            dirty_count: 0,
            dirty_ranges: [[0; 2]; DIRTY_RANGE_SLOTS],
            interrupt_pending: 0,
            in_delay_slot: 0,
            _pad: [0; 2],
        }
    }

    /// Clear registers and run bookkeeping. Memory attachment is kept.
    pub fn reset(&mut self) {
        self.regs = [0; IR_REG_COUNT];
        self.pc = 0;
        self.downcount = 0;
        self.stop = 0;
        self.clear_exit();
        self.dirty_count = 0;
        self.interrupt_pending = 0;
        self.in_delay_slot = 0;
    }

    /// Byte offset of an IR register inside the struct.
    #[must_use]
    pub const fn reg_offset(reg: IrReg) -> i32 {
        (std::mem::offset_of!(Self, regs) + reg as usize * 4) as i32
    }

    /// Byte offset of a named field, for native code generation.
    #[must_use]
    pub const fn pc_offset() -> i32 {
        std::mem::offset_of!(Self, pc) as i32
    }

    #[must_use]
    pub const fn downcount_offset() -> i32 {
        std::mem::offset_of!(Self, downcount) as i32
    }

    #[must_use]
    pub const fn stop_offset() -> i32 {
        std::mem::offset_of!(Self, stop) as i32
    }

    #[must_use]
    pub const fn exit_reason_offset() -> i32 {
        std::mem::offset_of!(Self, exit_reason) as i32
    }

    #[must_use]
    pub const fn exit_arg_offset() -> i32 {
        std::mem::offset_of!(Self, exit_arg) as i32
    }

    #[must_use]
    pub const fn dirty_count_offset() -> i32 {
        std::mem::offset_of!(Self, dirty_count) as i32
    }

    /// Offset of `dirty_ranges[0][0]`; entry `i` is 8 bytes further per index.
    #[must_use]
    pub const fn dirty_ranges_offset() -> i32 {
        std::mem::offset_of!(Self, dirty_ranges) as i32
    }

    #[must_use]
    pub const fn membase_offset() -> i32 {
        std::mem::offset_of!(Self, membase) as i32
    }

    #[must_use]
    pub const fn code_pages_offset() -> i32 {
        std::mem::offset_of!(Self, code_pages) as i32
    }

    #[must_use]
    pub const fn mem_mask_offset() -> i32 {
        std::mem::offset_of!(Self, mem_mask) as i32
    }

    /// Read a GPR. `r0` is always zero.
    #[must_use]
    pub const fn gpr(&self, idx: usize) -> u32 {
        if idx == 0 { 0 } else { self.regs[idx & 0x1F] }
    }

    /// Write a GPR. Writes to `r0` are dropped.
    pub const fn set_gpr(&mut self, idx: usize, value: u32) {
        if idx & 0x1F != 0 {
            self.regs[idx & 0x1F] = value;
        }
    }

    /// Read any IR register.
    #[must_use]
    pub const fn reg(&self, reg: IrReg) -> u32 {
        self.regs[reg as usize]
    }

    /// Write any IR register. Writes to `r0` are dropped.
    pub const fn set_reg(&mut self, reg: IrReg, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = value;
        }
    }

    #[must_use]
    pub const fn lo(&self) -> u32 {
        self.regs[IRREG_LO as usize]
    }

    #[must_use]
    pub const fn hi(&self) -> u32 {
        self.regs[IRREG_HI as usize]
    }

    /// HI:LO as one 64-bit value.
    #[must_use]
    pub const fn hilo(&self) -> u64 {
        ((self.hi() as u64) << 32) | self.lo() as u64
    }

    pub const fn set_hilo(&mut self, value: u64) {
        self.regs[IRREG_LO as usize] = value as u32;
        self.regs[IRREG_HI as usize] = (value >> 32) as u32;
    }

    /// Raw bits of FPR `n`.
    #[must_use]
    pub const fn fpr_bits(&self, n: usize) -> u32 {
        self.regs[IRREG_FPR_BASE as usize + (n & 0x1F)]
    }

    #[must_use]
    pub fn fpr(&self, n: usize) -> f32 {
        f32::from_bits(self.fpr_bits(n))
    }

    pub const fn set_fpr_bits(&mut self, n: usize, bits: u32) {
        self.regs[IRREG_FPR_BASE as usize + (n & 0x1F)] = bits;
    }

    pub fn set_fpr(&mut self, n: usize, value: f32) {
        self.set_fpr_bits(n, value.to_bits());
    }

    #[must_use]
    pub const fn fpcond(&self) -> bool {
        self.regs[IRREG_FPCOND as usize] != 0
    }

    /// FCR31 without the condition bit.
    #[must_use]
    pub const fn fcr31(&self) -> u32 {
        self.regs[IRREG_FCR31 as usize]
    }

    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    pub const fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    #[must_use]
    pub const fn exit_reason(&self) -> ExitReason {
        ExitReason::from_u32(self.exit_reason)
    }

    pub const fn clear_exit(&mut self) {
        self.exit_reason = 0;
        self.exit_arg = 0;
    }

    /// Record a guest write to code at memory offset `[lo, hi)` and ask the
    /// running chain to stop.
    ///
    /// A write touching the newest entry widens it. Returns `false` once the
    /// list is full; the caller must then mark the page dirty instead.
    pub fn note_code_write(&mut self, lo: u32, hi: u32) -> bool {
        self.stop = 1;
        let n = self.dirty_count as usize;
        if n > DIRTY_RANGE_SLOTS {
            return false;
        }
        if n > 0 {
            let last = &mut self.dirty_ranges[n - 1];
            if lo <= last[1] && hi >= last[0] {
                last[0] = last[0].min(lo);
                last[1] = last[1].max(hi);
                return true;
            }
        }
        if n == DIRTY_RANGE_SLOTS {
            self.dirty_count = DIRTY_OVERFLOW;
            return false;
        }
        self.dirty_ranges[n] = [lo, hi];
        self.dirty_count += 1;
        true
    }

    /// Recorded dirty ranges as memory offsets.
    #[must_use]
    pub fn dirty_ranges(&self) -> &[[u32; 2]] {
        let n = (self.dirty_count as usize).min(DIRTY_RANGE_SLOTS);
        &self.dirty_ranges[..n]
    }

    /// Whether stores stopped fitting the range list.
    #[must_use]
    pub const fn dirty_overflowed(&self) -> bool {
        self.dirty_count == DIRTY_OVERFLOW
    }

    /// Get state as a void pointer (for native calls).
    pub const fn as_mut_ptr(&mut self) -> *mut Self {
        self as *mut Self
    }
}

impl Default for GuestState {
    fn default() -> Self {
        Self::new()
    }
}

// The raw pointers refer to memory owned by the same execution context.
unsafe impl Send for GuestState {}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;
    use std::mem::size_of;

    #[test]
    fn test_guest_state_layout() {
        assert_eq!(offset_of!(GuestState, membase), 0);
        assert_eq!(offset_of!(GuestState, code_pages), 8);
        assert_eq!(offset_of!(GuestState, host), 16);
        assert_eq!(offset_of!(GuestState, regs), 24);
        assert_eq!(offset_of!(GuestState, pc), 24 + 128 * 4); // 536
        assert_eq!(offset_of!(GuestState, downcount), 540);
        assert_eq!(offset_of!(GuestState, mem_mask), 544);
        assert_eq!(offset_of!(GuestState, mem_base), 548);
        assert_eq!(offset_of!(GuestState, stop), 552);
        assert_eq!(offset_of!(GuestState, exit_reason), 556);
        assert_eq!(offset_of!(GuestState, exit_arg), 560);
        assert_eq!(offset_of!(GuestState, dirty_count), 564);
        assert_eq!(offset_of!(GuestState, dirty_ranges), 568);
        assert_eq!(offset_of!(GuestState, interrupt_pending), 632);
        assert_eq!(offset_of!(GuestState, in_delay_slot), 633);
        assert_eq!(size_of::<GuestState>(), 640);
    }

    #[test]
    fn test_lo_is_8_byte_aligned() {
        assert_eq!(GuestState::reg_offset(IRREG_LO) % 8, 0);
        assert_eq!(GuestState::reg_offset(IRREG_HI), GuestState::reg_offset(IRREG_LO) + 4);
        assert_eq!(GuestState::pc_offset(), 536);
    }

    #[test]
    fn test_r0_is_hardwired() {
        let mut state = GuestState::new();
        state.set_gpr(0, 5);
        state.set_reg(0, 5);
        assert_eq!(state.gpr(0), 0);
        state.set_gpr(3, 7);
        assert_eq!(state.gpr(3), 7);
    }

    #[test]
    fn test_hilo_pair() {
        let mut state = GuestState::new();
        state.set_hilo(0x1234_5678_9ABC_DEF0);
        assert_eq!(state.lo(), 0x9ABC_DEF0);
        assert_eq!(state.hi(), 0x1234_5678);
        assert_eq!(state.hilo(), 0x1234_5678_9ABC_DEF0);
    }

    #[test]
    fn test_dirty_code_ranges_kept_apart() {
        let mut state = GuestState::new();
        assert!(state.dirty_ranges().is_empty());
        assert!(state.note_code_write(0x104, 0x108));
        assert!(state.note_code_write(0x100, 0x104));
        assert!(state.note_code_write(0x300, 0x304));
        assert_eq!(state.stop, 1);
        assert_eq!(state.dirty_ranges(), &[[0x100, 0x108], [0x300, 0x304]]);
        assert!(!state.dirty_overflowed());
    }

    #[test]
    fn test_dirty_code_overflow() {
        let mut state = GuestState::new();
        for i in 0..DIRTY_RANGE_SLOTS as u32 {
            assert!(state.note_code_write(i * 0x10, i * 0x10 + 4));
        }
        // Still merges into the newest entry when full.
        assert!(state.note_code_write(0x74, 0x78));
        assert!(!state.note_code_write(0x400, 0x404));
        assert!(state.dirty_overflowed());
        assert_eq!(state.dirty_ranges().len(), DIRTY_RANGE_SLOTS);
        assert!(!state.note_code_write(0x74, 0x78));
        state.reset();
        assert!(state.dirty_ranges().is_empty());
        assert!(!state.dirty_overflowed());
    }

    #[test]
    fn test_state_reset() {
        let mut state = GuestState::new();
        state.pc = 0x40;
        state.regs[5] = 9;
        state.exit_reason = ExitReason::Syscall as u32;
        state.reset();
        assert_eq!(state.pc(), 0);
        assert_eq!(state.gpr(5), 0);
        assert_eq!(state.exit_reason(), ExitReason::None);
    }
}
