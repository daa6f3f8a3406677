//! Single-step reference interpreter.
//!
//! Executes guest instructions directly against `GuestState` and
//! `GuestMemory`. Compiled code falls back to [`execute`] for instructions
//! the frontend does not translate, and tests use [`step`] as the oracle
//! that every backend must agree with.

use mjit_ir::reg::{IRREG_FCR31, IRREG_FPCOND, IRREG_HI, IRREG_LO};
use mjit_state::{GuestMemory, GuestState, RoundingMode, round_to_i32};
use tracing::warn;

use crate::decode::{Category, Instr, MipsOp, decode};
use crate::error::InterpError;
use crate::fields::{
    branch_target, jump_target, op_fd, op_fs, op_ft, op_func, op_rd, op_rs, op_rt, op_sa, op_simm16, op_syscall_code,
    op_uimm16,
};
use crate::lift::InstructionSource;

/// FCR31 bits that are writable through `ctc1`.
pub const FCR31_MASK: u32 = 0x0181_FFFF;
/// FCR31 bit mirroring the FPU condition flag.
pub const FCR31_COND_BIT: u32 = 1 << 23;
/// Value read back from FCR0 (implementation/revision).
pub const FCR0_VALUE: u32 = 0x3351;

/// Outcome of one [`step`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// Executed normally; `pc` points at the next instruction.
    Ok,
    /// Guest syscall with this code; `pc` is already the resume address.
    Syscall(u32),
    /// Guest break with this code.
    Break(u32),
    Fault(InterpError),
}

/// Execute one instruction without control flow.
///
/// `state.pc` is only used for fault reporting; the caller advances it.
///
/// # Errors
///
/// Returns a fault for invalid or unimplemented opcodes.
#[allow(clippy::too_many_lines)]
pub fn execute(raw: u32, state: &mut GuestState, mem: &mut GuestMemory) -> Result<(), InterpError> {
    use MipsOp as M;

    let instr = decode(raw);
    let pc = state.pc;
    let rs = usize::from(op_rs(raw));
    let rt = usize::from(op_rt(raw));
    let rd = usize::from(op_rd(raw));
    let sa = u32::from(op_sa(raw));
    let s = state.gpr(rs);
    let t = state.gpr(rt);
    let simm = op_simm16(raw) as u32;
    let addr = s.wrapping_add(simm);

    match instr.op {
        M::Nop | M::Sync | M::Cache => {}

        M::Sll => state.set_gpr(rd, t << sa),
        M::Srl => state.set_gpr(rd, t >> sa),
        M::Sra => state.set_gpr(rd, ((t as i32) >> sa) as u32),
        M::Rotr => state.set_gpr(rd, t.rotate_right(sa)),
        M::Sllv => state.set_gpr(rd, t << (s & 31)),
        M::Srlv => state.set_gpr(rd, t >> (s & 31)),
        M::Srav => state.set_gpr(rd, ((t as i32) >> (s & 31)) as u32),
        M::Rotrv => state.set_gpr(rd, t.rotate_right(s & 31)),

        M::Movz => {
            if t == 0 {
                state.set_gpr(rd, s);
            }
        }
        M::Movn => {
            if t != 0 {
                state.set_gpr(rd, s);
            }
        }

        M::Mfhi => state.set_gpr(rd, state.hi()),
        M::Mflo => state.set_gpr(rd, state.lo()),
        M::Mthi => state.set_reg(IRREG_HI, s),
        M::Mtlo => state.set_reg(IRREG_LO, s),

        M::Clz => state.set_gpr(rd, s.leading_zeros()),
        M::Clo => state.set_gpr(rd, s.leading_ones()),

        M::Mult => state.set_hilo(mul_signed(s, t)),
        M::Multu => state.set_hilo(u64::from(s) * u64::from(t)),
        M::Madd => state.set_hilo(state.hilo().wrapping_add(mul_signed(s, t))),
        M::Maddu => state.set_hilo(state.hilo().wrapping_add(u64::from(s) * u64::from(t))),
        M::Msub => state.set_hilo(state.hilo().wrapping_sub(mul_signed(s, t))),
        M::Msubu => state.set_hilo(state.hilo().wrapping_sub(u64::from(s) * u64::from(t))),
        M::Div => {
            let (lo, hi) = div_signed(s, t);
            state.set_hilo((u64::from(hi) << 32) | u64::from(lo));
        }
        M::Divu => {
            let (lo, hi) = div_unsigned(s, t);
            state.set_hilo((u64::from(hi) << 32) | u64::from(lo));
        }

        M::Add | M::Addu => state.set_gpr(rd, s.wrapping_add(t)),
        M::Sub | M::Subu => state.set_gpr(rd, s.wrapping_sub(t)),
        M::And => state.set_gpr(rd, s & t),
        M::Or => state.set_gpr(rd, s | t),
        M::Xor => state.set_gpr(rd, s ^ t),
        M::Nor => state.set_gpr(rd, !(s | t)),
        M::Slt => state.set_gpr(rd, u32::from((s as i32) < (t as i32))),
        M::Sltu => state.set_gpr(rd, u32::from(s < t)),
        M::Max => state.set_gpr(rd, (s as i32).max(t as i32) as u32),
        M::Min => state.set_gpr(rd, (s as i32).min(t as i32) as u32),

        M::Addi | M::Addiu => state.set_gpr(rt, s.wrapping_add(simm)),
        M::Slti => state.set_gpr(rt, u32::from((s as i32) < (simm as i32))),
        M::Sltiu => state.set_gpr(rt, u32::from(s < simm)),
        M::Andi => state.set_gpr(rt, s & op_uimm16(raw)),
        M::Ori => state.set_gpr(rt, s | op_uimm16(raw)),
        M::Xori => state.set_gpr(rt, s ^ op_uimm16(raw)),
        M::Lui => state.set_gpr(rt, op_uimm16(raw) << 16),

        M::Ext => {
            let size = u32::from(op_rd(raw)) + 1;
            state.set_gpr(rt, (s >> sa) & low_mask(size));
        }
        M::Ins => {
            let msb = u32::from(op_rd(raw));
            if msb >= sa {
                let mask = low_mask(msb - sa + 1) << sa;
                state.set_gpr(rt, (t & !mask) | ((s << sa) & mask));
            }
        }
        M::Wsbh => state.set_gpr(rd, ((t & 0xFF00_FF00) >> 8) | ((t & 0x00FF_00FF) << 8)),
        M::Wsbw => state.set_gpr(rd, t.swap_bytes()),
        M::Seb => state.set_gpr(rd, t as u8 as i8 as i32 as u32),
        M::Seh => state.set_gpr(rd, t as u16 as i16 as i32 as u32),
        M::Bitrev => state.set_gpr(rd, t.reverse_bits()),

        M::Lb => state.set_gpr(rt, mem.load_u8(addr) as i8 as i32 as u32),
        M::Lbu => state.set_gpr(rt, u32::from(mem.load_u8(addr))),
        M::Lh => state.set_gpr(rt, mem.load_u16(addr) as i16 as i32 as u32),
        M::Lhu => state.set_gpr(rt, u32::from(mem.load_u16(addr))),
        M::Lw | M::Ll => state.set_gpr(rt, mem.load_u32(addr)),
        M::Lwl => state.set_gpr(rt, load_left(t, mem.load_u32(addr), addr)),
        M::Lwr => state.set_gpr(rt, load_right(t, mem.load_u32(addr), addr)),
        M::Sb => mem.store_u8(state, addr, t as u8),
        M::Sh => mem.store_u16(state, addr, t as u16),
        M::Sw => mem.store_u32(state, addr, t),
        M::Sc => {
            mem.store_u32(state, addr, t);
            state.set_gpr(rt, 1);
        }
        M::Swl => {
            let word = store_left(t, mem.load_u32(addr), addr);
            mem.store_u32(state, addr, word);
        }
        M::Swr => {
            let word = store_right(t, mem.load_u32(addr), addr);
            mem.store_u32(state, addr, word);
        }
        M::Lwc1 => state.set_fpr_bits(usize::from(op_ft(raw)), mem.load_u32(addr)),
        M::Swc1 => mem.store_u32(state, addr, state.fpr_bits(usize::from(op_ft(raw)))),

        M::Mfc1 => state.set_gpr(rt, state.fpr_bits(usize::from(op_fs(raw)))),
        M::Mtc1 => state.set_fpr_bits(usize::from(op_fs(raw)), t),
        M::Cfc1 => {
            let value = match op_fs(raw) {
                31 => (state.fcr31() & !FCR31_COND_BIT) | (u32::from(state.fpcond()) << 23),
                0 => FCR0_VALUE,
                _ => 0,
            };
            state.set_gpr(rt, value);
        }
        M::Ctc1 => {
            if op_fs(raw) == 31 {
                state.set_reg(IRREG_FCR31, t & FCR31_MASK);
                state.set_reg(IRREG_FPCOND, (t >> 23) & 1);
            }
        }

        M::AddS | M::SubS | M::MulS | M::DivS | M::SqrtS | M::AbsS | M::MovS | M::NegS => {
            exec_fpu_arith(instr.op, raw, state);
        }
        M::RoundWS | M::TruncWS | M::CeilWS | M::FloorWS | M::CvtWS => {
            let mode = match instr.op {
                M::RoundWS => RoundingMode::Nearest,
                M::TruncWS => RoundingMode::Zero,
                M::CeilWS => RoundingMode::PosInf,
                M::FloorWS => RoundingMode::NegInf,
                _ => RoundingMode::from_fcr31(state.fcr31()),
            };
            let v = state.fpr(usize::from(op_fs(raw)));
            state.set_fpr_bits(usize::from(op_fd(raw)), round_to_i32(v, mode) as u32);
        }
        M::CvtSW => {
            let v = state.fpr_bits(usize::from(op_fs(raw))) as i32;
            state.set_fpr(usize::from(op_fd(raw)), v as f32);
        }
        M::CmpS => {
            let a = state.fpr(usize::from(op_fs(raw)));
            let b = state.fpr(usize::from(op_ft(raw)));
            state.set_reg(IRREG_FPCOND, u32::from(fp_compare(op_func(raw) & 7, a, b)));
        }

        M::Invalid | M::Emuhack => return Err(InterpError::Invalid { pc, op: raw }),
        M::Vfpu | M::Cop0 => return Err(InterpError::Unimplemented { pc, op: raw }),

        // Control flow is handled by `step`.
        M::Syscall
        | M::Break
        | M::Jr
        | M::Jalr
        | M::J
        | M::Jal
        | M::Bltz
        | M::Bgez
        | M::Bltzl
        | M::Bgezl
        | M::Bltzal
        | M::Bgezal
        | M::Bltzall
        | M::Bgezall
        | M::Beq
        | M::Bne
        | M::Blez
        | M::Bgtz
        | M::Beql
        | M::Bnel
        | M::Blezl
        | M::Bgtzl
        | M::Bc1f
        | M::Bc1t
        | M::Bc1fl
        | M::Bc1tl => return Err(InterpError::Unimplemented { pc, op: raw }),
    }
    Ok(())
}

fn exec_fpu_arith(op: MipsOp, raw: u32, state: &mut GuestState) {
    let fs = usize::from(op_fs(raw));
    let ft = usize::from(op_ft(raw));
    let fd = usize::from(op_fd(raw));
    let a = state.fpr(fs);
    let b = state.fpr(ft);
    match op {
        MipsOp::AddS => state.set_fpr(fd, a + b),
        MipsOp::SubS => state.set_fpr(fd, a - b),
        MipsOp::MulS => state.set_fpr(fd, a * b),
        MipsOp::DivS => state.set_fpr(fd, a / b),
        MipsOp::SqrtS => state.set_fpr(fd, a.sqrt()),
        MipsOp::AbsS => state.set_fpr_bits(fd, state.fpr_bits(fs) & 0x7FFF_FFFF),
        MipsOp::NegS => state.set_fpr_bits(fd, state.fpr_bits(fs) ^ 0x8000_0000),
        _ => state.set_fpr_bits(fd, state.fpr_bits(fs)),
    }
}

/// Fault [`execute`] reports for an opcode it cannot run.
///
/// Native code only records the opcode; the dispatcher rebuilds the error
/// from it.
#[must_use]
pub fn fault_for(pc: u32, op: u32) -> InterpError {
    match decode(op).op {
        MipsOp::Invalid | MipsOp::Emuhack => InterpError::Invalid { pc, op },
        _ => InterpError::Unimplemented { pc, op },
    }
}

/// `c.cond.s` predicate. `cond` bit 0 is unordered, bit 1 equal, bit 2 less.
#[must_use]
pub fn fp_compare(cond: u32, a: f32, b: f32) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    (cond & 1 != 0 && unordered) || (cond & 2 != 0 && a == b) || (cond & 4 != 0 && a < b)
}

const fn low_mask(size: u32) -> u32 {
    if size >= 32 { u32::MAX } else { (1 << size) - 1 }
}

/// HI:LO result of a signed 32x32 multiply.
#[must_use]
pub const fn mul_signed(a: u32, b: u32) -> u64 {
    (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64
}

/// `(lo, hi)` of a signed divide, including the divide-by-zero and
/// `i32::MIN / -1` results the hardware produces.
#[must_use]
pub const fn div_signed(a: u32, b: u32) -> (u32, u32) {
    let (sa, sb) = (a as i32, b as i32);
    if sb == 0 {
        (if sa < 0 { 1 } else { u32::MAX }, a)
    } else if sa == i32::MIN && sb == -1 {
        (0x8000_0000, u32::MAX)
    } else {
        ((sa / sb) as u32, (sa % sb) as u32)
    }
}

/// `(lo, hi)` of an unsigned divide.
#[must_use]
pub const fn div_unsigned(a: u32, b: u32) -> (u32, u32) {
    if b == 0 {
        (if a <= 0xFFFF { 0xFFFF } else { u32::MAX }, a)
    } else {
        (a / b, a % b)
    }
}

/// `lwl`: merge the high bytes of the aligned word into `reg`.
#[must_use]
pub const fn load_left(reg: u32, word: u32, addr: u32) -> u32 {
    let shift = (addr & 3) * 8;
    (reg & (0x00FF_FFFF >> shift)) | (word << (24 - shift))
}

/// `lwr`: merge the low bytes of the aligned word into `reg`.
#[must_use]
pub const fn load_right(reg: u32, word: u32, addr: u32) -> u32 {
    let shift = (addr & 3) * 8;
    (reg & ((0xFFFF_FF00u64 << (24 - shift)) as u32)) | (word >> shift)
}

/// `swl`: new aligned word after storing the high bytes of `reg`.
#[must_use]
pub const fn store_left(reg: u32, word: u32, addr: u32) -> u32 {
    let shift = (addr & 3) * 8;
    (reg >> (24 - shift)) | (word & ((0xFFFF_FF00u64 << shift) as u32))
}

/// `swr`: new aligned word after storing the low bytes of `reg`.
#[must_use]
pub const fn store_right(reg: u32, word: u32, addr: u32) -> u32 {
    let shift = (addr & 3) * 8;
    (reg << shift) | (word & (0x00FF_FFFF >> (24 - shift)))
}

/// Evaluate a branch: `(taken, target)`.
fn branch_outcome(instr: &Instr, state: &GuestState, pc: u32) -> (bool, u32) {
    use MipsOp as M;
    let raw = instr.raw;
    let s = state.gpr(usize::from(op_rs(raw)));
    let t = state.gpr(usize::from(op_rt(raw)));
    let bt = branch_target(pc, raw);
    match instr.op {
        M::J | M::Jal => (true, jump_target(pc, raw)),
        M::Jr | M::Jalr => (true, s),
        M::Beq | M::Beql => (s == t, bt),
        M::Bne | M::Bnel => (s != t, bt),
        M::Blez | M::Blezl => ((s as i32) <= 0, bt),
        M::Bgtz | M::Bgtzl => ((s as i32) > 0, bt),
        M::Bltz | M::Bltzl | M::Bltzal | M::Bltzall => ((s as i32) < 0, bt),
        M::Bgez | M::Bgezl | M::Bgezal | M::Bgezall => ((s as i32) >= 0, bt),
        M::Bc1f | M::Bc1fl => (!state.fpcond(), bt),
        M::Bc1t | M::Bc1tl => (state.fpcond(), bt),
        _ => (false, pc.wrapping_add(8)),
    }
}

/// Execute one guest instruction at `state.pc`, including the delay slot of
/// a branch.
pub fn step(state: &mut GuestState, mem: &mut GuestMemory, source: &dyn InstructionSource) -> StepResult {
    let pc = state.pc;
    let Ok(raw) = source.fetch(mem, pc) else {
        return StepResult::Fault(InterpError::Fetch(pc));
    };
    let instr = decode(raw);

    if instr.has_delay_slot() {
        return step_branch(&instr, state, mem, source);
    }
    match instr.category() {
        Category::Syscall => {
            state.pc = pc.wrapping_add(4);
            StepResult::Syscall(op_syscall_code(raw))
        }
        Category::Break => StepResult::Break(op_syscall_code(raw)),
        _ => match execute(raw, state, mem) {
            Ok(()) => {
                state.pc = pc.wrapping_add(4);
                StepResult::Ok
            }
            Err(e) => StepResult::Fault(e),
        },
    }
}

fn step_branch(
    instr: &Instr,
    state: &mut GuestState,
    mem: &mut GuestMemory,
    source: &dyn InstructionSource,
) -> StepResult {
    let pc = state.pc;
    let (taken, target) = branch_outcome(instr, state, pc);
    if let Some(link) = instr.link_reg() {
        state.set_gpr(usize::from(link), pc.wrapping_add(8));
    }
    let dest = if taken { target } else { pc.wrapping_add(8) };

    if !taken && instr.is_likely() {
        state.pc = dest;
        return StepResult::Ok;
    }

    let slot_pc = pc.wrapping_add(4);
    let Ok(slot_raw) = source.fetch(mem, slot_pc) else {
        return StepResult::Fault(InterpError::Fetch(slot_pc));
    };
    let slot = decode(slot_raw);
    if slot.has_delay_slot() {
        warn!(pc = format_args!("{slot_pc:#010x}"), "branch in delay slot ignored");
    } else {
        match slot.category() {
            Category::Syscall => {
                state.pc = dest;
                return StepResult::Syscall(op_syscall_code(slot_raw));
            }
            Category::Break => {
                state.pc = dest;
                return StepResult::Break(op_syscall_code(slot_raw));
            }
            _ => {
                state.pc = slot_pc;
                state.in_delay_slot = 1;
                let result = execute(slot_raw, state, mem);
                state.in_delay_slot = 0;
                if let Err(e) = result {
                    return StepResult::Fault(e);
                }
            }
        }
    }
    state.pc = dest;
    StepResult::Ok
}

/// Step until something other than [`StepResult::Ok`] happens or
/// `max_instructions` guest instructions (delay slots included) have run.
///
/// Returns the last result and the number of instructions executed.
pub fn run(
    state: &mut GuestState,
    mem: &mut GuestMemory,
    source: &dyn InstructionSource,
    max_instructions: u64,
) -> (StepResult, u64) {
    let mut executed = 0;
    while executed < max_instructions {
        let pc = state.pc;
        let is_branch = source.fetch(mem, pc).is_ok_and(|raw| decode(raw).has_delay_slot());
        let result = step(state, mem, source);
        executed += if is_branch { 2 } else { 1 };
        if result != StepResult::Ok {
            return (result, executed);
        }
    }
    (StepResult::Ok, executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;
    use crate::lift::MemorySource;

    const BASE: u32 = 0x0800_0000;

    fn setup(program: &[u32]) -> (GuestState, GuestMemory) {
        let mut mem = GuestMemory::new(BASE, 64 * 1024).expect("allocation should succeed");
        mem.write_bytes(BASE, &asm::to_bytes(program)).expect("fits");
        let mut state = GuestState::new();
        mem.attach(&mut state);
        state.pc = BASE;
        (state, mem)
    }

    fn exec(state: &mut GuestState, mem: &mut GuestMemory, op: u32) {
        execute(op, state, mem).expect("executes");
    }

    #[test]
    fn test_alu_and_shifts() {
        let (mut s, mut m) = setup(&[]);
        s.set_gpr(1, 0xF000_000F);
        s.set_gpr(2, 4);
        exec(&mut s, &mut m, asm::addiu(3, 0, -2));
        assert_eq!(s.gpr(3), 0xFFFF_FFFE);
        exec(&mut s, &mut m, asm::sra(4, 1, 4));
        assert_eq!(s.gpr(4), 0xFF00_0000);
        exec(&mut s, &mut m, asm::rotr(5, 1, 4));
        assert_eq!(s.gpr(5), 0xFF00_0000);
        exec(&mut s, &mut m, asm::sllv(6, 1, 2));
        assert_eq!(s.gpr(6), 0x0000_00F0);
        exec(&mut s, &mut m, asm::nor(7, 0, 0));
        assert_eq!(s.gpr(7), u32::MAX);
        exec(&mut s, &mut m, asm::slt(8, 1, 2));
        assert_eq!(s.gpr(8), 1);
        exec(&mut s, &mut m, asm::sltu(8, 1, 2));
        assert_eq!(s.gpr(8), 0);
    }

    #[test]
    fn test_allegrex_extensions() {
        let (mut s, mut m) = setup(&[]);
        s.set_gpr(1, 0x1234_5678);
        exec(&mut s, &mut m, asm::ext(2, 1, 4, 8));
        assert_eq!(s.gpr(2), 0x67);
        s.set_gpr(3, 0xFFFF_FFFF);
        exec(&mut s, &mut m, asm::ins(3, 1, 8, 8));
        assert_eq!(s.gpr(3), 0xFFFF_78FF);
        exec(&mut s, &mut m, asm::wsbh(4, 1));
        assert_eq!(s.gpr(4), 0x3412_7856);
        exec(&mut s, &mut m, asm::wsbw(4, 1));
        assert_eq!(s.gpr(4), 0x7856_3412);
        exec(&mut s, &mut m, asm::seb(5, 1));
        assert_eq!(s.gpr(5), 0x78);
        s.set_gpr(6, 0x8080);
        exec(&mut s, &mut m, asm::seh(7, 6));
        assert_eq!(s.gpr(7), 0xFFFF_8080);
        exec(&mut s, &mut m, asm::clz(8, 6));
        assert_eq!(s.gpr(8), 16);
        exec(&mut s, &mut m, asm::clo(8, 7));
        assert_eq!(s.gpr(8), 17);
        exec(&mut s, &mut m, asm::max(9, 7, 6));
        assert_eq!(s.gpr(9), 0x8080);
        exec(&mut s, &mut m, asm::bitrev(10, 6));
        assert_eq!(s.gpr(10), 0x0101_0000);
    }

    #[test]
    fn test_div_edge_cases() {
        assert_eq!(div_signed(7, 0), (u32::MAX, 7));
        assert_eq!(div_signed(-7i32 as u32, 0), (1, -7i32 as u32));
        assert_eq!(div_signed(0x8000_0000, u32::MAX), (0x8000_0000, u32::MAX));
        assert_eq!(div_signed(-7i32 as u32, 2), (-3i32 as u32, -1i32 as u32));
        assert_eq!(div_unsigned(5, 0), (0xFFFF, 5));
        assert_eq!(div_unsigned(0x1_0000, 0), (u32::MAX, 0x1_0000));
    }

    #[test]
    fn test_mult_madd() {
        let (mut s, mut m) = setup(&[]);
        s.set_gpr(1, -2i32 as u32);
        s.set_gpr(2, 3);
        exec(&mut s, &mut m, asm::mult(1, 2));
        assert_eq!(s.hilo(), -6i64 as u64);
        exec(&mut s, &mut m, asm::madd(2, 2));
        assert_eq!(s.hilo(), 3);
        exec(&mut s, &mut m, asm::multu(1, 2));
        assert_eq!(s.hi(), 2);
    }

    #[test]
    fn test_unaligned_load_store_pairs() {
        let (mut s, mut m) = setup(&[]);
        m.write_u32(BASE + 0x100, 0x4433_2211).expect("in range");
        m.write_u32(BASE + 0x104, 0x8877_6655).expect("in range");
        s.set_gpr(4, BASE + 0x100);
        // Unaligned word at +1: lwr at +1, lwl at +4.
        exec(&mut s, &mut m, asm::lwr(2, 4, 1));
        exec(&mut s, &mut m, asm::lwl(2, 4, 4));
        assert_eq!(s.gpr(2), 0x5544_3322);

        s.set_gpr(3, 0xAABB_CCDD);
        exec(&mut s, &mut m, asm::swr(3, 4, 1));
        exec(&mut s, &mut m, asm::swl(3, 4, 4));
        assert_eq!(m.read_u32(BASE + 0x100).expect("in range"), 0xBBCC_DD11);
        assert_eq!(m.read_u32(BASE + 0x104).expect("in range"), 0x8877_66AA);
    }

    #[test]
    fn test_fpu_control() {
        let (mut s, mut m) = setup(&[]);
        s.set_gpr(1, 0x0080_0003);
        exec(&mut s, &mut m, asm::ctc1(1, 31));
        assert!(s.fpcond());
        assert_eq!(RoundingMode::from_fcr31(s.fcr31()), RoundingMode::NegInf);
        exec(&mut s, &mut m, asm::cfc1(2, 31));
        assert_eq!(s.gpr(2), 0x0080_0003);
        exec(&mut s, &mut m, asm::cfc1(2, 0));
        assert_eq!(s.gpr(2), FCR0_VALUE);

        s.set_fpr(1, -2.5);
        exec(&mut s, &mut m, asm::cvt_w_s(2, 1));
        assert_eq!(s.fpr_bits(2) as i32, -3);
        exec(&mut s, &mut m, asm::trunc_w_s(2, 1));
        assert_eq!(s.fpr_bits(2) as i32, -2);
    }

    #[test]
    fn test_fp_compare() {
        assert!(fp_compare(2, 1.0, 1.0));
        assert!(!fp_compare(2, f32::NAN, f32::NAN));
        assert!(fp_compare(1, f32::NAN, 0.0));
        assert!(fp_compare(6, 1.0, 2.0));
        assert!(!fp_compare(4, 2.0, 1.0));
    }

    #[test]
    fn test_step_branch_with_delay_slot() {
        let (mut s, mut m) = setup(&[
            asm::addiu(1, 0, 5),
            asm::beq(1, 1, 2),
            asm::addiu(2, 0, 1),
            asm::addiu(3, 0, 1),
            asm::addiu(4, 0, 1),
        ]);
        let src = MemorySource;
        assert_eq!(step(&mut s, &mut m, &src), StepResult::Ok);
        assert_eq!(step(&mut s, &mut m, &src), StepResult::Ok);
        assert_eq!(s.gpr(2), 1);
        assert_eq!(s.pc, BASE + 16);
        assert_eq!(s.gpr(3), 0);
    }

    #[test]
    fn test_step_likely_not_taken_skips_slot() {
        let (mut s, mut m) = setup(&[asm::bnel(0, 0, 4), asm::addiu(2, 0, 1)]);
        assert_eq!(step(&mut s, &mut m, &MemorySource), StepResult::Ok);
        assert_eq!(s.gpr(2), 0);
        assert_eq!(s.pc, BASE + 8);
    }

    #[test]
    fn test_step_link_before_slot() {
        let (mut s, mut m) = setup(&[asm::jal(BASE + 0x40), asm::addu(2, 31, 0)]);
        assert_eq!(step(&mut s, &mut m, &MemorySource), StepResult::Ok);
        assert_eq!(s.gpr(31), BASE + 8);
        assert_eq!(s.gpr(2), BASE + 8);
        assert_eq!(s.pc, BASE + 0x40);
    }

    #[test]
    fn test_step_syscall_in_delay_slot() {
        let (mut s, mut m) = setup(&[asm::j(BASE + 0x40), asm::syscall(7)]);
        assert_eq!(step(&mut s, &mut m, &MemorySource), StepResult::Syscall(7));
        assert_eq!(s.pc, BASE + 0x40);
    }

    #[test]
    fn test_step_vfpu_faults() {
        let (mut s, mut m) = setup(&[0x6000_0000]);
        assert!(matches!(
            step(&mut s, &mut m, &MemorySource),
            StepResult::Fault(InterpError::Unimplemented { .. })
        ));
    }

    #[test]
    fn test_run_counts_delay_slots() {
        let (mut s, mut m) = setup(&[asm::addiu(1, 0, 1), asm::j(BASE + 12), asm::nop(), asm::syscall(1)]);
        let (result, n) = run(&mut s, &mut m, &MemorySource, 100);
        assert_eq!(result, StepResult::Syscall(1));
        assert_eq!(n, 4);
    }

    #[test]
    fn test_fault_for_matches_execute() {
        let (mut s, mut m) = setup(&[]);
        for op in [0x6000_0000, 0x4000_0000, 0x7000_0000, 0x6800_0001] {
            s.pc = BASE;
            let err = execute(op, &mut s, &mut m).expect_err("faults");
            assert_eq!(fault_for(BASE, op), err);
        }
    }
}
