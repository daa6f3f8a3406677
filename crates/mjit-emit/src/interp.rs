//! IR interpreter.
//!
//! Executes a block's IR directly against guest state. This is the target
//! of [`InterpreterBackend`](crate::InterpreterBackend), and native code
//! calls [`exec_inst`] for every instruction it does not compile itself.

use mjit_ir::reg::{IRREG_FCR31, IRREG_FPCOND};
use mjit_ir::{IrInst, IrOp};
use mjit_isa::InterpError;
use mjit_isa::interp::{
    div_signed, div_unsigned, execute, fp_compare, load_left, load_right, mul_signed, store_left, store_right,
};
use mjit_state::{ExitReason, GuestMemory, GuestState, RoundingMode, apply_host_rounding, round_to_i32};

/// How a block run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockExit {
    /// Continue at `state.pc`.
    Jump,
    /// Guest syscall; `state.pc` is the resume address.
    Syscall(u32),
    /// Guest break.
    Break(u32),
    /// A fallback instruction faulted; `state.pc` is its address.
    Fault(InterpError),
}

/// Result of one IR instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Next,
    Exit(BlockExit),
}

/// Run a block's IR until it exits.
///
/// Syscalls, breaks and faults are also recorded in `state.exit_reason`
/// and `state.exit_arg`, exactly as native blocks leave them.
pub fn run_block(insts: &[IrInst], state: &mut GuestState, mem: &mut GuestMemory) -> BlockExit {
    state.clear_exit();
    for inst in insts {
        match exec_inst(inst, state, mem) {
            Step::Next => {}
            Step::Exit(exit) => {
                record_exit(state, inst, &exit);
                return exit;
            }
        }
    }
    // Well-formed blocks end in an unconditional exit.
    BlockExit::Jump
}

fn record_exit(state: &mut GuestState, inst: &IrInst, exit: &BlockExit) {
    let (reason, arg) = match exit {
        BlockExit::Jump => return,
        BlockExit::Syscall(code) => (ExitReason::Syscall, *code),
        BlockExit::Break(code) => (ExitReason::Break, *code),
        BlockExit::Fault(_) => (ExitReason::Fault, inst.constant),
    };
    state.exit_reason = reason as u32;
    state.exit_arg = arg;
}

#[inline]
fn f(state: &GuestState, reg: u8) -> f32 {
    f32::from_bits(state.reg(reg))
}

#[inline]
fn set_f(state: &mut GuestState, reg: u8, value: f32) {
    state.set_reg(reg, value.to_bits());
}

/// Execute one IR instruction.
#[allow(clippy::too_many_lines, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn exec_inst(inst: &IrInst, state: &mut GuestState, mem: &mut GuestMemory) -> Step {
    let (d, s1, s2, c) = (inst.dest, inst.src1, inst.src2, inst.constant);
    let a = state.reg(s1);
    let b = state.reg(s2);
    let addr = a.wrapping_add(c);

    match inst.op {
        IrOp::Nop => {}

        IrOp::SetConst | IrOp::SetConstF => state.set_reg(d, c),
        IrOp::Mov => state.set_reg(d, a),

        IrOp::Add => state.set_reg(d, a.wrapping_add(b)),
        IrOp::Sub => state.set_reg(d, a.wrapping_sub(b)),
        IrOp::Neg => state.set_reg(d, a.wrapping_neg()),
        IrOp::Not => state.set_reg(d, !a),
        IrOp::And => state.set_reg(d, a & b),
        IrOp::Or => state.set_reg(d, a | b),
        IrOp::Xor => state.set_reg(d, a ^ b),
        IrOp::AddConst => state.set_reg(d, addr),
        IrOp::AndConst => state.set_reg(d, a & c),
        IrOp::OrConst => state.set_reg(d, a | c),
        IrOp::XorConst => state.set_reg(d, a ^ c),

        IrOp::Slt => state.set_reg(d, u32::from((a as i32) < (b as i32))),
        IrOp::SltU => state.set_reg(d, u32::from(a < b)),
        IrOp::SltConst => state.set_reg(d, u32::from((a as i32) < (c as i32))),
        IrOp::SltUConst => state.set_reg(d, u32::from(a < c)),

        IrOp::Shl => state.set_reg(d, a << (b & 31)),
        IrOp::Shr => state.set_reg(d, a >> (b & 31)),
        IrOp::Sar => state.set_reg(d, ((a as i32) >> (b & 31)) as u32),
        IrOp::Ror => state.set_reg(d, a.rotate_right(b & 31)),
        // Immediate shifts carry the amount in the src2 field.
        IrOp::ShlImm => state.set_reg(d, a << (s2 & 31)),
        IrOp::ShrImm => state.set_reg(d, a >> (s2 & 31)),
        IrOp::SarImm => state.set_reg(d, ((a as i32) >> (s2 & 31)) as u32),
        IrOp::RorImm => state.set_reg(d, a.rotate_right(u32::from(s2 & 31))),

        IrOp::MovZ => {
            if b == 0 {
                state.set_reg(d, a);
            }
        }
        IrOp::MovNZ => {
            if b != 0 {
                state.set_reg(d, a);
            }
        }
        IrOp::Max => state.set_reg(d, (a as i32).max(b as i32) as u32),
        IrOp::Min => state.set_reg(d, (a as i32).min(b as i32) as u32),

        IrOp::Clz => state.set_reg(d, a.leading_zeros()),
        IrOp::Ext8to32 => state.set_reg(d, a as u8 as i8 as i32 as u32),
        IrOp::Ext16to32 => state.set_reg(d, a as u16 as i16 as i32 as u32),
        IrOp::BSwap16 => state.set_reg(d, ((a & 0xFF00_FF00) >> 8) | ((a & 0x00FF_00FF) << 8)),
        IrOp::BSwap32 => state.set_reg(d, a.swap_bytes()),
        IrOp::BitRev => state.set_reg(d, a.reverse_bits()),

        IrOp::Mult => state.set_hilo(mul_signed(a, b)),
        IrOp::MultU => state.set_hilo(u64::from(a) * u64::from(b)),
        IrOp::Madd => state.set_hilo(state.hilo().wrapping_add(mul_signed(a, b))),
        IrOp::MaddU => state.set_hilo(state.hilo().wrapping_add(u64::from(a) * u64::from(b))),
        IrOp::Msub => state.set_hilo(state.hilo().wrapping_sub(mul_signed(a, b))),
        IrOp::MsubU => state.set_hilo(state.hilo().wrapping_sub(u64::from(a) * u64::from(b))),
        IrOp::Div | IrOp::DivU => {
            let (lo, hi) = if inst.op == IrOp::Div {
                div_signed(a, b)
            } else {
                div_unsigned(a, b)
            };
            state.set_hilo((u64::from(hi) << 32) | u64::from(lo));
        }

        IrOp::Load8 => state.set_reg(d, u32::from(mem.load_u8(addr))),
        IrOp::Load8Ext => state.set_reg(d, mem.load_u8(addr) as i8 as i32 as u32),
        IrOp::Load16 => state.set_reg(d, u32::from(mem.load_u16(addr))),
        IrOp::Load16Ext => state.set_reg(d, mem.load_u16(addr) as i16 as i32 as u32),
        IrOp::Load32 | IrOp::LoadFloat => state.set_reg(d, mem.load_u32(addr)),
        IrOp::Load32Left => state.set_reg(d, load_left(state.reg(d), mem.load_u32(addr), addr)),
        IrOp::Load32Right => state.set_reg(d, load_right(state.reg(d), mem.load_u32(addr), addr)),
        IrOp::Store8 => mem.store_u8(state, addr, state.reg(d) as u8),
        IrOp::Store16 => mem.store_u16(state, addr, state.reg(d) as u16),
        IrOp::Store32 | IrOp::StoreFloat => mem.store_u32(state, addr, state.reg(d)),
        IrOp::Store32Left => {
            let word = store_left(state.reg(d), mem.load_u32(addr), addr);
            mem.store_u32(state, addr, word);
        }
        IrOp::Store32Right => {
            let word = store_right(state.reg(d), mem.load_u32(addr), addr);
            mem.store_u32(state, addr, word);
        }

        IrOp::FAdd => set_f(state, d, f(state, s1) + f(state, s2)),
        IrOp::FSub => set_f(state, d, f(state, s1) - f(state, s2)),
        IrOp::FMul => set_f(state, d, f(state, s1) * f(state, s2)),
        IrOp::FDiv => set_f(state, d, f(state, s1) / f(state, s2)),
        IrOp::FSqrt => set_f(state, d, f(state, s1).sqrt()),
        IrOp::FNeg => state.set_reg(d, a ^ 0x8000_0000),
        IrOp::FAbs => state.set_reg(d, a & 0x7FFF_FFFF),
        IrOp::FMov | IrOp::FMovFromGpr | IrOp::FMovToGpr => state.set_reg(d, a),
        IrOp::FRound | IrOp::FTrunc | IrOp::FCeil | IrOp::FFloor | IrOp::FCvtWS => {
            let mode = match inst.op {
                IrOp::FRound => RoundingMode::Nearest,
                IrOp::FTrunc => RoundingMode::Zero,
                IrOp::FCeil => RoundingMode::PosInf,
                IrOp::FFloor => RoundingMode::NegInf,
                _ => RoundingMode::from_fcr31(state.reg(IRREG_FCR31)),
            };
            state.set_reg(d, round_to_i32(f(state, s1), mode) as u32);
        }
        IrOp::FCvtSW => set_f(state, d, (a as i32) as f32),
        IrOp::FCmp => {
            let cond = fp_compare(u32::from(d), f(state, s1), f(state, s2));
            state.set_reg(IRREG_FPCOND, u32::from(cond));
        }
        IrOp::UpdateRoundingMode => {
            apply_host_rounding(RoundingMode::from_fcr31(state.reg(IRREG_FCR31)));
        }

        IrOp::Downcount => state.downcount = state.downcount.wrapping_sub(c as i32),
        IrOp::SetPc => state.pc = a,
        IrOp::SetPcConst => state.pc = c,
        IrOp::Interpret => {
            if let Err(err) = execute(c, state, mem) {
                return Step::Exit(BlockExit::Fault(err));
            }
        }
        IrOp::Syscall => return Step::Exit(BlockExit::Syscall(c)),
        IrOp::Break => return Step::Exit(BlockExit::Break(c)),

        IrOp::ExitToConst => return jump(state, c),
        IrOp::ExitToReg => return jump(state, a),
        IrOp::ExitToConstIfEq => return jump_if(state, a == b, c),
        IrOp::ExitToConstIfNeq => return jump_if(state, a != b, c),
        IrOp::ExitToConstIfGtZ => return jump_if(state, (a as i32) > 0, c),
        IrOp::ExitToConstIfGeZ => return jump_if(state, (a as i32) >= 0, c),
        IrOp::ExitToConstIfLtZ => return jump_if(state, (a as i32) < 0, c),
        IrOp::ExitToConstIfLeZ => return jump_if(state, (a as i32) <= 0, c),
    }
    Step::Next
}

const fn jump(state: &mut GuestState, target: u32) -> Step {
    state.pc = target;
    Step::Exit(BlockExit::Jump)
}

const fn jump_if(state: &mut GuestState, taken: bool, target: u32) -> Step {
    if taken { jump(state, target) } else { Step::Next }
}

#[cfg(test)]
mod tests {
    use mjit_ir::IrWriter;
    use mjit_ir::reg::{IRREG_HI, IRREG_LO, fpr};
    use mjit_isa::asm;

    use super::*;

    const BASE: u32 = 0x0800_0000;

    fn setup() -> (GuestState, GuestMemory) {
        let mut mem = GuestMemory::new(BASE, 64 * 1024).expect("allocation should succeed");
        let mut state = GuestState::new();
        mem.attach(&mut state);
        state.pc = BASE;
        (state, mem)
    }

    fn run(w: IrWriter, state: &mut GuestState, mem: &mut GuestMemory) -> BlockExit {
        run_block(w.insts(), state, mem)
    }

    #[test]
    fn test_alu_and_exit() {
        let (mut s, mut m) = setup();
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 3);
        w.set_const(1, 7);
        w.write_const(IrOp::AddConst, 2, 1, (-10i32) as u32);
        w.write(IrOp::Slt, 3, 2, 1);
        w.write(IrOp::SarImm, 4, 2, 1);
        w.exit_to_const(BASE + 0x40);
        s.downcount = 10;
        assert_eq!(run(w, &mut s, &mut m), BlockExit::Jump);
        assert_eq!(s.gpr(2), (-3i32) as u32);
        assert_eq!(s.gpr(3), 1);
        assert_eq!(s.gpr(4), (-2i32) as u32);
        assert_eq!(s.pc, BASE + 0x40);
        assert_eq!(s.downcount, 7);
    }

    #[test]
    fn test_conditional_exit_falls_through() {
        let (mut s, mut m) = setup();
        s.set_gpr(4, 1);
        let mut w = IrWriter::new();
        w.write_full(IrOp::ExitToConstIfEq, 0, 4, 0, BASE + 0x100);
        w.write_full(IrOp::ExitToConstIfGtZ, 0, 4, 0, BASE + 0x200);
        w.exit_to_const(BASE + 0x300);
        assert_eq!(run(w, &mut s, &mut m), BlockExit::Jump);
        assert_eq!(s.pc, BASE + 0x200);
    }

    #[test]
    fn test_mult_and_div() {
        let (mut s, mut m) = setup();
        s.set_gpr(1, (-3i32) as u32);
        s.set_gpr(2, 5);
        let mut w = IrWriter::new();
        w.write(IrOp::Mult, 0, 1, 2);
        w.write(IrOp::Madd, 0, 2, 2);
        w.exit_to_const(0);
        run(w, &mut s, &mut m);
        assert_eq!(s.hilo(), 10);

        let mut w = IrWriter::new();
        w.write(IrOp::Div, 0, 2, 0);
        w.exit_to_const(0);
        run(w, &mut s, &mut m);
        assert_eq!((s.reg(IRREG_LO), s.reg(IRREG_HI)), (u32::MAX, 5));
    }

    #[test]
    fn test_memory_ops_mask_and_record_code_writes() {
        let (mut s, mut m) = setup();
        m.mark_code(BASE + 0x400, 4);
        s.set_gpr(1, BASE + 0x400);
        s.set_gpr(2, 0x1122_3344);
        let mut w = IrWriter::new();
        w.write_const(IrOp::Store32, 2, 1, 2);
        w.write_const(IrOp::Load16Ext, 3, 1, 2);
        w.write_const(IrOp::Load8, 4, 1, 0);
        w.exit_to_const(0);
        run(w, &mut s, &mut m);
        assert_eq!(m.load_u32(BASE + 0x400), 0x1122_3344);
        assert_eq!(s.gpr(3), 0x1122);
        assert_eq!(s.gpr(4), 0x44);
        assert_eq!(s.stop, 1);
        assert_eq!(m.take_dirty_code(&mut s), vec![(BASE + 0x400, 4)]);
    }

    #[test]
    fn test_unaligned_pair() {
        let (mut s, mut m) = setup();
        m.write_u32(BASE + 0x20, 0x4433_2211).expect("in range");
        m.write_u32(BASE + 0x24, 0x8877_6655).expect("in range");
        s.set_gpr(1, BASE + 0x21);
        let mut w = IrWriter::new();
        w.write_const(IrOp::Load32Left, 2, 1, 3);
        w.write_const(IrOp::Load32Right, 2, 1, 0);
        w.exit_to_const(0);
        run(w, &mut s, &mut m);
        assert_eq!(s.gpr(2), 0x5544_3322);
    }

    #[test]
    fn test_fpu_ops() {
        let (mut s, mut m) = setup();
        s.set_fpr(0, 1.5);
        s.set_fpr(1, 2.25);
        let mut w = IrWriter::new();
        w.write(IrOp::FAdd, fpr(2), fpr(0), fpr(1));
        w.write(IrOp::FCmp, 4, fpr(0), fpr(1));
        w.write(IrOp::FNeg, fpr(3), fpr(2), 0);
        w.write(IrOp::FRound, fpr(4), fpr(1), 0);
        w.exit_to_const(0);
        run(w, &mut s, &mut m);
        assert!((s.fpr(2) - 3.75).abs() < f32::EPSILON);
        assert!((s.fpr(3) + 3.75).abs() < f32::EPSILON);
        assert!(s.fpcond());
        assert_eq!(s.fpr_bits(4), 2);
    }

    #[test]
    fn test_interpret_runs_fallback() {
        let (mut s, mut m) = setup();
        let mut w = IrWriter::new();
        w.write_const(IrOp::SetPcConst, 0, 0, BASE);
        w.write_const(IrOp::Interpret, 0, 0, asm::addiu(5, 0, 9));
        w.exit_to_const(BASE + 4);
        assert_eq!(run(w, &mut s, &mut m), BlockExit::Jump);
        assert_eq!(s.gpr(5), 9);
    }

    #[test]
    fn test_fault_and_syscall_recorded() {
        let (mut s, mut m) = setup();
        let mut w = IrWriter::new();
        w.write_const(IrOp::SetPcConst, 0, 0, BASE + 8);
        w.write_const(IrOp::Interpret, 0, 0, 0x6000_0000);
        w.exit_to_const(0);
        assert!(matches!(
            run(w, &mut s, &mut m),
            BlockExit::Fault(InterpError::Unimplemented { pc, .. }) if pc == BASE + 8
        ));
        assert_eq!(s.exit_reason(), ExitReason::Fault);
        assert_eq!(s.exit_arg, 0x6000_0000);

        let mut w = IrWriter::new();
        w.write_const(IrOp::SetPcConst, 0, 0, BASE + 4);
        w.write_const(IrOp::Syscall, 0, 0, 0x42);
        assert_eq!(run(w, &mut s, &mut m), BlockExit::Syscall(0x42));
        assert_eq!(s.exit_reason(), ExitReason::Syscall);
        assert_eq!(s.pc, BASE + 4);
    }

    #[test]
    fn test_r0_never_written() {
        let (mut s, mut m) = setup();
        let inst = IrInst::new(IrOp::Not, 0, 0, 0);
        assert_eq!(exec_inst(&inst, &mut s, &mut m), Step::Next);
        assert_eq!(s.gpr(0), 0);
    }
}
