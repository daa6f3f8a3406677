//! COP1 lowering.

use mjit_ir::IrOp;
use mjit_ir::reg::{IRREG_FCR31, IRREG_FPCOND, fpr, temp};

use super::BlockBuilder;
use crate::decode::{Instr, MipsOp};
use crate::fields::{op_fd, op_fs, op_ft, op_func, op_rt};
use crate::interp::{FCR0_VALUE, FCR31_COND_BIT, FCR31_MASK};

impl BlockBuilder<'_> {
    pub(super) fn fpu(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (fs, ft, fd, rt) = (op_fs(raw), op_ft(raw), op_fd(raw), op_rt(raw));
        match instr.op {
            M::Mfc1 => {
                if rt != 0 {
                    self.imm.map_dirty(rt);
                    self.ir.write(IrOp::FMovToGpr, rt, fpr(fs), 0);
                }
            }
            M::Mtc1 => {
                self.imm.map_in(&mut self.ir, rt);
                self.ir.write(IrOp::FMovFromGpr, fpr(fs), rt, 0);
            }
            M::Cfc1 => self.cfc1(rt, fs),
            M::Ctc1 => self.ctc1(rt, fs),
            M::CmpS => {
                let cond = (op_func(raw) & 7) as u8;
                self.ir.write(IrOp::FCmp, cond, fpr(fs), fpr(ft));
            }
            op => {
                let (ir_op, binary) = match op {
                    M::AddS => (IrOp::FAdd, true),
                    M::SubS => (IrOp::FSub, true),
                    M::MulS => (IrOp::FMul, true),
                    M::DivS => (IrOp::FDiv, true),
                    M::SqrtS => (IrOp::FSqrt, false),
                    M::AbsS => (IrOp::FAbs, false),
                    M::NegS => (IrOp::FNeg, false),
                    M::RoundWS => (IrOp::FRound, false),
                    M::TruncWS => (IrOp::FTrunc, false),
                    M::CeilWS => (IrOp::FCeil, false),
                    M::FloorWS => (IrOp::FFloor, false),
                    M::CvtWS => (IrOp::FCvtWS, false),
                    M::CvtSW => (IrOp::FCvtSW, false),
                    _ => (IrOp::FMov, false),
                };
                let src2 = if binary { fpr(ft) } else { 0 };
                if ir_op == IrOp::FMov && fd == fs {
                    return;
                }
                self.ir.write(ir_op, fpr(fd), fpr(fs), src2);
            }
        }
    }

    fn cfc1(&mut self, rt: u8, fs: u8) {
        if rt == 0 {
            return;
        }
        match fs {
            31 => {
                let (t0, t1) = (temp(0), temp(1));
                self.imm.map_dirty(rt);
                self.ir.write_const(IrOp::AndConst, t0, IRREG_FCR31, !FCR31_COND_BIT);
                self.ir.write(IrOp::ShlImm, t1, IRREG_FPCOND, 23);
                self.ir.write(IrOp::Or, rt, t0, t1);
            }
            0 => self.imm.set_imm(rt, FCR0_VALUE),
            _ => self.imm.set_imm(rt, 0),
        }
    }

    fn ctc1(&mut self, rt: u8, fs: u8) {
        if fs != 31 {
            return;
        }
        if self.imm.is_imm(rt) {
            let v = self.imm.imm(rt);
            self.ir.set_const(IRREG_FCR31, v & FCR31_MASK);
            self.ir.set_const(IRREG_FPCOND, (v >> 23) & 1);
        } else {
            let t = temp(0);
            self.ir.write_const(IrOp::AndConst, IRREG_FCR31, rt, FCR31_MASK);
            self.ir.write(IrOp::ShrImm, t, rt, 23);
            self.ir.write_const(IrOp::AndConst, IRREG_FPCOND, t, 1);
        }
        self.ir.write(IrOp::UpdateRoundingMode, 0, 0, 0);
    }
}
