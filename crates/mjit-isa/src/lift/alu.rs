//! ALU, shift, multiply/divide and Allegrex bit-manipulation lowering.

use mjit_ir::IrOp;
use mjit_ir::reg::{IRREG_HI, IRREG_LO, temp};

use super::BlockBuilder;
use crate::decode::{Instr, MipsOp};
use crate::fields::{op_rd, op_rs, op_rt, op_sa, op_simm16, op_uimm16};

/// Three-register ops that map onto one IR op.
fn three_reg_op(op: MipsOp) -> Option<(IrOp, fn(u32, u32) -> u32)> {
    let entry: (IrOp, fn(u32, u32) -> u32) = match op {
        MipsOp::Add | MipsOp::Addu => (IrOp::Add, u32::wrapping_add),
        MipsOp::Sub | MipsOp::Subu => (IrOp::Sub, u32::wrapping_sub),
        MipsOp::And => (IrOp::And, |a, b| a & b),
        MipsOp::Or => (IrOp::Or, |a, b| a | b),
        MipsOp::Xor => (IrOp::Xor, |a, b| a ^ b),
        MipsOp::Slt => (IrOp::Slt, |a, b| u32::from((a as i32) < (b as i32))),
        MipsOp::Sltu => (IrOp::SltU, |a, b| u32::from(a < b)),
        MipsOp::Max => (IrOp::Max, |a, b| (a as i32).max(b as i32) as u32),
        MipsOp::Min => (IrOp::Min, |a, b| (a as i32).min(b as i32) as u32),
        _ => return None,
    };
    Some(entry)
}

/// Const form used when the second operand is known.
const fn const_form(op: IrOp) -> Option<IrOp> {
    match op {
        IrOp::Add => Some(IrOp::AddConst),
        IrOp::And => Some(IrOp::AndConst),
        IrOp::Or => Some(IrOp::OrConst),
        IrOp::Xor => Some(IrOp::XorConst),
        IrOp::Slt => Some(IrOp::SltConst),
        IrOp::SltU => Some(IrOp::SltUConst),
        _ => None,
    }
}

const fn is_commutative(op: IrOp) -> bool {
    matches!(op, IrOp::Add | IrOp::And | IrOp::Or | IrOp::Xor | IrOp::Max | IrOp::Min)
}

impl BlockBuilder<'_> {
    pub(super) fn alu(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (rs, rt, rd) = (op_rs(raw), op_rt(raw), op_rd(raw));
        match instr.op {
            M::Addi | M::Addiu => self.imm_op(IrOp::AddConst, rt, rs, op_simm16(raw) as u32, u32::wrapping_add),
            M::Slti => self.imm_op(IrOp::SltConst, rt, rs, op_simm16(raw) as u32, |a, b| {
                u32::from((a as i32) < (b as i32))
            }),
            M::Sltiu => self.imm_op(IrOp::SltUConst, rt, rs, op_simm16(raw) as u32, |a, b| u32::from(a < b)),
            M::Andi => self.imm_op(IrOp::AndConst, rt, rs, op_uimm16(raw), |a, b| a & b),
            M::Ori => self.imm_op(IrOp::OrConst, rt, rs, op_uimm16(raw), |a, b| a | b),
            M::Xori => self.imm_op(IrOp::XorConst, rt, rs, op_uimm16(raw), |a, b| a ^ b),
            M::Lui => self.imm.set_imm(rt, op_uimm16(raw) << 16),
            M::Nor => self.nor(rd, rs, rt),
            M::Movz | M::Movn => self.cond_move(instr.op == M::Movz, rd, rs, rt),
            M::Clz | M::Clo => self.count_leading(instr.op == M::Clo, rd, rs),
            op => {
                if let Some((ir_op, fold)) = three_reg_op(op) {
                    self.reg_op(ir_op, rd, rs, rt, fold);
                }
            }
        }
    }

    /// `rt = rs <op> imm`.
    fn imm_op(&mut self, op: IrOp, rt: u8, rs: u8, imm: u32, fold: fn(u32, u32) -> u32) {
        if rt == 0 {
            return;
        }
        if self.imm.is_imm(rs) {
            self.imm.set_imm(rt, fold(self.imm.imm(rs), imm));
            return;
        }
        self.imm.map_in(&mut self.ir, rs);
        self.imm.map_dirty(rt);
        if imm == 0 && matches!(op, IrOp::AddConst | IrOp::OrConst | IrOp::XorConst) {
            if rt != rs {
                self.ir.write(IrOp::Mov, rt, rs, 0);
            }
        } else {
            self.ir.write_const(op, rt, rs, imm);
        }
    }

    /// `rd = rs <op> rt`.
    fn reg_op(&mut self, op: IrOp, rd: u8, rs: u8, rt: u8, fold: fn(u32, u32) -> u32) {
        if rd == 0 {
            return;
        }
        let (s_imm, t_imm) = (self.imm.is_imm(rs), self.imm.is_imm(rt));
        if s_imm && t_imm {
            self.imm.set_imm(rd, fold(self.imm.imm(rs), self.imm.imm(rt)));
            return;
        }
        // Put the known operand second where the op allows it.
        let (a, b) = if s_imm && is_commutative(op) { (rt, rs) } else { (rs, rt) };
        if self.imm.is_imm(b) {
            let value = self.imm.imm(b);
            let folded = match op {
                IrOp::Sub => Some((IrOp::AddConst, value.wrapping_neg())),
                _ => const_form(op).map(|c| (c, value)),
            };
            if let Some((cop, value)) = folded {
                self.imm_op(cop, rd, a, value, fold);
                return;
            }
        }
        self.imm.map_in_in_dirty(&mut self.ir, rd, rs, rt);
        self.ir.write(op, rd, a, b);
    }

    fn nor(&mut self, rd: u8, rs: u8, rt: u8) {
        if rd == 0 {
            return;
        }
        if self.imm.is_imm(rs) && self.imm.is_imm(rt) {
            self.imm.set_imm(rd, !(self.imm.imm(rs) | self.imm.imm(rt)));
            return;
        }
        self.imm.map_in_in_dirty(&mut self.ir, rd, rs, rt);
        if rt == 0 {
            self.ir.write(IrOp::Not, rd, rs, 0);
        } else if rs == 0 {
            self.ir.write(IrOp::Not, rd, rt, 0);
        } else {
            self.ir.write(IrOp::Or, rd, rs, rt);
            self.ir.write(IrOp::Not, rd, rd, 0);
        }
    }

    fn cond_move(&mut self, if_zero: bool, rd: u8, rs: u8, rt: u8) {
        if rd == 0 {
            return;
        }
        if self.imm.is_imm(rt) {
            let take = (self.imm.imm(rt) == 0) == if_zero;
            if !take {
                return;
            }
            if self.imm.is_imm(rs) {
                self.imm.set_imm(rd, self.imm.imm(rs));
            } else if rd != rs {
                self.imm.map_dirty(rd);
                self.ir.write(IrOp::Mov, rd, rs, 0);
            }
            return;
        }
        self.imm.map_in(&mut self.ir, rs);
        self.imm.map_in(&mut self.ir, rt);
        self.imm.map_in(&mut self.ir, rd);
        let op = if if_zero { IrOp::MovZ } else { IrOp::MovNZ };
        self.ir.write(op, rd, rs, rt);
    }

    fn count_leading(&mut self, ones: bool, rd: u8, rs: u8) {
        if rd == 0 {
            return;
        }
        if self.imm.is_imm(rs) {
            let v = self.imm.imm(rs);
            self.imm.set_imm(rd, if ones { v.leading_ones() } else { v.leading_zeros() });
            return;
        }
        self.imm.map_in(&mut self.ir, rs);
        self.imm.map_dirty(rd);
        if ones {
            let t = temp(0);
            self.ir.write(IrOp::Not, t, rs, 0);
            self.ir.write(IrOp::Clz, rd, t, 0);
        } else {
            self.ir.write(IrOp::Clz, rd, rs, 0);
        }
    }

    pub(super) fn shift(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (rs, rt, rd, sa) = (op_rs(raw), op_rt(raw), op_rd(raw), op_sa(raw));
        if rd == 0 {
            return;
        }
        let (imm_op, var_op) = match instr.op {
            M::Sll | M::Sllv => (IrOp::ShlImm, IrOp::Shl),
            M::Srl | M::Srlv => (IrOp::ShrImm, IrOp::Shr),
            M::Sra | M::Srav => (IrOp::SarImm, IrOp::Sar),
            _ => (IrOp::RorImm, IrOp::Ror),
        };
        let variable = matches!(instr.op, M::Sllv | M::Srlv | M::Srav | M::Rotrv);
        let amount = if variable {
            if !self.imm.is_imm(rs) {
                self.imm.map_in_in_dirty(&mut self.ir, rd, rt, rs);
                self.ir.write(var_op, rd, rt, rs);
                return;
            }
            (self.imm.imm(rs) & 31) as u8
        } else {
            sa
        };
        self.shift_imm(imm_op, rd, rt, amount);
    }

    fn shift_imm(&mut self, op: IrOp, rd: u8, rt: u8, amount: u8) {
        if self.imm.is_imm(rt) {
            let v = self.imm.imm(rt);
            let sh = u32::from(amount);
            let result = match op {
                IrOp::ShlImm => v << sh,
                IrOp::ShrImm => v >> sh,
                IrOp::SarImm => ((v as i32) >> sh) as u32,
                _ => v.rotate_right(sh),
            };
            self.imm.set_imm(rd, result);
            return;
        }
        self.imm.map_in(&mut self.ir, rt);
        self.imm.map_dirty(rd);
        if amount == 0 {
            if rd != rt {
                self.ir.write(IrOp::Mov, rd, rt, 0);
            }
        } else {
            self.ir.write(op, rd, rt, amount);
        }
    }

    pub(super) fn mul_div(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (rs, rt, rd) = (op_rs(raw), op_rt(raw), op_rd(raw));
        match instr.op {
            M::Mfhi | M::Mflo => {
                if rd != 0 {
                    self.imm.map_dirty(rd);
                    let src = if instr.op == M::Mfhi { IRREG_HI } else { IRREG_LO };
                    self.ir.write(IrOp::Mov, rd, src, 0);
                }
            }
            M::Mthi | M::Mtlo => {
                self.imm.map_in(&mut self.ir, rs);
                let dst = if instr.op == M::Mthi { IRREG_HI } else { IRREG_LO };
                self.ir.write(IrOp::Mov, dst, rs, 0);
            }
            op => {
                let ir_op = match op {
                    M::Mult => IrOp::Mult,
                    M::Multu => IrOp::MultU,
                    M::Madd => IrOp::Madd,
                    M::Maddu => IrOp::MaddU,
                    M::Msub => IrOp::Msub,
                    M::Msubu => IrOp::MsubU,
                    M::Div => IrOp::Div,
                    _ => IrOp::DivU,
                };
                self.imm.map_in(&mut self.ir, rs);
                self.imm.map_in(&mut self.ir, rt);
                self.ir.write(ir_op, 0, rs, rt);
            }
        }
    }

    pub(super) fn special3(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (rs, rt, rd, sa) = (op_rs(raw), op_rt(raw), op_rd(raw), op_sa(raw));
        match instr.op {
            M::Ext => self.ext(rt, rs, sa, rd + 1),
            M::Ins => {
                if rd < sa {
                    // Empty field: the interpreter defines it as a no-op.
                    return;
                }
                self.ins(rt, rs, sa, rd - sa + 1);
            }
            op => {
                if rd == 0 {
                    return;
                }
                let (ir_op, fold): (IrOp, fn(u32) -> u32) = match op {
                    M::Wsbh => (IrOp::BSwap16, |x| ((x & 0xFF00_FF00) >> 8) | ((x & 0x00FF_00FF) << 8)),
                    M::Wsbw => (IrOp::BSwap32, u32::swap_bytes),
                    M::Seb => (IrOp::Ext8to32, |x| x as u8 as i8 as i32 as u32),
                    M::Seh => (IrOp::Ext16to32, |x| x as u16 as i16 as i32 as u32),
                    _ => (IrOp::BitRev, u32::reverse_bits),
                };
                if self.imm.is_imm(rt) {
                    self.imm.set_imm(rd, fold(self.imm.imm(rt)));
                    return;
                }
                self.imm.map_in(&mut self.ir, rt);
                self.imm.map_dirty(rd);
                self.ir.write(ir_op, rd, rt, 0);
            }
        }
    }

    fn ext(&mut self, rt: u8, rs: u8, pos: u8, size: u8) {
        if rt == 0 {
            return;
        }
        let mask = low_mask(u32::from(size));
        if self.imm.is_imm(rs) {
            self.imm.set_imm(rt, (self.imm.imm(rs) >> pos) & mask);
            return;
        }
        self.imm.map_in(&mut self.ir, rs);
        self.imm.map_dirty(rt);
        if pos == 0 {
            self.ir.write_const(IrOp::AndConst, rt, rs, mask);
            return;
        }
        self.ir.write(IrOp::ShrImm, rt, rs, pos);
        let remaining = u32::MAX >> pos;
        if mask & remaining != remaining {
            self.ir.write_const(IrOp::AndConst, rt, rt, mask);
        }
    }

    fn ins(&mut self, rt: u8, rs: u8, pos: u8, size: u8) {
        if rt == 0 {
            return;
        }
        let field = low_mask(u32::from(size));
        let mask = field << pos;
        if self.imm.is_imm(rs) && self.imm.is_imm(rt) {
            let v = (self.imm.imm(rt) & !mask) | ((self.imm.imm(rs) << pos) & mask);
            self.imm.set_imm(rt, v);
            return;
        }
        let t = temp(0);
        if self.imm.is_imm(rs) {
            self.ir.set_const(t, (self.imm.imm(rs) << pos) & mask);
        } else {
            self.imm.map_in(&mut self.ir, rs);
            self.ir.write_const(IrOp::AndConst, t, rs, field);
            if pos != 0 {
                self.ir.write(IrOp::ShlImm, t, t, pos);
            }
        }
        self.imm.map_in(&mut self.ir, rt);
        self.ir.write_const(IrOp::AndConst, rt, rt, !mask);
        self.ir.write(IrOp::Or, rt, rt, t);
    }
}

const fn low_mask(size: u32) -> u32 {
    if size >= 32 { u32::MAX } else { (1 << size) - 1 }
}
