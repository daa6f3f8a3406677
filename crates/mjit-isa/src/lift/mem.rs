//! Load/store lowering.

use mjit_ir::IrOp;
use mjit_ir::reg::fpr;

use super::BlockBuilder;
use crate::decode::{Instr, MipsOp};
use crate::fields::{op_ft, op_rs, op_rt, op_simm16};

impl BlockBuilder<'_> {
    pub(super) fn load_store(&mut self, instr: Instr) {
        use MipsOp as M;
        let raw = instr.raw;
        let (base, rt) = (op_rs(raw), op_rt(raw));
        let offset = op_simm16(raw) as u32;
        self.imm.map_in(&mut self.ir, base);

        let load = match instr.op {
            M::Lb => Some(IrOp::Load8Ext),
            M::Lbu => Some(IrOp::Load8),
            M::Lh => Some(IrOp::Load16Ext),
            M::Lhu => Some(IrOp::Load16),
            M::Lw | M::Ll => Some(IrOp::Load32),
            M::Lwl => Some(IrOp::Load32Left),
            M::Lwr => Some(IrOp::Load32Right),
            _ => None,
        };
        if let Some(op) = load {
            if rt == 0 {
                return;
            }
            if matches!(op, IrOp::Load32Left | IrOp::Load32Right) {
                // Merges into the old value.
                self.imm.map_in(&mut self.ir, rt);
            }
            self.imm.map_dirty(rt);
            self.ir.write_const(op, rt, base, offset);
            return;
        }

        match instr.op {
            M::Lwc1 => self.ir.write_const(IrOp::LoadFloat, fpr(op_ft(raw)), base, offset),
            M::Swc1 => self.ir.write_const(IrOp::StoreFloat, fpr(op_ft(raw)), base, offset),
            op => {
                let store = match op {
                    M::Sb => IrOp::Store8,
                    M::Sh => IrOp::Store16,
                    M::Swl => IrOp::Store32Left,
                    M::Swr => IrOp::Store32Right,
                    _ => IrOp::Store32,
                };
                self.imm.map_in(&mut self.ir, rt);
                self.ir.write_const(store, rt, base, offset);
                if op == M::Sc {
                    self.imm.set_imm(rt, 1);
                }
            }
        }
    }
}
