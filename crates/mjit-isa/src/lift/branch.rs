//! Branch, jump, syscall and delay-slot lowering.

use mjit_ir::IrOp;
use mjit_ir::reg::{IRREG_FPCOND, IRTEMP_LHS, IRTEMP_RHS, temp};
use tracing::warn;

use super::{BlockBuilder, CompileHandlers};
use crate::analyst::{DelaySlotKind, classify_delay_slot};
use crate::decode::{Category, Instr, MipsOp, decode};
use crate::error::CompileError;
use crate::fields::{branch_target, jump_target, op_rs, op_rt, op_syscall_code};

/// Comparison a conditional branch takes when true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cond {
    Eq,
    Ne,
    LeZ,
    GtZ,
    LtZ,
    GeZ,
}

impl Cond {
    const fn exit_op(self) -> IrOp {
        match self {
            Self::Eq => IrOp::ExitToConstIfEq,
            Self::Ne => IrOp::ExitToConstIfNeq,
            Self::LeZ => IrOp::ExitToConstIfLeZ,
            Self::GtZ => IrOp::ExitToConstIfGtZ,
            Self::LtZ => IrOp::ExitToConstIfLtZ,
            Self::GeZ => IrOp::ExitToConstIfGeZ,
        }
    }

    const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::LeZ => Self::GtZ,
            Self::GtZ => Self::LeZ,
            Self::LtZ => Self::GeZ,
            Self::GeZ => Self::LtZ,
        }
    }

    const fn eval(self, a: u32, b: u32) -> bool {
        let s = a as i32;
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::LeZ => s <= 0,
            Self::GtZ => s > 0,
            Self::LtZ => s < 0,
            Self::GeZ => s >= 0,
        }
    }
}

/// Decoded conditional branch: condition and the two IR operands.
fn branch_cond(instr: &Instr) -> (Cond, u8, u8) {
    use MipsOp as M;
    let raw = instr.raw;
    let (rs, rt) = (op_rs(raw), op_rt(raw));
    match instr.op {
        M::Beq | M::Beql => (Cond::Eq, rs, rt),
        M::Bne | M::Bnel => (Cond::Ne, rs, rt),
        M::Blez | M::Blezl => (Cond::LeZ, rs, 0),
        M::Bgtz | M::Bgtzl => (Cond::GtZ, rs, 0),
        M::Bltz | M::Bltzl | M::Bltzal | M::Bltzall => (Cond::LtZ, rs, 0),
        M::Bgez | M::Bgezl | M::Bgezal | M::Bgezall => (Cond::GeZ, rs, 0),
        M::Bc1t | M::Bc1tl => (Cond::Ne, IRREG_FPCOND, 0),
        // bc1f / bc1fl
        _ => (Cond::Eq, IRREG_FPCOND, 0),
    }
}

impl BlockBuilder<'_> {
    /// Conditional branches, including the FPU condition branches.
    pub(super) fn branch(&mut self, instr: Instr) -> Result<(), CompileError> {
        let pc = self.pc;
        let target = branch_target(pc, instr.raw);
        let fallthrough = pc.wrapping_add(8);
        let (cond, lhs, rhs) = branch_cond(&instr);
        let slot = self.fetch_slot()?;
        let kind = self.slot_kind(&instr, &slot);
        let link = instr.link_reg();

        // Both operands known: resolve now.
        if !self.branch_opts_disabled() && self.is_known(lhs) && self.is_known(rhs) {
            let taken = cond.eval(self.imm.imm(lhs), self.imm.imm(rhs));
            if let Some(link) = link {
                self.imm.set_imm(link, fallthrough);
            }
            let dest = if taken { target } else { fallthrough };
            if !taken && instr.is_likely() {
                self.consume(pc.wrapping_add(4));
                self.exit_to(fallthrough);
                return Ok(());
            }
            return self.finish_with_slot(slot, kind, Dest::Const(dest));
        }

        // Operands that alias the link register are read before it is set.
        let aliased = link.is_some_and(|l| l == lhs || l == rhs);

        if instr.is_likely() {
            let (lhs, rhs) = if aliased { self.latch(lhs, rhs) } else { (lhs, rhs) };
            if let Some(link) = link {
                self.imm.set_imm(link, fallthrough);
            }
            self.imm.flush_all(&mut self.ir);
            self.ir
                .write_full(cond.inverse().exit_op(), 0, lhs, rhs, fallthrough);
            return self.finish_with_slot(slot, kind, Dest::Const(target));
        }

        if kind == DelaySlotKind::Syscall {
            let (lhs, rhs) = if aliased { self.latch(lhs, rhs) } else { (lhs, rhs) };
            if let Some(link) = link {
                self.imm.set_imm(link, fallthrough);
            }
            self.select_pc(cond, lhs, rhs, target, fallthrough);
            return self.finish_with_slot(slot, kind, Dest::AlreadySet);
        }

        let (lhs, rhs) = if kind == DelaySlotKind::Nice && !aliased {
            (lhs, rhs)
        } else {
            self.latch(lhs, rhs)
        };
        if let Some(link) = link {
            self.imm.set_imm(link, fallthrough);
        }
        self.compile_slot(slot, kind)?;
        self.imm.flush_all(&mut self.ir);
        self.ir.write_full(cond.exit_op(), 0, lhs, rhs, target);
        self.exit_to(fallthrough);
        Ok(())
    }

    /// `j`, `jal`, `jr`, `jalr`.
    pub(super) fn jump(&mut self, instr: Instr) -> Result<(), CompileError> {
        let pc = self.pc;
        let fallthrough = pc.wrapping_add(8);
        let slot = self.fetch_slot()?;
        let kind = self.slot_kind(&instr, &slot);
        let link = instr.link_reg();

        let dest = match instr.op {
            MipsOp::J | MipsOp::Jal => Dest::Const(jump_target(pc, instr.raw)),
            _ => {
                let rs = op_rs(instr.raw);
                if self.is_known(rs) && !self.branch_opts_disabled() {
                    Dest::Const(self.imm.imm(rs))
                } else if kind == DelaySlotKind::Nice && link != Some(rs) {
                    Dest::Reg(rs)
                } else {
                    let (latched, _) = self.latch(rs, 0);
                    Dest::Reg(latched)
                }
            }
        };
        if let Some(link) = link {
            self.imm.set_imm(link, fallthrough);
        }
        self.finish_with_slot(slot, kind, dest)
    }

    /// Standalone `syscall` / `break`.
    pub(super) fn syscall(&mut self, instr: Instr) {
        self.imm.flush_all(&mut self.ir);
        let resume = if instr.category() == Category::Break {
            self.pc
        } else {
            self.pc.wrapping_add(4)
        };
        self.ir.write_const(IrOp::SetPcConst, 0, 0, resume);
        self.syscall_exit(&instr);
    }

    /// Emit the exit for a syscall or break once PC is set.
    fn syscall_exit(&mut self, instr: &Instr) {
        self.imm.flush_all(&mut self.ir);
        let op = if instr.category() == Category::Break {
            IrOp::Break
        } else {
            IrOp::Syscall
        };
        self.ir.write_const(op, 0, 0, op_syscall_code(instr.raw));
        self.done = true;
    }

    fn fetch_slot(&mut self) -> Result<Instr, CompileError> {
        let slot_pc = self.pc.wrapping_add(4);
        Ok(decode(self.fetch(slot_pc)?))
    }

    fn slot_kind(&self, branch: &Instr, slot: &Instr) -> DelaySlotKind {
        let kind = classify_delay_slot(branch, slot);
        if kind == DelaySlotKind::Nice && self.branch_opts_disabled() {
            DelaySlotKind::NotNice
        } else {
            kind
        }
    }

    /// Known constant: `r0` or a tracked GPR.
    fn is_known(&self, reg: u8) -> bool {
        reg < 32 && self.imm.is_imm(reg)
    }

    /// Copy branch operands to the latch temporaries.
    fn latch(&mut self, lhs: u8, rhs: u8) -> (u8, u8) {
        let mut out = [lhs, rhs];
        for (slot, (reg, latch)) in [(lhs, IRTEMP_LHS), (rhs, IRTEMP_RHS)].into_iter().enumerate() {
            if reg == 0 {
                continue;
            }
            if self.is_known(reg) {
                self.ir.set_const(latch, self.imm.imm(reg));
            } else {
                self.ir.write(IrOp::Mov, latch, reg, 0);
            }
            out[slot] = latch;
        }
        (out[0], out[1])
    }

    /// `PC = cond ? target : fallthrough` without leaving the block.
    fn select_pc(&mut self, cond: Cond, lhs: u8, rhs: u8, target: u32, fallthrough: u32) {
        self.imm.flush_all(&mut self.ir);
        let (t_target, t_pc, t_cond) = (temp(0), temp(1), temp(2));
        self.ir.set_const(t_target, target);
        self.ir.set_const(t_pc, fallthrough);
        // t_cond is zero exactly when the `MovZ` arms should pick the target.
        let pick_if_zero = match cond {
            Cond::Eq | Cond::Ne => {
                self.ir.write(IrOp::Xor, t_cond, lhs, rhs);
                cond == Cond::Eq
            }
            Cond::LtZ | Cond::GeZ => {
                self.ir.write_const(IrOp::SltConst, t_cond, lhs, 0);
                cond == Cond::GeZ
            }
            Cond::LeZ | Cond::GtZ => {
                self.ir.write_const(IrOp::SltConst, t_cond, lhs, 1);
                cond == Cond::GtZ
            }
        };
        let op = if pick_if_zero { IrOp::MovZ } else { IrOp::MovNZ };
        self.ir.write(op, t_pc, t_target, t_cond);
        self.ir.write(IrOp::SetPc, 0, t_pc, 0);
    }

    /// Compile the delay slot (when it runs) and leave for `dest`.
    fn finish_with_slot(&mut self, slot: Instr, kind: DelaySlotKind, dest: Dest) -> Result<(), CompileError> {
        if kind == DelaySlotKind::Syscall {
            let slot_pc = self.pc.wrapping_add(4);
            self.consume(slot_pc);
            self.imm.flush_all(&mut self.ir);
            match dest {
                Dest::Const(target) => self.ir.write_const(IrOp::SetPcConst, 0, 0, target),
                Dest::Reg(reg) => self.ir.write(IrOp::SetPc, 0, reg, 0),
                Dest::AlreadySet => {}
            }
            self.syscall_exit(&slot);
            return Ok(());
        }
        self.compile_slot(slot, kind)?;
        match dest {
            Dest::Const(target) => self.exit_to(target),
            Dest::Reg(reg) => {
                self.imm.flush_all(&mut self.ir);
                self.ir.write(IrOp::ExitToReg, 0, reg, 0);
                self.done = true;
            }
            Dest::AlreadySet => {
                self.imm.flush_all(&mut self.ir);
                self.done = true;
            }
        }
        Ok(())
    }

    /// Compile the instruction after the branch, unless it is itself a branch.
    fn compile_slot(&mut self, slot: Instr, kind: DelaySlotKind) -> Result<(), CompileError> {
        let branch_pc = self.pc;
        let slot_pc = branch_pc.wrapping_add(4);
        self.consume(slot_pc);
        if kind == DelaySlotKind::Branch {
            warn!(pc = format_args!("{slot_pc:#010x}"), "branch in delay slot ignored");
            return Ok(());
        }
        self.pc = slot_pc;
        let result = self.dispatch(slot);
        self.pc = branch_pc;
        result
    }
}

/// Where a branch leaves to after its delay slot.
#[derive(Clone, Copy, Debug)]
enum Dest {
    Const(u32),
    Reg(u8),
    /// PC was written by a select sequence.
    AlreadySet,
}
