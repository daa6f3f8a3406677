//! Forward register-usage analysis over a block's IR.
//!
//! The register cache asks, for a guest register, what happens to it next:
//! is it read, overwritten without being read, or does the block leave
//! first. The answer drives spill decisions.

use crate::inst::IrInst;
use crate::op::{Arg, FLAG_OPAQUE, FLAG_READS_FCR31, FLAG_READS_LOHI, FLAG_WRITES_FPCOND, FLAG_WRITES_LOHI, IrOp};
use crate::reg::{IRREG_FCR31, IRREG_FPCOND, IRREG_HI, IRREG_LO, IRREG_ZERO, IrReg};

/// Next use of a register, as seen from some point in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegUsage {
    /// Overwritten before it is read. Its current value is dead.
    Clobbered,
    /// Read before any write.
    Read,
    /// Not touched before the block may exit.
    Unused,
    /// Lookahead window exhausted without a decision.
    Unknown,
}

/// Whether `inst` reads `reg`.
#[must_use]
pub fn reads_reg(inst: &IrInst, reg: IrReg) -> bool {
    let meta = inst.op.meta();
    if meta.flags & FLAG_OPAQUE != 0 {
        return true;
    }
    if reg_arg(meta.src1) && inst.src1 == reg {
        return true;
    }
    if reg_arg(meta.src2) && inst.src2 == reg {
        return true;
    }
    if reg_arg(meta.dest) && inst.dest_is_read() && inst.dest == reg {
        return true;
    }
    if meta.flags & FLAG_READS_LOHI != 0 && (reg == IRREG_LO || reg == IRREG_HI) {
        return true;
    }
    if meta.flags & FLAG_READS_FCR31 != 0 && reg == IRREG_FCR31 {
        return true;
    }
    false
}

/// Whether `inst` writes `reg`.
#[must_use]
pub fn writes_reg(inst: &IrInst, reg: IrReg) -> bool {
    let meta = inst.op.meta();
    if meta.flags & FLAG_OPAQUE != 0 {
        return true;
    }
    if inst.dest_is_written() && inst.dest == reg {
        return true;
    }
    if meta.flags & FLAG_WRITES_LOHI != 0 && (reg == IRREG_LO || reg == IRREG_HI) {
        return true;
    }
    meta.flags & FLAG_WRITES_FPCOND != 0 && reg == IRREG_FPCOND
}

const fn reg_arg(arg: Arg) -> bool {
    matches!(arg, Arg::Gpr | Arg::Fpr)
}

/// Scan forward from `insts[from]` (inclusive) for the next use of `reg`.
///
/// A read anywhere in an instruction wins over a write in the same
/// instruction. Exits and opaque instructions end the scan with
/// [`RegUsage::Unused`]: the register's value must be in guest state there,
/// which the cache guarantees by flushing at every exit.
#[must_use]
pub fn next_usage(insts: &[IrInst], from: usize, reg: IrReg, window: usize) -> RegUsage {
    if reg == IRREG_ZERO {
        return RegUsage::Unused;
    }
    for inst in insts.iter().skip(from).take(window) {
        if inst.op == IrOp::Interpret {
            return RegUsage::Unused;
        }
        if reads_reg(inst, reg) {
            return RegUsage::Read;
        }
        if inst.op.is_exit() {
            return RegUsage::Unused;
        }
        if writes_reg(inst, reg) {
            return RegUsage::Clobbered;
        }
    }
    if from + window >= insts.len() {
        RegUsage::Unused
    } else {
        RegUsage::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::IrWriter;

    fn block() -> Vec<IrInst> {
        let mut w = IrWriter::new();
        w.write(IrOp::Add, 1, 2, 3); // 0
        w.set_const(4, 9); // 1
        w.write(IrOp::Mult, 0, 1, 4); // 2
        w.write_const(IrOp::Store32, 5, 29, 0); // 3
        w.exit_to_const(0x40); // 4
        w.into_insts()
    }

    #[test]
    fn test_next_usage_read() {
        let insts = block();
        assert_eq!(next_usage(&insts, 0, 2, 30), RegUsage::Read);
        assert_eq!(next_usage(&insts, 1, 1, 30), RegUsage::Read);
        // Store reads its dest field.
        assert_eq!(next_usage(&insts, 0, 5, 30), RegUsage::Read);
    }

    #[test]
    fn test_next_usage_clobbered() {
        let insts = block();
        assert_eq!(next_usage(&insts, 0, 1, 30), RegUsage::Clobbered);
        assert_eq!(next_usage(&insts, 0, 4, 30), RegUsage::Clobbered);
        assert_eq!(next_usage(&insts, 0, IRREG_LO, 30), RegUsage::Clobbered);
    }

    #[test]
    fn test_next_usage_unused_and_unknown() {
        let insts = block();
        assert_eq!(next_usage(&insts, 0, 7, 30), RegUsage::Unused);
        assert_eq!(next_usage(&insts, 0, 7, 2), RegUsage::Unknown);
        assert_eq!(next_usage(&insts, 0, 0, 30), RegUsage::Unused);
    }

    #[test]
    fn test_madd_reads_lohi() {
        let inst = IrInst::new(IrOp::Madd, 0, 1, 2);
        assert!(reads_reg(&inst, IRREG_HI));
        assert!(writes_reg(&inst, IRREG_LO));
        let cmp = IrInst::new(IrOp::FCmp, 2, 64, 65);
        assert!(writes_reg(&cmp, IRREG_FPCOND));
        assert!(!writes_reg(&cmp, 2));
    }

    #[test]
    fn test_interpret_is_opaque() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Interpret, 0, 0, 0x0000_0000);
        w.set_const(3, 1);
        assert_eq!(next_usage(w.insts(), 0, 3, 30), RegUsage::Unused);
    }
}
