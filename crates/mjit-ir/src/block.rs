//! Translated block IR.

use crate::error::IrError;
use crate::inst::IrInst;
use crate::op::{Arg, IrOp};
use crate::reg::{IRREG_ZERO, IrReg, RegClass, class_of};

/// IR for one guest block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrBlock {
    /// Guest address of the first instruction.
    pub start: u32,
    /// Guest bytes covered, including a trailing delay slot.
    pub guest_bytes: u32,
    /// Guest instructions covered.
    pub guest_instrs: u32,
    /// IR instructions.
    pub insts: Vec<IrInst>,
}

impl IrBlock {
    /// Create a block.
    #[must_use]
    pub const fn new(start: u32, guest_bytes: u32, guest_instrs: u32, insts: Vec<IrInst>) -> Self {
        Self {
            start,
            guest_bytes,
            guest_instrs,
            insts,
        }
    }

    /// Guest address one past the last covered byte.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start.wrapping_add(self.guest_bytes)
    }

    /// Whether `[addr, addr + len)` overlaps this block's guest range.
    #[must_use]
    pub const fn overlaps(&self, addr: u32, len: u32) -> bool {
        let a0 = addr as u64;
        let a1 = a0 + len as u64;
        let b0 = self.start as u64;
        let b1 = b0 + self.guest_bytes as u64;
        len != 0 && a0 < b1 && b0 < a1
    }

    /// Cycles charged by the leading `Downcount`, if any.
    #[must_use]
    pub fn downcount(&self) -> Option<u32> {
        self.insts
            .iter()
            .find(|i| i.op == IrOp::Downcount)
            .map(|i| i.constant)
    }

    /// Constant-target exits in program order, with their IR index.
    pub fn const_exits(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op.is_const_exit())
            .map(|(idx, i)| (idx, i.constant))
    }

    /// Check operand register classes and termination.
    ///
    /// # Errors
    ///
    /// Returns the first malformed instruction found.
    pub fn validate(&self) -> Result<(), IrError> {
        for (index, inst) in self.insts.iter().enumerate() {
            let meta = inst.op.meta();
            let fields = [(meta.dest, inst.dest), (meta.src1, inst.src1), (meta.src2, inst.src2)];
            for (arg, reg) in fields {
                if !class_matches(arg, reg) {
                    return Err(IrError::BadRegClass { index, op: inst.op, reg });
                }
            }
            if inst.dest_is_written() && meta.dest == Arg::Gpr && inst.dest == IRREG_ZERO {
                return Err(IrError::WritesZero { index, op: inst.op });
            }
        }
        match self.insts.last() {
            Some(last) if last.op.ends_block() => Ok(()),
            _ => Err(IrError::MissingExit),
        }
    }

    /// Number of IR instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

fn class_matches(arg: Arg, reg: IrReg) -> bool {
    match arg {
        Arg::Gpr => class_of(reg) == Some(RegClass::Gpr),
        Arg::Fpr => class_of(reg) == Some(RegClass::Fpr),
        Arg::None | Arg::Imm => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::IrWriter;

    fn sample() -> IrBlock {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 3);
        w.write_full(IrOp::ExitToConstIfEq, 0, 1, 2, 0x100);
        w.exit_to_const(0x10C);
        IrBlock::new(0x100, 12, 3, w.into_insts())
    }

    #[test]
    fn test_block_bounds() {
        let b = sample();
        assert_eq!(b.end(), 0x10C);
        assert!(b.overlaps(0x108, 4));
        assert!(b.overlaps(0xFC, 8));
        assert!(!b.overlaps(0x10C, 4));
        assert!(!b.overlaps(0xF0, 0x10));
        assert!(!b.overlaps(0x104, 0));
    }

    #[test]
    fn test_validate() {
        assert_eq!(sample().validate(), Ok(()));

        let bad = IrBlock::new(0, 4, 1, vec![IrInst::new(IrOp::FAdd, 1, 64, 65)]);
        assert!(matches!(bad.validate(), Err(IrError::BadRegClass { reg: 1, .. })));

        let zero = IrBlock::new(0, 4, 1, vec![IrInst::with_const(IrOp::SetConst, 0, 0, 1)]);
        assert!(matches!(zero.validate(), Err(IrError::WritesZero { .. })));

        let open = IrBlock::new(0, 4, 1, vec![IrInst::with_const(IrOp::Downcount, 0, 0, 1)]);
        assert_eq!(open.validate(), Err(IrError::MissingExit));
    }

    #[test]
    fn test_block_downcount_and_exits() {
        let b = sample();
        assert_eq!(b.downcount(), Some(3));
        let exits: Vec<_> = b.const_exits().collect();
        assert_eq!(exits, vec![(1, 0x100), (2, 0x10C)]);
    }
}
