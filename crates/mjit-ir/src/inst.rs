//! Fixed-width IR instruction.

use crate::op::{FLAG_DEST_IS_SRC, FLAG_DEST_READ, IrOp};
use crate::reg::IrReg;

/// One IR instruction.
///
/// 32-bit integer and f32 constants live in `constant`; f32 values are stored
/// as their raw bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IrInst {
    pub op: IrOp,
    pub dest: IrReg,
    pub src1: IrReg,
    pub src2: IrReg,
    pub constant: u32,
}

impl IrInst {
    /// Create an instruction with no constant.
    #[must_use]
    pub const fn new(op: IrOp, dest: IrReg, src1: IrReg, src2: IrReg) -> Self {
        Self {
            op,
            dest,
            src1,
            src2,
            constant: 0,
        }
    }

    /// Create an instruction carrying a constant.
    #[must_use]
    pub const fn with_const(op: IrOp, dest: IrReg, src1: IrReg, constant: u32) -> Self {
        Self {
            op,
            dest,
            src1,
            src2: 0,
            constant,
        }
    }

    /// Constant interpreted as an f32.
    #[must_use]
    pub const fn const_f32(&self) -> f32 {
        f32::from_bits(self.constant)
    }

    /// Whether the `dest` field names a register that this instruction reads.
    #[must_use]
    pub const fn dest_is_read(&self) -> bool {
        self.op.meta().flags & (FLAG_DEST_IS_SRC | FLAG_DEST_READ) != 0
    }

    /// Whether the `dest` field names a register that this instruction writes.
    #[must_use]
    pub const fn dest_is_written(&self) -> bool {
        let meta = self.op.meta();
        !matches!(meta.dest, crate::op::Arg::None | crate::op::Arg::Imm)
            && meta.flags & FLAG_DEST_IS_SRC == 0
    }

    /// Pack the register fields and opcode into one word.
    ///
    /// Layout: `op | dest << 8 | src1 << 16 | src2 << 24`. Used by native
    /// backends to pass an instruction to a helper in two registers.
    #[must_use]
    pub const fn pack(&self) -> u32 {
        (self.op as u32)
            | ((self.dest as u32) << 8)
            | ((self.src1 as u32) << 16)
            | ((self.src2 as u32) << 24)
    }

    /// Inverse of [`IrInst::pack`].
    #[must_use]
    pub fn unpack(word: u32, constant: u32) -> Option<Self> {
        let op = IrOp::from_u8((word & 0xFF) as u8)?;
        Some(Self {
            op,
            dest: (word >> 8) as u8,
            src1: (word >> 16) as u8,
            src2: (word >> 24) as u8,
            constant,
        })
    }
}

impl IrOp {
    /// Opcode from its discriminant.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        ALL_OPS.get(usize::from(value)).copied()
    }
}

/// Every opcode, indexed by discriminant.
pub const ALL_OPS: &[IrOp] = &[
    IrOp::Nop,
    IrOp::SetConst,
    IrOp::SetConstF,
    IrOp::Mov,
    IrOp::Add,
    IrOp::Sub,
    IrOp::Neg,
    IrOp::Not,
    IrOp::And,
    IrOp::Or,
    IrOp::Xor,
    IrOp::AddConst,
    IrOp::AndConst,
    IrOp::OrConst,
    IrOp::XorConst,
    IrOp::Slt,
    IrOp::SltU,
    IrOp::SltConst,
    IrOp::SltUConst,
    IrOp::Shl,
    IrOp::Shr,
    IrOp::Sar,
    IrOp::Ror,
    IrOp::ShlImm,
    IrOp::ShrImm,
    IrOp::SarImm,
    IrOp::RorImm,
    IrOp::MovZ,
    IrOp::MovNZ,
    IrOp::Max,
    IrOp::Min,
    IrOp::Clz,
    IrOp::Ext8to32,
    IrOp::Ext16to32,
    IrOp::BSwap16,
    IrOp::BSwap32,
    IrOp::BitRev,
    IrOp::Mult,
    IrOp::MultU,
    IrOp::Madd,
    IrOp::MaddU,
    IrOp::Msub,
    IrOp::MsubU,
    IrOp::Div,
    IrOp::DivU,
    IrOp::Load8,
    IrOp::Load8Ext,
    IrOp::Load16,
    IrOp::Load16Ext,
    IrOp::Load32,
    IrOp::Load32Left,
    IrOp::Load32Right,
    IrOp::LoadFloat,
    IrOp::Store8,
    IrOp::Store16,
    IrOp::Store32,
    IrOp::Store32Left,
    IrOp::Store32Right,
    IrOp::StoreFloat,
    IrOp::FAdd,
    IrOp::FSub,
    IrOp::FMul,
    IrOp::FDiv,
    IrOp::FSqrt,
    IrOp::FNeg,
    IrOp::FAbs,
    IrOp::FMov,
    IrOp::FRound,
    IrOp::FTrunc,
    IrOp::FCeil,
    IrOp::FFloor,
    IrOp::FCvtWS,
    IrOp::FCvtSW,
    IrOp::FCmp,
    IrOp::FMovFromGpr,
    IrOp::FMovToGpr,
    IrOp::UpdateRoundingMode,
    IrOp::Downcount,
    IrOp::SetPc,
    IrOp::SetPcConst,
    IrOp::Syscall,
    IrOp::Break,
    IrOp::Interpret,
    IrOp::ExitToConst,
    IrOp::ExitToReg,
    IrOp::ExitToConstIfEq,
    IrOp::ExitToConstIfNeq,
    IrOp::ExitToConstIfGtZ,
    IrOp::ExitToConstIfGeZ,
    IrOp::ExitToConstIfLtZ,
    IrOp::ExitToConstIfLeZ,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ops_indexed_by_discriminant() {
        for (i, op) in ALL_OPS.iter().enumerate() {
            assert_eq!(*op as usize, i, "{op:?}");
        }
        assert_eq!(IrOp::from_u8(ALL_OPS.len() as u8), None);
    }

    #[test]
    fn test_pack_unpack() {
        let inst = IrInst::new(IrOp::Add, 3, 4, 5);
        let word = inst.pack();
        assert_eq!(IrInst::unpack(word, 0), Some(inst));
    }

    #[test]
    fn test_store_dest_is_read_not_written() {
        let st = IrInst::with_const(IrOp::Store32, 2, 29, 16);
        assert!(st.dest_is_read());
        assert!(!st.dest_is_written());

        let movz = IrInst::new(IrOp::MovZ, 1, 2, 3);
        assert!(movz.dest_is_read());
        assert!(movz.dest_is_written());

        let cmp = IrInst::new(IrOp::FCmp, 6, 64, 65);
        assert!(!cmp.dest_is_written());
    }

    #[test]
    fn test_const_f32() {
        let inst = IrInst::with_const(IrOp::SetConstF, 64, 0, 1.5f32.to_bits());
        assert!((inst.const_f32() - 1.5).abs() < f32::EPSILON);
    }
}
