//! IR opcodes and their operand metadata.

/// IR opcode.
///
/// Operand conventions (`dest`, `src1`, `src2`, `constant`) are described by
/// [`IrOp::meta`]. Loads use `dest <- [src1 + constant]`; stores read the
/// value to store from the `dest` field: `[src1 + constant] <- dest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IrOp {
    Nop,

    SetConst,
    SetConstF,
    Mov,

    Add,
    Sub,
    Neg,
    Not,
    And,
    Or,
    Xor,
    AddConst,
    AndConst,
    OrConst,
    XorConst,

    Slt,
    SltU,
    SltConst,
    SltUConst,

    Shl,
    Shr,
    Sar,
    Ror,
    ShlImm,
    ShrImm,
    SarImm,
    RorImm,

    MovZ,
    MovNZ,
    Max,
    Min,

    Clz,
    Ext8to32,
    Ext16to32,
    BSwap16,
    BSwap32,
    BitRev,

    Mult,
    MultU,
    Madd,
    MaddU,
    Msub,
    MsubU,
    Div,
    DivU,

    Load8,
    Load8Ext,
    Load16,
    Load16Ext,
    Load32,
    Load32Left,
    Load32Right,
    LoadFloat,
    Store8,
    Store16,
    Store32,
    Store32Left,
    Store32Right,
    StoreFloat,

    FAdd,
    FSub,
    FMul,
    FDiv,
    FSqrt,
    FNeg,
    FAbs,
    FMov,
    FRound,
    FTrunc,
    FCeil,
    FFloor,
    FCvtWS,
    FCvtSW,
    FCmp,
    FMovFromGpr,
    FMovToGpr,
    UpdateRoundingMode,

    Downcount,
    SetPc,
    SetPcConst,
    Syscall,
    Break,
    Interpret,

    ExitToConst,
    ExitToReg,
    ExitToConstIfEq,
    ExitToConstIfNeq,
    ExitToConstIfGtZ,
    ExitToConstIfGeZ,
    ExitToConstIfLtZ,
    ExitToConstIfLeZ,
}

/// Kind of value carried by an operand field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    /// Field unused.
    None,
    /// Integer-class IR register.
    Gpr,
    /// Float-class IR register.
    Fpr,
    /// Small immediate stored in the 8-bit field (shift amount, compare mode).
    Imm,
}

/// Category used by backends to route an instruction to a compile handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrCategory {
    Nop,
    Const,
    Arith,
    Logic,
    Shift,
    Compare,
    CondMove,
    Bits,
    Mult,
    Div,
    Load,
    Store,
    FArith,
    FConvert,
    FCompare,
    FMove,
    System,
    Exit,
    Interpret,
}

/// The `dest` field is read as a source (stores).
pub const FLAG_DEST_IS_SRC: u16 = 1 << 0;
/// The `dest` field is both read and written (conditional moves).
pub const FLAG_DEST_READ: u16 = 1 << 1;
/// The instruction may leave the block.
pub const FLAG_EXIT: u16 = 1 << 2;
/// The exit is conditional; execution may continue after it.
pub const FLAG_COND_EXIT: u16 = 1 << 3;
/// Implicitly reads LO/HI.
pub const FLAG_READS_LOHI: u16 = 1 << 4;
/// Implicitly writes LO/HI.
pub const FLAG_WRITES_LOHI: u16 = 1 << 5;
/// Implicitly writes the FPU condition flag.
pub const FLAG_WRITES_FPCOND: u16 = 1 << 6;
/// Implicitly reads FCR31.
pub const FLAG_READS_FCR31: u16 = 1 << 7;
/// May read or write any register through guest state in memory.
pub const FLAG_OPAQUE: u16 = 1 << 8;
/// Accesses guest memory.
pub const FLAG_MEMORY: u16 = 1 << 9;

/// Operand layout of an opcode.
#[derive(Clone, Copy, Debug)]
pub struct IrMeta {
    pub name: &'static str,
    pub dest: Arg,
    pub src1: Arg,
    pub src2: Arg,
    pub has_const: bool,
    pub flags: u16,
    pub category: IrCategory,
}

const fn meta(
    name: &'static str,
    category: IrCategory,
    dest: Arg,
    src1: Arg,
    src2: Arg,
    has_const: bool,
    flags: u16,
) -> IrMeta {
    IrMeta {
        name,
        dest,
        src1,
        src2,
        has_const,
        flags,
        category,
    }
}

impl IrOp {
    /// Operand metadata for this opcode.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub const fn meta(self) -> IrMeta {
        use Arg::{Fpr as F, Gpr as G, Imm as I, None as N};
        use IrCategory as C;

        match self {
            Self::Nop => meta("Nop", C::Nop, N, N, N, false, 0),

            Self::SetConst => meta("SetConst", C::Const, G, N, N, true, 0),
            Self::SetConstF => meta("SetConstF", C::Const, F, N, N, true, 0),
            Self::Mov => meta("Mov", C::Arith, G, G, N, false, 0),

            Self::Add => meta("Add", C::Arith, G, G, G, false, 0),
            Self::Sub => meta("Sub", C::Arith, G, G, G, false, 0),
            Self::Neg => meta("Neg", C::Arith, G, G, N, false, 0),
            Self::Not => meta("Not", C::Logic, G, G, N, false, 0),
            Self::And => meta("And", C::Logic, G, G, G, false, 0),
            Self::Or => meta("Or", C::Logic, G, G, G, false, 0),
            Self::Xor => meta("Xor", C::Logic, G, G, G, false, 0),
            Self::AddConst => meta("AddConst", C::Arith, G, G, N, true, 0),
            Self::AndConst => meta("AndConst", C::Logic, G, G, N, true, 0),
            Self::OrConst => meta("OrConst", C::Logic, G, G, N, true, 0),
            Self::XorConst => meta("XorConst", C::Logic, G, G, N, true, 0),

            Self::Slt => meta("Slt", C::Compare, G, G, G, false, 0),
            Self::SltU => meta("SltU", C::Compare, G, G, G, false, 0),
            Self::SltConst => meta("SltConst", C::Compare, G, G, N, true, 0),
            Self::SltUConst => meta("SltUConst", C::Compare, G, G, N, true, 0),

            Self::Shl => meta("Shl", C::Shift, G, G, G, false, 0),
            Self::Shr => meta("Shr", C::Shift, G, G, G, false, 0),
            Self::Sar => meta("Sar", C::Shift, G, G, G, false, 0),
            Self::Ror => meta("Ror", C::Shift, G, G, G, false, 0),
            Self::ShlImm => meta("ShlImm", C::Shift, G, G, I, false, 0),
            Self::ShrImm => meta("ShrImm", C::Shift, G, G, I, false, 0),
            Self::SarImm => meta("SarImm", C::Shift, G, G, I, false, 0),
            Self::RorImm => meta("RorImm", C::Shift, G, G, I, false, 0),

            Self::MovZ => meta("MovZ", C::CondMove, G, G, G, false, FLAG_DEST_READ),
            Self::MovNZ => meta("MovNZ", C::CondMove, G, G, G, false, FLAG_DEST_READ),
            Self::Max => meta("Max", C::CondMove, G, G, G, false, 0),
            Self::Min => meta("Min", C::CondMove, G, G, G, false, 0),

            Self::Clz => meta("Clz", C::Bits, G, G, N, false, 0),
            Self::Ext8to32 => meta("Ext8to32", C::Bits, G, G, N, false, 0),
            Self::Ext16to32 => meta("Ext16to32", C::Bits, G, G, N, false, 0),
            Self::BSwap16 => meta("BSwap16", C::Bits, G, G, N, false, 0),
            Self::BSwap32 => meta("BSwap32", C::Bits, G, G, N, false, 0),
            Self::BitRev => meta("BitRev", C::Bits, G, G, N, false, 0),

            Self::Mult => meta("Mult", C::Mult, N, G, G, false, FLAG_WRITES_LOHI),
            Self::MultU => meta("MultU", C::Mult, N, G, G, false, FLAG_WRITES_LOHI),
            Self::Madd => meta("Madd", C::Mult, N, G, G, false, FLAG_READS_LOHI | FLAG_WRITES_LOHI),
            Self::MaddU => meta("MaddU", C::Mult, N, G, G, false, FLAG_READS_LOHI | FLAG_WRITES_LOHI),
            Self::Msub => meta("Msub", C::Mult, N, G, G, false, FLAG_READS_LOHI | FLAG_WRITES_LOHI),
            Self::MsubU => meta("MsubU", C::Mult, N, G, G, false, FLAG_READS_LOHI | FLAG_WRITES_LOHI),
            Self::Div => meta("Div", C::Div, N, G, G, false, FLAG_WRITES_LOHI),
            Self::DivU => meta("DivU", C::Div, N, G, G, false, FLAG_WRITES_LOHI),

            Self::Load8 => meta("Load8", C::Load, G, G, N, true, FLAG_MEMORY),
            Self::Load8Ext => meta("Load8Ext", C::Load, G, G, N, true, FLAG_MEMORY),
            Self::Load16 => meta("Load16", C::Load, G, G, N, true, FLAG_MEMORY),
            Self::Load16Ext => meta("Load16Ext", C::Load, G, G, N, true, FLAG_MEMORY),
            Self::Load32 => meta("Load32", C::Load, G, G, N, true, FLAG_MEMORY),
            Self::Load32Left => meta("Load32Left", C::Load, G, G, N, true, FLAG_MEMORY | FLAG_DEST_READ),
            Self::Load32Right => meta("Load32Right", C::Load, G, G, N, true, FLAG_MEMORY | FLAG_DEST_READ),
            Self::LoadFloat => meta("LoadFloat", C::Load, F, G, N, true, FLAG_MEMORY),
            Self::Store8 => meta("Store8", C::Store, G, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),
            Self::Store16 => meta("Store16", C::Store, G, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),
            Self::Store32 => meta("Store32", C::Store, G, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),
            Self::Store32Left => meta("Store32Left", C::Store, G, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),
            Self::Store32Right => meta("Store32Right", C::Store, G, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),
            Self::StoreFloat => meta("StoreFloat", C::Store, F, G, N, true, FLAG_MEMORY | FLAG_DEST_IS_SRC),

            Self::FAdd => meta("FAdd", C::FArith, F, F, F, false, 0),
            Self::FSub => meta("FSub", C::FArith, F, F, F, false, 0),
            Self::FMul => meta("FMul", C::FArith, F, F, F, false, 0),
            Self::FDiv => meta("FDiv", C::FArith, F, F, F, false, 0),
            Self::FSqrt => meta("FSqrt", C::FArith, F, F, N, false, 0),
            Self::FNeg => meta("FNeg", C::FArith, F, F, N, false, 0),
            Self::FAbs => meta("FAbs", C::FArith, F, F, N, false, 0),
            Self::FMov => meta("FMov", C::FMove, F, F, N, false, 0),
            Self::FRound => meta("FRound", C::FConvert, F, F, N, false, 0),
            Self::FTrunc => meta("FTrunc", C::FConvert, F, F, N, false, 0),
            Self::FCeil => meta("FCeil", C::FConvert, F, F, N, false, 0),
            Self::FFloor => meta("FFloor", C::FConvert, F, F, N, false, 0),
            Self::FCvtWS => meta("FCvtWS", C::FConvert, F, F, N, false, FLAG_READS_FCR31),
            Self::FCvtSW => meta("FCvtSW", C::FConvert, F, F, N, false, 0),
            Self::FCmp => meta("FCmp", C::FCompare, I, F, F, false, FLAG_WRITES_FPCOND),
            Self::FMovFromGpr => meta("FMovFromGpr", C::FMove, F, G, N, false, 0),
            Self::FMovToGpr => meta("FMovToGpr", C::FMove, G, F, N, false, 0),
            Self::UpdateRoundingMode => meta("UpdateRoundingMode", C::System, N, N, N, false, FLAG_READS_FCR31),

            Self::Downcount => meta("Downcount", C::System, N, N, N, true, 0),
            Self::SetPc => meta("SetPc", C::System, N, G, N, false, 0),
            Self::SetPcConst => meta("SetPcConst", C::System, N, N, N, true, 0),
            Self::Syscall => meta("Syscall", C::Exit, N, N, N, true, FLAG_EXIT),
            Self::Break => meta("Break", C::Exit, N, N, N, true, FLAG_EXIT),
            Self::Interpret => meta("Interpret", C::Interpret, N, N, N, true, FLAG_OPAQUE | FLAG_MEMORY),

            Self::ExitToConst => meta("ExitToConst", C::Exit, N, N, N, true, FLAG_EXIT),
            Self::ExitToReg => meta("ExitToReg", C::Exit, N, G, N, false, FLAG_EXIT),
            Self::ExitToConstIfEq => meta("ExitToConstIfEq", C::Exit, N, G, G, true, FLAG_EXIT | FLAG_COND_EXIT),
            Self::ExitToConstIfNeq => meta("ExitToConstIfNeq", C::Exit, N, G, G, true, FLAG_EXIT | FLAG_COND_EXIT),
            Self::ExitToConstIfGtZ => meta("ExitToConstIfGtZ", C::Exit, N, G, N, true, FLAG_EXIT | FLAG_COND_EXIT),
            Self::ExitToConstIfGeZ => meta("ExitToConstIfGeZ", C::Exit, N, G, N, true, FLAG_EXIT | FLAG_COND_EXIT),
            Self::ExitToConstIfLtZ => meta("ExitToConstIfLtZ", C::Exit, N, G, N, true, FLAG_EXIT | FLAG_COND_EXIT),
            Self::ExitToConstIfLeZ => meta("ExitToConstIfLeZ", C::Exit, N, G, N, true, FLAG_EXIT | FLAG_COND_EXIT),
        }
    }

    /// Mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.meta().name
    }

    /// Compile-handler category.
    #[must_use]
    pub const fn category(self) -> IrCategory {
        self.meta().category
    }

    /// Whether this opcode may leave the block.
    #[must_use]
    pub const fn is_exit(self) -> bool {
        self.meta().flags & FLAG_EXIT != 0
    }

    /// Whether this is an exit with a compile-time constant target.
    #[must_use]
    pub const fn is_const_exit(self) -> bool {
        matches!(
            self,
            Self::ExitToConst
                | Self::ExitToConstIfEq
                | Self::ExitToConstIfNeq
                | Self::ExitToConstIfGtZ
                | Self::ExitToConstIfGeZ
                | Self::ExitToConstIfLtZ
                | Self::ExitToConstIfLeZ
        )
    }

    /// Whether this opcode ends the block unconditionally.
    #[must_use]
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Self::ExitToConst | Self::ExitToReg | Self::Syscall | Self::Break
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_reads_dest() {
        let m = IrOp::Store32.meta();
        assert_ne!(m.flags & FLAG_DEST_IS_SRC, 0);
        assert_eq!(m.dest, Arg::Gpr);
        assert_eq!(m.category, IrCategory::Store);
    }

    #[test]
    fn test_exit_classification() {
        assert!(IrOp::ExitToConst.is_exit());
        assert!(IrOp::ExitToConst.ends_block());
        assert!(IrOp::ExitToConstIfEq.is_exit());
        assert!(!IrOp::ExitToConstIfEq.ends_block());
        assert!(IrOp::ExitToConstIfLeZ.is_const_exit());
        assert!(!IrOp::ExitToReg.is_const_exit());
        assert!(!IrOp::Add.is_exit());
    }

    #[test]
    fn test_names_unique_for_sample() {
        assert_eq!(IrOp::SetConst.name(), "SetConst");
        assert_eq!(IrOp::FCvtWS.name(), "FCvtWS");
        assert_eq!(IrOp::Interpret.category(), IrCategory::Interpret);
    }
}
