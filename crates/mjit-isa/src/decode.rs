//! Opcode decoding and classification.

use mjit_ir::reg::{IRREG_FCR31, IRREG_FPCOND, IRREG_FPR_BASE, IRREG_HI, IRREG_LO, IRREG_RA};

use crate::emuhack::Sentinel;
use crate::fields::{op_func, op_primary, op_rd, op_rs, op_rt, op_sa};

/// Decoded instruction mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MipsOp {
    Invalid,
    Nop,

    Sll,
    Srl,
    Sra,
    Rotr,
    Sllv,
    Srlv,
    Srav,
    Rotrv,
    Jr,
    Jalr,
    Movz,
    Movn,
    Syscall,
    Break,
    Sync,
    Mfhi,
    Mthi,
    Mflo,
    Mtlo,
    Clz,
    Clo,
    Mult,
    Multu,
    Div,
    Divu,
    Madd,
    Maddu,
    Msub,
    Msubu,
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Max,
    Min,

    Bltz,
    Bgez,
    Bltzl,
    Bgezl,
    Bltzal,
    Bgezal,
    Bltzall,
    Bgezall,

    J,
    Jal,
    Beq,
    Bne,
    Blez,
    Bgtz,
    Beql,
    Bnel,
    Blezl,
    Bgtzl,

    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,

    Cop0,

    Mfc1,
    Cfc1,
    Mtc1,
    Ctc1,
    Bc1f,
    Bc1t,
    Bc1fl,
    Bc1tl,
    AddS,
    SubS,
    MulS,
    DivS,
    SqrtS,
    AbsS,
    MovS,
    NegS,
    RoundWS,
    TruncWS,
    CeilWS,
    FloorWS,
    CvtWS,
    CvtSW,
    CmpS,

    Ext,
    Ins,
    Wsbh,
    Wsbw,
    Seb,
    Seh,
    Bitrev,

    Lb,
    Lh,
    Lwl,
    Lw,
    Lbu,
    Lhu,
    Lwr,
    Sb,
    Sh,
    Swl,
    Sw,
    Swr,
    Cache,
    Ll,
    Sc,
    Lwc1,
    Swc1,

    Vfpu,
    Emuhack,
}

/// Coarse opcode class used to pick a compile handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Alu,
    Shift,
    Branch,
    Jump,
    MulDiv,
    LoadStore,
    Fpu,
    FpuBranch,
    Vector,
    Syscall,
    Break,
    Cop0,
    Special3,
    Nop,
    Invalid,
}

pub const IN_RS: u32 = 1 << 0;
pub const IN_RT: u32 = 1 << 1;
/// Reads `rd` (conditional moves keep the old value).
pub const IN_RD: u32 = 1 << 2;
pub const OUT_RD: u32 = 1 << 3;
pub const OUT_RT: u32 = 1 << 4;
/// Writes the link register (`ra`, or `rd` for `jalr`).
pub const OUT_RA: u32 = 1 << 5;
pub const IN_LO: u32 = 1 << 6;
pub const IN_HI: u32 = 1 << 7;
pub const OUT_LO: u32 = 1 << 8;
pub const OUT_HI: u32 = 1 << 9;
pub const IN_FS: u32 = 1 << 10;
pub const IN_FT: u32 = 1 << 11;
pub const OUT_FD: u32 = 1 << 12;
pub const OUT_FS: u32 = 1 << 13;
pub const OUT_FT: u32 = 1 << 14;
pub const IN_FPUFLAG: u32 = 1 << 15;
pub const OUT_FPUFLAG: u32 = 1 << 16;
pub const IN_FCR: u32 = 1 << 17;
pub const OUT_FCR: u32 = 1 << 18;
pub const IS_CONDBRANCH: u32 = 1 << 19;
pub const IS_JUMP: u32 = 1 << 20;
pub const LIKELY: u32 = 1 << 21;
pub const DELAYSLOT: u32 = 1 << 22;
pub const IN_MEM: u32 = 1 << 23;
pub const OUT_MEM: u32 = 1 << 24;
/// Reads `rs` as a jump target.
pub const IS_JUMP_REG: u32 = 1 << 25;

impl MipsOp {
    /// Compile-handler class.
    #[must_use]
    pub const fn category(self) -> Category {
        use MipsOp as M;
        match self {
            M::Invalid => Category::Invalid,
            M::Nop | M::Sync | M::Cache => Category::Nop,
            M::Sll | M::Srl | M::Sra | M::Rotr | M::Sllv | M::Srlv | M::Srav | M::Rotrv => Category::Shift,
            M::Jr | M::Jalr | M::J | M::Jal => Category::Jump,
            M::Movz
            | M::Movn
            | M::Clz
            | M::Clo
            | M::Add
            | M::Addu
            | M::Sub
            | M::Subu
            | M::And
            | M::Or
            | M::Xor
            | M::Nor
            | M::Slt
            | M::Sltu
            | M::Max
            | M::Min
            | M::Addi
            | M::Addiu
            | M::Slti
            | M::Sltiu
            | M::Andi
            | M::Ori
            | M::Xori
            | M::Lui => Category::Alu,
            M::Syscall => Category::Syscall,
            M::Break => Category::Break,
            M::Mfhi
            | M::Mthi
            | M::Mflo
            | M::Mtlo
            | M::Mult
            | M::Multu
            | M::Div
            | M::Divu
            | M::Madd
            | M::Maddu
            | M::Msub
            | M::Msubu => Category::MulDiv,
            M::Bltz
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
            | M::Bgtzl => Category::Branch,
            M::Cop0 => Category::Cop0,
            M::Bc1f | M::Bc1t | M::Bc1fl | M::Bc1tl => Category::FpuBranch,
            M::Mfc1
            | M::Cfc1
            | M::Mtc1
            | M::Ctc1
            | M::AddS
            | M::SubS
            | M::MulS
            | M::DivS
            | M::SqrtS
            | M::AbsS
            | M::MovS
            | M::NegS
            | M::RoundWS
            | M::TruncWS
            | M::CeilWS
            | M::FloorWS
            | M::CvtWS
            | M::CvtSW
            | M::CmpS => Category::Fpu,
            M::Ext | M::Ins | M::Wsbh | M::Wsbw | M::Seb | M::Seh | M::Bitrev => Category::Special3,
            M::Lb
            | M::Lh
            | M::Lwl
            | M::Lw
            | M::Lbu
            | M::Lhu
            | M::Lwr
            | M::Sb
            | M::Sh
            | M::Swl
            | M::Sw
            | M::Swr
            | M::Ll
            | M::Sc
            | M::Lwc1
            | M::Swc1 => Category::LoadStore,
            M::Vfpu => Category::Vector,
            M::Emuhack => Category::Invalid,
        }
    }

    /// Register and control-flow flags.
    #[must_use]
    pub const fn info(self) -> u32 {
        use MipsOp as M;
        match self {
            M::Invalid | M::Nop | M::Sync | M::Cache | M::Cop0 | M::Vfpu | M::Emuhack => 0,
            M::Syscall | M::Break => 0,

            M::Sll | M::Srl | M::Sra | M::Rotr => IN_RT | OUT_RD,
            M::Sllv | M::Srlv | M::Srav | M::Rotrv => IN_RS | IN_RT | OUT_RD,
            M::Jr => IN_RS | IS_JUMP | IS_JUMP_REG | DELAYSLOT,
            M::Jalr => IN_RS | OUT_RA | IS_JUMP | IS_JUMP_REG | DELAYSLOT,
            M::Movz | M::Movn => IN_RS | IN_RT | IN_RD | OUT_RD,
            M::Mfhi => IN_HI | OUT_RD,
            M::Mflo => IN_LO | OUT_RD,
            M::Mthi => IN_RS | OUT_HI,
            M::Mtlo => IN_RS | OUT_LO,
            M::Clz | M::Clo => IN_RS | OUT_RD,
            M::Mult | M::Multu | M::Div | M::Divu => IN_RS | IN_RT | OUT_LO | OUT_HI,
            M::Madd | M::Maddu | M::Msub | M::Msubu => IN_RS | IN_RT | IN_LO | IN_HI | OUT_LO | OUT_HI,
            M::Add
            | M::Addu
            | M::Sub
            | M::Subu
            | M::And
            | M::Or
            | M::Xor
            | M::Nor
            | M::Slt
            | M::Sltu
            | M::Max
            | M::Min => IN_RS | IN_RT | OUT_RD,

            M::Bltz | M::Bgez | M::Blez | M::Bgtz => IN_RS | IS_CONDBRANCH | DELAYSLOT,
            M::Bltzl | M::Bgezl | M::Blezl | M::Bgtzl => IN_RS | IS_CONDBRANCH | DELAYSLOT | LIKELY,
            M::Bltzal | M::Bgezal => IN_RS | IS_CONDBRANCH | DELAYSLOT | OUT_RA,
            M::Bltzall | M::Bgezall => IN_RS | IS_CONDBRANCH | DELAYSLOT | OUT_RA | LIKELY,
            M::Beq | M::Bne => IN_RS | IN_RT | IS_CONDBRANCH | DELAYSLOT,
            M::Beql | M::Bnel => IN_RS | IN_RT | IS_CONDBRANCH | DELAYSLOT | LIKELY,
            M::J => IS_JUMP | DELAYSLOT,
            M::Jal => IS_JUMP | DELAYSLOT | OUT_RA,

            M::Addi | M::Addiu | M::Slti | M::Sltiu | M::Andi | M::Ori | M::Xori => IN_RS | OUT_RT,
            M::Lui => OUT_RT,

            M::Mfc1 => IN_FS | OUT_RT,
            M::Mtc1 => IN_RT | OUT_FS,
            M::Cfc1 => IN_FCR | IN_FPUFLAG | OUT_RT,
            M::Ctc1 => IN_RT | OUT_FCR | OUT_FPUFLAG,
            M::Bc1f | M::Bc1t => IN_FPUFLAG | IS_CONDBRANCH | DELAYSLOT,
            M::Bc1fl | M::Bc1tl => IN_FPUFLAG | IS_CONDBRANCH | DELAYSLOT | LIKELY,
            M::AddS | M::SubS | M::MulS | M::DivS => IN_FS | IN_FT | OUT_FD,
            M::SqrtS | M::AbsS | M::MovS | M::NegS | M::RoundWS | M::TruncWS | M::CeilWS | M::FloorWS | M::CvtSW => {
                IN_FS | OUT_FD
            }
            M::CvtWS => IN_FS | OUT_FD | IN_FCR,
            M::CmpS => IN_FS | IN_FT | OUT_FPUFLAG,

            M::Ext => IN_RS | OUT_RT,
            M::Wsbh | M::Wsbw | M::Seb | M::Seh | M::Bitrev => IN_RT | OUT_RD,
            M::Ins => IN_RS | IN_RT | OUT_RT,

            M::Lb | M::Lh | M::Lw | M::Lbu | M::Lhu | M::Ll => IN_RS | IN_MEM | OUT_RT,
            M::Lwl | M::Lwr => IN_RS | IN_RT | IN_MEM | OUT_RT,
            M::Sb | M::Sh | M::Sw | M::Swl | M::Swr => IN_RS | IN_RT | OUT_MEM,
            M::Sc => IN_RS | IN_RT | OUT_MEM | OUT_RT,
            M::Lwc1 => IN_RS | IN_MEM | OUT_FT,
            M::Swc1 => IN_RS | IN_FT | OUT_MEM,
        }
    }

    /// Mnemonic as printed by the disassembler.
    #[must_use]
    pub fn name(self) -> String {
        let dbg = format!("{self:?}");
        let lower = dbg.to_ascii_lowercase();
        // FPU single-precision ops print as `add.s`, conversions as `cvt.w.s`.
        match self {
            Self::AddS | Self::SubS | Self::MulS | Self::DivS | Self::SqrtS | Self::AbsS | Self::MovS | Self::NegS => {
                format!("{}.s", &lower[..lower.len() - 1])
            }
            Self::RoundWS => "round.w.s".into(),
            Self::TruncWS => "trunc.w.s".into(),
            Self::CeilWS => "ceil.w.s".into(),
            Self::FloorWS => "floor.w.s".into(),
            Self::CvtWS => "cvt.w.s".into(),
            Self::CvtSW => "cvt.s.w".into(),
            Self::CmpS => "c.cond.s".into(),
            _ => lower,
        }
    }
}

/// A decoded instruction: mnemonic plus the raw word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Instr {
    pub op: MipsOp,
    pub raw: u32,
}

impl Instr {
    #[must_use]
    pub const fn category(&self) -> Category {
        self.op.category()
    }

    #[must_use]
    pub const fn info(&self) -> u32 {
        self.op.info()
    }

    #[must_use]
    pub const fn has_delay_slot(&self) -> bool {
        self.info() & DELAYSLOT != 0
    }

    #[must_use]
    pub const fn is_likely(&self) -> bool {
        self.info() & LIKELY != 0
    }

    /// Link register written by this instruction, if any.
    #[must_use]
    pub const fn link_reg(&self) -> Option<u8> {
        if self.info() & OUT_RA == 0 {
            return None;
        }
        match self.op {
            MipsOp::Jalr => Some(op_rd(self.raw)),
            _ => Some(IRREG_RA),
        }
    }

    /// IR registers read, as a bit set over IR register numbers.
    #[must_use]
    pub const fn reads(&self) -> u128 {
        let info = self.info();
        let raw = self.raw;
        let mut m = 0u128;
        if info & IN_RS != 0 {
            m |= 1 << op_rs(raw);
        }
        if info & IN_RT != 0 {
            m |= 1 << op_rt(raw);
        }
        if info & IN_RD != 0 {
            m |= 1 << op_rd(raw);
        }
        if info & IN_LO != 0 {
            m |= 1 << IRREG_LO;
        }
        if info & IN_HI != 0 {
            m |= 1 << IRREG_HI;
        }
        if info & IN_FS != 0 {
            m |= 1 << (IRREG_FPR_BASE + op_rd(raw));
        }
        if info & IN_FT != 0 {
            m |= 1 << (IRREG_FPR_BASE + op_rt(raw));
        }
        if info & IN_FPUFLAG != 0 {
            m |= 1 << IRREG_FPCOND;
        }
        if info & IN_FCR != 0 {
            m |= 1 << IRREG_FCR31;
        }
        m & !1
    }

    /// IR registers written, as a bit set over IR register numbers.
    #[must_use]
    pub const fn writes(&self) -> u128 {
        let info = self.info();
        let raw = self.raw;
        let mut m = 0u128;
        if info & OUT_RD != 0 {
            m |= 1 << op_rd(raw);
        }
        if info & OUT_RT != 0 {
            m |= 1 << op_rt(raw);
        }
        if let Some(link) = self.link_reg() {
            m |= 1 << link;
        }
        if info & OUT_LO != 0 {
            m |= 1 << IRREG_LO;
        }
        if info & OUT_HI != 0 {
            m |= 1 << IRREG_HI;
        }
        if info & OUT_FD != 0 {
            m |= 1 << (IRREG_FPR_BASE + op_sa(raw));
        }
        if info & OUT_FS != 0 {
            m |= 1 << (IRREG_FPR_BASE + op_rd(raw));
        }
        if info & OUT_FT != 0 {
            m |= 1 << (IRREG_FPR_BASE + op_rt(raw));
        }
        if info & OUT_FPUFLAG != 0 {
            m |= 1 << IRREG_FPCOND;
        }
        if info & OUT_FCR != 0 {
            m |= 1 << IRREG_FCR31;
        }
        m & !1
    }
}

/// Decode one opcode word.
///
/// Unknown encodings decode to [`MipsOp::Invalid`]; sentinels decode to
/// [`MipsOp::Emuhack`].
#[must_use]
pub fn decode(raw: u32) -> Instr {
    Instr {
        op: decode_op(raw),
        raw,
    }
}

fn decode_op(raw: u32) -> MipsOp {
    use MipsOp as M;
    if raw == 0 {
        return M::Nop;
    }
    if Sentinel::is_sentinel(raw) {
        return M::Emuhack;
    }
    match op_primary(raw) {
        0 => decode_special(raw),
        1 => decode_regimm(raw),
        2 => M::J,
        3 => M::Jal,
        4 => M::Beq,
        5 => M::Bne,
        6 if op_rt(raw) == 0 => M::Blez,
        7 if op_rt(raw) == 0 => M::Bgtz,
        8 => M::Addi,
        9 => M::Addiu,
        10 => M::Slti,
        11 => M::Sltiu,
        12 => M::Andi,
        13 => M::Ori,
        14 => M::Xori,
        15 => M::Lui,
        16 => M::Cop0,
        17 => decode_cop1(raw),
        20 => M::Beql,
        21 => M::Bnel,
        22 if op_rt(raw) == 0 => M::Blezl,
        23 if op_rt(raw) == 0 => M::Bgtzl,
        0x12 | 0x18 | 0x19 | 0x1B | 0x32 | 0x34 | 0x35 | 0x36 | 0x37 | 0x3A | 0x3C | 0x3D | 0x3E | 0x3F => M::Vfpu,
        0x1F => decode_special3(raw),
        0x20 => M::Lb,
        0x21 => M::Lh,
        0x22 => M::Lwl,
        0x23 => M::Lw,
        0x24 => M::Lbu,
        0x25 => M::Lhu,
        0x26 => M::Lwr,
        0x28 => M::Sb,
        0x29 => M::Sh,
        0x2A => M::Swl,
        0x2B => M::Sw,
        0x2E => M::Swr,
        0x2F => M::Cache,
        0x30 => M::Ll,
        0x31 => M::Lwc1,
        0x38 => M::Sc,
        0x39 => M::Swc1,
        _ => M::Invalid,
    }
}

fn decode_special(raw: u32) -> MipsOp {
    use MipsOp as M;
    match op_func(raw) {
        0 => M::Sll,
        2 if op_rs(raw) == 1 => M::Rotr,
        2 => M::Srl,
        3 => M::Sra,
        4 => M::Sllv,
        6 if op_sa(raw) == 1 => M::Rotrv,
        6 => M::Srlv,
        7 => M::Srav,
        8 => M::Jr,
        9 => M::Jalr,
        0x0A => M::Movz,
        0x0B => M::Movn,
        0x0C => M::Syscall,
        0x0D => M::Break,
        0x0F => M::Sync,
        0x10 => M::Mfhi,
        0x11 => M::Mthi,
        0x12 => M::Mflo,
        0x13 => M::Mtlo,
        0x16 => M::Clz,
        0x17 => M::Clo,
        0x18 => M::Mult,
        0x19 => M::Multu,
        0x1A => M::Div,
        0x1B => M::Divu,
        0x1C => M::Madd,
        0x1D => M::Maddu,
        0x20 => M::Add,
        0x21 => M::Addu,
        0x22 => M::Sub,
        0x23 => M::Subu,
        0x24 => M::And,
        0x25 => M::Or,
        0x26 => M::Xor,
        0x27 => M::Nor,
        0x2A => M::Slt,
        0x2B => M::Sltu,
        0x2C => M::Max,
        0x2D => M::Min,
        0x2E => M::Msub,
        0x2F => M::Msubu,
        _ => M::Invalid,
    }
}

fn decode_regimm(raw: u32) -> MipsOp {
    use MipsOp as M;
    match op_rt(raw) {
        0 => M::Bltz,
        1 => M::Bgez,
        2 => M::Bltzl,
        3 => M::Bgezl,
        16 => M::Bltzal,
        17 => M::Bgezal,
        18 => M::Bltzall,
        19 => M::Bgezall,
        _ => M::Invalid,
    }
}

fn decode_cop1(raw: u32) -> MipsOp {
    use MipsOp as M;
    match op_rs(raw) {
        0 => M::Mfc1,
        2 => M::Cfc1,
        4 => M::Mtc1,
        6 => M::Ctc1,
        8 => match op_rt(raw) {
            0 => M::Bc1f,
            1 => M::Bc1t,
            2 => M::Bc1fl,
            3 => M::Bc1tl,
            _ => M::Invalid,
        },
        16 => match op_func(raw) {
            0 => M::AddS,
            1 => M::SubS,
            2 => M::MulS,
            3 => M::DivS,
            4 => M::SqrtS,
            5 => M::AbsS,
            6 => M::MovS,
            7 => M::NegS,
            12 => M::RoundWS,
            13 => M::TruncWS,
            14 => M::CeilWS,
            15 => M::FloorWS,
            36 => M::CvtWS,
            48..=63 => M::CmpS,
            _ => M::Invalid,
        },
        20 if op_func(raw) == 32 => M::CvtSW,
        _ => M::Invalid,
    }
}

fn decode_special3(raw: u32) -> MipsOp {
    use MipsOp as M;
    match op_func(raw) {
        0 => M::Ext,
        4 => M::Ins,
        0x20 => match op_sa(raw) {
            0x02 => M::Wsbh,
            0x03 => M::Wsbw,
            0x10 => M::Seb,
            0x14 => M::Bitrev,
            0x18 => M::Seh,
            _ => M::Invalid,
        },
        _ => M::Invalid,
    }
}
