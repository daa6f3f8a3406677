//! Guest instruction disassembly.

use crate::decode::{MipsOp, decode};
use crate::emuhack::Sentinel;
use crate::fields::{
    branch_target, jump_target, op_fd, op_fs, op_ft, op_func, op_rd, op_rs, op_rt, op_sa, op_simm16, op_syscall_code,
    op_uimm16,
};

const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "s0", "s1",
    "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

const FCMP_NAMES: [&str; 16] = [
    "f", "un", "eq", "ueq", "olt", "ult", "ole", "ule", "sf", "ngle", "seq", "ngl", "lt", "nge", "le", "ngt",
];

fn r(n: u8) -> &'static str {
    GPR_NAMES[usize::from(n & 0x1F)]
}

/// Disassemble the opcode `raw` located at `pc`.
#[must_use]
pub fn disasm(raw: u32, pc: u32) -> String {
    use MipsOp as M;
    let instr = decode(raw);
    let name = instr.op.name();
    let (rs, rt, rd, sa) = (op_rs(raw), op_rt(raw), op_rd(raw), op_sa(raw));
    match instr.op {
        M::Nop => "nop".into(),
        M::Invalid => format!("invalid {raw:08x}"),
        M::Vfpu => format!("vfpu {raw:08x}"),
        M::Cop0 => format!("cop0 {raw:08x}"),
        M::Emuhack => match Sentinel::decode(raw) {
            Some(s) => format!("emuhack block={}", s.id()),
            None => format!("emuhack {raw:08x}"),
        },
        M::Sync | M::Cache => name,
        M::Sll | M::Srl | M::Sra | M::Rotr => format!("{name} {}, {}, {sa}", r(rd), r(rt)),
        M::Sllv | M::Srlv | M::Srav | M::Rotrv => format!("{name} {}, {}, {}", r(rd), r(rt), r(rs)),
        M::Jr => format!("jr {}", r(rs)),
        M::Jalr => format!("jalr {}, {}", r(rd), r(rs)),
        M::Syscall => format!("syscall {:#x}", op_syscall_code(raw)),
        M::Break => format!("break {:#x}", op_syscall_code(raw)),
        M::Mfhi | M::Mflo => format!("{name} {}", r(rd)),
        M::Mthi | M::Mtlo => format!("{name} {}", r(rs)),
        M::Clz | M::Clo => format!("{name} {}, {}", r(rd), r(rs)),
        M::Mult | M::Multu | M::Div | M::Divu | M::Madd | M::Maddu | M::Msub | M::Msubu => {
            format!("{name} {}, {}", r(rs), r(rt))
        }
        M::Movz
        | M::Movn
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
        | M::Min => format!("{name} {}, {}, {}", r(rd), r(rs), r(rt)),
        M::Bltz
        | M::Bgez
        | M::Bltzl
        | M::Bgezl
        | M::Bltzal
        | M::Bgezal
        | M::Bltzall
        | M::Bgezall
        | M::Blez
        | M::Bgtz
        | M::Blezl
        | M::Bgtzl => format!("{name} {}, ->{:#010x}", r(rs), branch_target(pc, raw)),
        M::Beq | M::Bne | M::Beql | M::Bnel => {
            format!("{name} {}, {}, ->{:#010x}", r(rs), r(rt), branch_target(pc, raw))
        }
        M::J | M::Jal => format!("{name} {:#010x}", jump_target(pc, raw)),
        M::Addi | M::Addiu | M::Slti | M::Sltiu => format!("{name} {}, {}, {}", r(rt), r(rs), op_simm16(raw)),
        M::Andi | M::Ori | M::Xori => format!("{name} {}, {}, {:#x}", r(rt), r(rs), op_uimm16(raw)),
        M::Lui => format!("lui {}, {:#x}", r(rt), op_uimm16(raw)),
        M::Mfc1 | M::Mtc1 => format!("{name} {}, f{}", r(rt), op_fs(raw)),
        M::Cfc1 | M::Ctc1 => format!("{name} {}, fcr{}", r(rt), op_fs(raw)),
        M::Bc1f | M::Bc1t | M::Bc1fl | M::Bc1tl => format!("{name} ->{:#010x}", branch_target(pc, raw)),
        M::AddS | M::SubS | M::MulS | M::DivS => {
            format!("{name} f{}, f{}, f{}", op_fd(raw), op_fs(raw), op_ft(raw))
        }
        M::SqrtS
        | M::AbsS
        | M::MovS
        | M::NegS
        | M::RoundWS
        | M::TruncWS
        | M::CeilWS
        | M::FloorWS
        | M::CvtWS
        | M::CvtSW => format!("{name} f{}, f{}", op_fd(raw), op_fs(raw)),
        M::CmpS => format!(
            "c.{}.s f{}, f{}",
            FCMP_NAMES[(op_func(raw) & 0xF) as usize],
            op_fs(raw),
            op_ft(raw)
        ),
        M::Ext => format!("ext {}, {}, {sa}, {}", r(rt), r(rs), rd + 1),
        M::Ins => format!("ins {}, {}, {sa}, {}", r(rt), r(rs), (rd + 1).saturating_sub(sa)),
        M::Wsbh | M::Wsbw | M::Seb | M::Seh | M::Bitrev => format!("{name} {}, {}", r(rd), r(rt)),
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
        | M::Sc => format!("{name} {}, {}({})", r(rt), op_simm16(raw), r(rs)),
        M::Lwc1 | M::Swc1 => format!("{name} f{}, {}({})", op_ft(raw), op_simm16(raw), r(rs)),
    }
}
