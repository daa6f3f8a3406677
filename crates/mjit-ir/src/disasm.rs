//! IR disassembly.

use std::fmt;

use crate::block::IrBlock;
use crate::inst::IrInst;
use crate::op::{Arg, IrOp};
use crate::reg::reg_name;

fn fmt_arg(f: &mut fmt::Formatter<'_>, arg: Arg, value: u8, first: &mut bool) -> fmt::Result {
    if arg == Arg::None {
        return Ok(());
    }
    if !*first {
        f.write_str(", ")?;
    }
    *first = false;
    match arg {
        Arg::Gpr | Arg::Fpr => f.write_str(&reg_name(value)),
        Arg::Imm => write!(f, "{value}"),
        Arg::None => Ok(()),
    }
}

impl fmt::Display for IrInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.op.meta();
        f.write_str(meta.name)?;
        let mut first = true;
        if meta.dest != Arg::None || meta.src1 != Arg::None || meta.has_const {
            f.write_str(" ")?;
        }
        fmt_arg(f, meta.dest, self.dest, &mut first)?;
        fmt_arg(f, meta.src1, self.src1, &mut first)?;
        fmt_arg(f, meta.src2, self.src2, &mut first)?;
        if meta.has_const {
            if !first {
                f.write_str(", ")?;
            }
            match self.op {
                IrOp::SetConstF => write!(f, "{}", self.const_f32())?,
                IrOp::Downcount | IrOp::Syscall | IrOp::Break => write!(f, "{}", self.constant)?,
                IrOp::Interpret => write!(f, "op={:08x}", self.constant)?,
                _ => write!(f, "{:#x}", self.constant)?,
            }
        }
        Ok(())
    }
}

/// Disassemble a block, one instruction per line.
#[must_use]
pub fn disasm_block(block: &IrBlock) -> Vec<String> {
    block
        .insts
        .iter()
        .enumerate()
        .map(|(i, inst)| format!("{i:4}: {inst}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::{IRREG_HI, fpr};

    #[test]
    fn test_display_reg_forms() {
        assert_eq!(IrInst::new(IrOp::Add, 1, 2, 3).to_string(), "Add r1, r2, r3");
        assert_eq!(IrInst::new(IrOp::Mov, 4, IRREG_HI, 0).to_string(), "Mov r4, hi");
        assert_eq!(IrInst::new(IrOp::ShlImm, 4, 5, 2).to_string(), "ShlImm r4, r5, 2");
        assert_eq!(IrInst::new(IrOp::FAdd, fpr(0), fpr(1), fpr(2)).to_string(), "FAdd f0, f1, f2");
    }

    #[test]
    fn test_display_const_forms() {
        assert_eq!(IrInst::with_const(IrOp::SetConst, 1, 0, 0x10).to_string(), "SetConst r1, 0x10");
        assert_eq!(IrInst::with_const(IrOp::Load32, 2, 29, 8).to_string(), "Load32 r2, r29, 0x8");
        assert_eq!(IrInst::with_const(IrOp::ExitToConst, 0, 0, 0x40).to_string(), "ExitToConst 0x40");
        assert_eq!(IrInst::with_const(IrOp::Downcount, 0, 0, 3).to_string(), "Downcount 3");
        assert_eq!(IrInst::new(IrOp::Nop, 0, 0, 0).to_string(), "Nop");
    }

    #[test]
    fn test_disasm_block_numbers_lines() {
        let block = IrBlock::new(0, 4, 1, vec![IrInst::with_const(IrOp::ExitToConst, 0, 0, 4)]);
        assert_eq!(disasm_block(&block), vec!["   0: ExitToConst 0x4".to_string()]);
    }
}
