//! Append-only IR builder.

use crate::inst::IrInst;
use crate::op::IrOp;
use crate::reg::IrReg;

/// Collects IR instructions for one block.
#[derive(Clone, Debug, Default)]
pub struct IrWriter {
    insts: Vec<IrInst>,
}

impl IrWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction.
    pub fn push(&mut self, inst: IrInst) {
        self.insts.push(inst);
    }

    /// Append a register-only instruction.
    pub fn write(&mut self, op: IrOp, dest: IrReg, src1: IrReg, src2: IrReg) {
        self.push(IrInst::new(op, dest, src1, src2));
    }

    /// Append an instruction with a constant.
    pub fn write_const(&mut self, op: IrOp, dest: IrReg, src1: IrReg, constant: u32) {
        self.push(IrInst::with_const(op, dest, src1, constant));
    }

    /// Append a two-register instruction that also carries a constant
    /// (conditional exits).
    pub fn write_full(&mut self, op: IrOp, dest: IrReg, src1: IrReg, src2: IrReg, constant: u32) {
        self.push(IrInst {
            op,
            dest,
            src1,
            src2,
            constant,
        });
    }

    /// Load a 32-bit constant into `dest`.
    pub fn set_const(&mut self, dest: IrReg, value: u32) {
        self.write_const(IrOp::SetConst, dest, 0, value);
    }

    /// Load an f32 constant into a float register.
    pub fn set_const_f(&mut self, dest: IrReg, value: f32) {
        self.write_const(IrOp::SetConstF, dest, 0, value.to_bits());
    }

    /// Unconditional exit to a constant address.
    pub fn exit_to_const(&mut self, target: u32) {
        self.write_const(IrOp::ExitToConst, 0, 0, target);
    }

    /// Number of instructions written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Instructions written so far.
    #[must_use]
    pub fn insts(&self) -> &[IrInst] {
        &self.insts
    }

    /// Mutable access to an already written instruction.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut IrInst> {
        self.insts.get_mut(index)
    }

    /// Last instruction written.
    #[must_use]
    pub fn last(&self) -> Option<&IrInst> {
        self.insts.last()
    }

    /// Consume the writer.
    #[must_use]
    pub fn into_insts(self) -> Vec<IrInst> {
        self.insts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_appends_in_order() {
        let mut w = IrWriter::new();
        w.set_const(1, 5);
        w.write(IrOp::Add, 2, 1, 1);
        w.exit_to_const(0x0800_0010);
        assert_eq!(w.len(), 3);
        assert_eq!(w.insts()[0].op, IrOp::SetConst);
        assert_eq!(w.insts()[1], IrInst::new(IrOp::Add, 2, 1, 1));
        assert_eq!(w.last().map(|i| i.constant), Some(0x0800_0010));
    }

    #[test]
    fn test_patch_written_inst() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 0);
        if let Some(inst) = w.get_mut(0) {
            inst.constant = 7;
        }
        assert_eq!(w.into_insts()[0].constant, 7);
    }
}
