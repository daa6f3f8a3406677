//! Known-constant tracking for guest GPRs during lifting.

use mjit_ir::IrWriter;
use mjit_ir::reg::IrReg;

/// Tracks which guest GPRs hold a value known at compile time.
///
/// A known register has not been written in IR yet. Reading it through
/// [`map_in`](Self::map_in) materializes it with `SetConst`; writing it
/// through [`map_dirty`](Self::map_dirty) forgets the constant. `r0` is
/// always known to be zero and never materialized.
#[derive(Clone, Debug)]
pub struct IrImmRegCache {
    known: [bool; 32],
    values: [u32; 32],
}

impl Default for IrImmRegCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IrImmRegCache {
    #[must_use]
    pub fn new() -> Self {
        let mut known = [false; 32];
        known[0] = true;
        Self { known, values: [0; 32] }
    }

    #[must_use]
    pub fn is_imm(&self, reg: u8) -> bool {
        self.known.get(usize::from(reg)).copied().unwrap_or(false)
    }

    /// Known value of `reg`. Only meaningful when [`is_imm`](Self::is_imm).
    #[must_use]
    pub fn imm(&self, reg: u8) -> u32 {
        self.values.get(usize::from(reg)).copied().unwrap_or(0)
    }

    /// Record that `reg` now holds `value`. Writes to `r0` are dropped.
    pub fn set_imm(&mut self, reg: u8, value: u32) {
        let r = usize::from(reg);
        if r == 0 || r >= 32 {
            return;
        }
        self.known[r] = true;
        self.values[r] = value;
    }

    /// Make `reg` readable from its IR register.
    pub fn map_in(&mut self, ir: &mut IrWriter, reg: u8) {
        let r = usize::from(reg);
        if r == 0 || r >= 32 || !self.known[r] {
            return;
        }
        ir.set_const(IrReg::from(reg), self.values[r]);
        self.known[r] = false;
    }

    /// `reg` is about to be written by IR.
    pub fn map_dirty(&mut self, reg: u8) {
        let r = usize::from(reg);
        if r != 0 && r < 32 {
            self.known[r] = false;
        }
    }

    /// `map_in` for both operands, then `map_dirty` for the destination.
    pub fn map_in_in_dirty(&mut self, ir: &mut IrWriter, rd: u8, rs: u8, rt: u8) {
        self.map_in(ir, rs);
        self.map_in(ir, rt);
        self.map_dirty(rd);
    }

    /// Materialize every known register.
    pub fn flush_all(&mut self, ir: &mut IrWriter) {
        for r in 1..32u8 {
            self.map_in(ir, r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mjit_ir::IrOp;

    #[test]
    fn test_r0_is_always_zero() {
        let mut c = IrImmRegCache::new();
        assert!(c.is_imm(0));
        c.set_imm(0, 5);
        assert_eq!(c.imm(0), 0);
        let mut ir = IrWriter::new();
        c.map_in(&mut ir, 0);
        c.flush_all(&mut ir);
        assert!(ir.is_empty());
    }

    #[test]
    fn test_map_in_materializes_once() {
        let mut c = IrImmRegCache::new();
        let mut ir = IrWriter::new();
        c.set_imm(3, 0x1234);
        c.map_in(&mut ir, 3);
        c.map_in(&mut ir, 3);
        assert_eq!(ir.len(), 1);
        let inst = ir.insts()[0];
        assert_eq!(inst.op, IrOp::SetConst);
        assert_eq!(inst.dest, 3);
        assert_eq!(inst.constant, 0x1234);
        assert!(!c.is_imm(3));
    }

    #[test]
    fn test_map_dirty_discards() {
        let mut c = IrImmRegCache::new();
        let mut ir = IrWriter::new();
        c.set_imm(4, 9);
        c.map_dirty(4);
        c.flush_all(&mut ir);
        assert!(ir.is_empty());
    }
}
