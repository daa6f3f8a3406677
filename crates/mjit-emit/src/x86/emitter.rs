//! Guest state access for the register cache.

use mjit_ir::reg::IRREG_LO;
use mjit_ir::{IrReg, RegClass};
use mjit_state::GuestState;

use super::asm::{Alu, Assembler, Mem, Reg, Xmm};
use super::registers::{MEMBASE, STATE};
use crate::regcache::CacheEmitter;

/// `[rbx + offset]`.
#[must_use]
pub const fn field(offset: i32) -> Mem {
    Mem::base(STATE, offset)
}

/// Guest state slot of IR register `reg`.
#[must_use]
pub const fn slot(reg: IrReg) -> Mem {
    field(GuestState::reg_offset(reg))
}

impl CacheEmitter for Assembler {
    fn load_reg(&mut self, class: RegClass, host: u8, reg: IrReg) {
        match class {
            RegClass::Gpr => self.load(Reg::from_index(host), slot(reg)),
            RegClass::Fpr => self.movss_load(Xmm(host), slot(reg)),
        }
    }

    fn store_reg(&mut self, class: RegClass, host: u8, reg: IrReg) {
        match class {
            RegClass::Gpr => self.store(slot(reg), Reg::from_index(host)),
            RegClass::Fpr => self.movss_store(slot(reg), Xmm(host)),
        }
    }

    fn load_imm(&mut self, host: u8, value: u32) {
        self.mov_ri(Reg::from_index(host), value);
    }

    fn store_imm(&mut self, reg: IrReg, value: u32) {
        Self::store_imm(self, slot(reg), value);
    }

    fn load_pair(&mut self, host: u8) {
        self.load64(Reg::from_index(host), slot(IRREG_LO));
    }

    fn store_pair(&mut self, host: u8) {
        self.store64(slot(IRREG_LO), Reg::from_index(host));
    }

    fn add_membase(&mut self, host: u8) {
        let r = Reg::from_index(host);
        // Clear the upper half before forming the pointer.
        self.mov_rr(r, r);
        self.alu_rr64(Alu::Add, r, MEMBASE);
    }

    fn sub_membase(&mut self, host: u8) {
        self.alu_rr64(Alu::Sub, Reg::from_index(host), MEMBASE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_ops_address_state() {
        let mut a = Assembler::new();
        a.load_reg(RegClass::Gpr, 13, 29);
        // mov r13d, [rbx + reg_offset(29)]
        let off = GuestState::reg_offset(29);
        let mut expected = vec![0x44, 0x8B, 0xAB];
        expected.extend_from_slice(&off.to_le_bytes());
        assert_eq!(a.buf().code(), expected.as_slice());

        let mut a = Assembler::new();
        CacheEmitter::store_imm(&mut a, 5, 0x1234);
        assert_eq!(a.buf().code()[0], 0xC7);
        assert_eq!(&a.buf().code()[a.buf().len() - 4..], &0x1234u32.to_le_bytes());
    }
}
