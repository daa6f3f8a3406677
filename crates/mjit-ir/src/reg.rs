//! IR register numbering.
//!
//! IR registers index the guest register file (`GuestState::regs`) directly,
//! so backends can turn a register number into a state offset without a
//! lookup table.
//!
//! ```text
//! 0..=31    guest GPRs (0 is hardwired to zero)
//! 32, 33    LO, HI (adjacent, LO first, so the pair forms one 64-bit value)
//! 34        FPU condition flag
//! 35        FCR31 (without the condition bit)
//! 36..=47   integer temporaries
//! 64..=95   guest FPRs (raw f32 bits)
//! 96..=99   float temporaries
//! ```

/// IR register index.
pub type IrReg = u8;

/// Hardwired zero register.
pub const IRREG_ZERO: IrReg = 0;
/// Stack pointer (`$sp`).
pub const IRREG_SP: IrReg = 29;
/// Return address (`$ra`).
pub const IRREG_RA: IrReg = 31;
/// Multiply/divide low result.
pub const IRREG_LO: IrReg = 32;
/// Multiply/divide high result.
pub const IRREG_HI: IrReg = 33;
/// FPU compare result (0 or 1).
pub const IRREG_FPCOND: IrReg = 34;
/// FPU control/status register.
pub const IRREG_FCR31: IrReg = 35;

/// First integer temporary.
pub const IRTEMP_0: IrReg = 36;
/// Number of integer temporaries.
pub const IRTEMP_COUNT: u8 = 12;
/// Temporary reserved for latching a branch's left operand.
pub const IRTEMP_LHS: IrReg = IRTEMP_0 + 10;
/// Temporary reserved for latching a branch's right operand.
pub const IRTEMP_RHS: IrReg = IRTEMP_0 + 11;

/// First guest FPR.
pub const IRREG_FPR_BASE: IrReg = 64;
/// First float temporary.
pub const IRTEMP_F0: IrReg = 96;
/// Number of float temporaries.
pub const IRTEMP_F_COUNT: u8 = 4;

/// Number of slots in the register file.
pub const IR_REG_COUNT: usize = 128;

/// Register class of an IR register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// Integer registers (GPRs, LO/HI, FPU control, integer temporaries).
    Gpr,
    /// Float registers (FPRs and float temporaries).
    Fpr,
}

impl RegClass {
    /// First IR register of this class.
    #[must_use]
    pub const fn base(self) -> IrReg {
        match self {
            Self::Gpr => 0,
            Self::Fpr => IRREG_FPR_BASE,
        }
    }

    /// Number of IR registers in this class.
    #[must_use]
    pub const fn count(self) -> usize {
        match self {
            Self::Gpr => (IRTEMP_0 + IRTEMP_COUNT) as usize,
            Self::Fpr => (IRTEMP_F0 + IRTEMP_F_COUNT - IRREG_FPR_BASE) as usize,
        }
    }

    /// Short name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gpr => "gpr",
            Self::Fpr => "fpr",
        }
    }
}

/// IR register for guest FPR `n`.
#[must_use]
pub const fn fpr(n: u8) -> IrReg {
    IRREG_FPR_BASE + (n & 0x1F)
}

/// IR register for integer temporary `n`.
#[must_use]
pub const fn temp(n: u8) -> IrReg {
    IRTEMP_0 + n
}

/// IR register for float temporary `n`.
#[must_use]
pub const fn ftemp(n: u8) -> IrReg {
    IRTEMP_F0 + n
}

/// Class of an IR register, or `None` for unused slots.
#[must_use]
pub const fn class_of(reg: IrReg) -> Option<RegClass> {
    if reg < IRTEMP_0 + IRTEMP_COUNT {
        Some(RegClass::Gpr)
    } else if reg >= IRREG_FPR_BASE && reg < IRTEMP_F0 + IRTEMP_F_COUNT {
        Some(RegClass::Fpr)
    } else {
        None
    }
}

/// Whether the register is an IR temporary (never guest visible).
#[must_use]
pub const fn is_temp(reg: IrReg) -> bool {
    (reg >= IRTEMP_0 && reg < IRTEMP_0 + IRTEMP_COUNT)
        || (reg >= IRTEMP_F0 && reg < IRTEMP_F0 + IRTEMP_F_COUNT)
}

/// Human-readable register name.
#[must_use]
pub fn reg_name(reg: IrReg) -> String {
    match reg {
        0..=31 => format!("r{reg}"),
        IRREG_LO => "lo".to_string(),
        IRREG_HI => "hi".to_string(),
        IRREG_FPCOND => "fpcond".to_string(),
        IRREG_FCR31 => "fcr31".to_string(),
        r if r >= IRTEMP_0 && r < IRTEMP_0 + IRTEMP_COUNT => format!("t{}", r - IRTEMP_0),
        r if r >= IRREG_FPR_BASE && r < IRTEMP_F0 => format!("f{}", r - IRREG_FPR_BASE),
        r if r >= IRTEMP_F0 && r < IRTEMP_F0 + IRTEMP_F_COUNT => format!("ft{}", r - IRTEMP_F0),
        r => format!("?{r}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lo_hi_adjacent_and_aligned() {
        assert_eq!(IRREG_HI, IRREG_LO + 1);
        // 8-byte alignment of LO within the u32 array.
        assert_eq!(IRREG_LO % 2, 0);
    }

    #[test]
    fn test_class_of() {
        assert_eq!(class_of(0), Some(RegClass::Gpr));
        assert_eq!(class_of(IRTEMP_RHS), Some(RegClass::Gpr));
        assert_eq!(class_of(fpr(31)), Some(RegClass::Fpr));
        assert_eq!(class_of(ftemp(3)), Some(RegClass::Fpr));
        assert_eq!(class_of(50), None);
        assert_eq!(class_of(120), None);
    }

    #[test]
    fn test_class_ranges() {
        assert_eq!(RegClass::Gpr.count(), 48);
        assert_eq!(RegClass::Fpr.count(), 36);
        assert!(usize::from(IRTEMP_F0 + IRTEMP_F_COUNT) <= IR_REG_COUNT);
    }

    #[test]
    fn test_reg_names() {
        assert_eq!(reg_name(5), "r5");
        assert_eq!(reg_name(IRREG_HI), "hi");
        assert_eq!(reg_name(temp(2)), "t2");
        assert_eq!(reg_name(fpr(12)), "f12");
        assert_eq!(reg_name(ftemp(1)), "ft1");
    }
}
