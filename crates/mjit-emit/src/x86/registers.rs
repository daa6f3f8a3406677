//! Host register roles for native blocks.
//!
//! Reserved: rbx (guest state), r15 (guest memory base), r14 (code-page
//! map), rsp. rax, rcx and rdx are scratch for every handler and are never
//! handed to the register cache. xmm0 and xmm1 are float scratch.

use super::asm::{Reg, Xmm};

pub const STATE: Reg = Reg::Rbx;
pub const MEMBASE: Reg = Reg::R15;
pub const CODE_PAGES: Reg = Reg::R14;

pub const SCRATCH0: Reg = Reg::Rax;
pub const SCRATCH1: Reg = Reg::Rcx;

pub const FSCRATCH: Xmm = Xmm(0);

/// Callee-saved registers pushed by every block prologue, in push order.
pub const SAVED: [Reg; 6] = [Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Default GPR allocation order. Callee-saved first, so statics survive
/// helper calls without a reload.
pub const GPR_ORDER: [Reg; 9] = [
    Reg::R13,
    Reg::R12,
    Reg::Rbp,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

/// Whether `reg` may hold a guest value.
#[must_use]
pub const fn is_allocatable(reg: Reg) -> bool {
    !matches!(
        reg,
        Reg::Rax | Reg::Rcx | Reg::Rdx | Reg::Rbx | Reg::Rsp | Reg::R14 | Reg::R15
    )
}

/// GPR allocation order as register numbers, honoring an override.
#[must_use]
pub fn gpr_order(custom: Option<&[u8]>) -> Vec<u8> {
    match custom {
        Some(order) => order
            .iter()
            .copied()
            .filter(|&i| i < 16 && is_allocatable(Reg::from_index(i)))
            .collect(),
        None => GPR_ORDER.iter().map(|r| r.index()).collect(),
    }
}

/// XMM allocation order, honoring an override.
#[must_use]
pub fn fpr_order(custom: Option<&[u8]>) -> Vec<u8> {
    match custom {
        Some(order) => order.iter().copied().filter(|&i| (2..16).contains(&i)).collect(),
        None => (2..16).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_orders_skip_reserved() {
        let gprs = gpr_order(None);
        assert_eq!(gprs.first(), Some(&13));
        for r in [STATE, MEMBASE, CODE_PAGES, SCRATCH0, SCRATCH1, Reg::Rdx, Reg::Rsp] {
            assert!(!gprs.contains(&r.index()));
        }
        assert_eq!(fpr_order(None).len(), 14);
    }

    #[test]
    fn test_overrides_filtered() {
        assert_eq!(gpr_order(Some(&[0, 3, 8, 15, 9, 40])), vec![8, 9]);
        assert_eq!(fpr_order(Some(&[0, 1, 5, 16])), vec![5]);
    }
}
