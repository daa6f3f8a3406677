//! Static analysis of guest instructions.

use crate::decode::{Category, Instr};

/// How a branch's delay slot can be scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelaySlotKind {
    /// Can run before the branch condition is evaluated.
    Nice,
    /// Writes something the branch reads; operands must be latched first.
    NotNice,
    /// Another branch. It is not executed.
    Branch,
    /// A syscall or break. PC is set to the branch destination, then the
    /// block exits through the slot instruction.
    Syscall,
}

/// Classify the delay slot `slot` of `branch`.
#[must_use]
pub fn classify_delay_slot(branch: &Instr, slot: &Instr) -> DelaySlotKind {
    if slot.has_delay_slot() {
        return DelaySlotKind::Branch;
    }
    match slot.category() {
        Category::Syscall | Category::Break => return DelaySlotKind::Syscall,
        // Opaque to the analysis: may write any register.
        Category::Cop0 | Category::Vector | Category::Invalid => return DelaySlotKind::NotNice,
        _ => {}
    }
    let mut hazards = branch.reads();
    if let Some(link) = branch.link_reg() {
        hazards |= 1 << link;
    }
    if slot.writes() & hazards == 0 {
        DelaySlotKind::Nice
    } else {
        DelaySlotKind::NotNice
    }
}

/// Downcount charged for one guest instruction. Delay slots count too.
#[must_use]
pub const fn cycle_estimate(_instr: &Instr) -> u32 {
    1
}

/// Whether `instr` ends a block by itself (without a delay slot).
#[must_use]
pub const fn ends_block(instr: &Instr) -> bool {
    matches!(instr.category(), Category::Syscall | Category::Break)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;
    use crate::decode::decode;

    fn kind(branch: u32, slot: u32) -> DelaySlotKind {
        classify_delay_slot(&decode(branch), &decode(slot))
    }

    #[test]
    fn test_nice_slot() {
        assert_eq!(kind(asm::beq(1, 2, 4), asm::addiu(3, 0, 1)), DelaySlotKind::Nice);
        assert_eq!(kind(asm::jr(31), asm::nop()), DelaySlotKind::Nice);
        // Reading a branch operand is fine.
        assert_eq!(kind(asm::bne(1, 2, 4), asm::addu(3, 1, 2)), DelaySlotKind::Nice);
    }

    #[test]
    fn test_not_nice_slot() {
        assert_eq!(kind(asm::beq(1, 2, 4), asm::addiu(1, 1, 1)), DelaySlotKind::NotNice);
        assert_eq!(kind(asm::jr(5), asm::lw(5, 29, 0)), DelaySlotKind::NotNice);
        assert_eq!(kind(asm::jal(0x100), asm::addiu(31, 0, 0)), DelaySlotKind::NotNice);
        assert_eq!(kind(asm::bc1t(2), asm::c_cond_s(2, 0, 1)), DelaySlotKind::NotNice);
    }

    #[test]
    fn test_branch_and_syscall_slots() {
        assert_eq!(kind(asm::beq(1, 2, 4), asm::j(0x40)), DelaySlotKind::Branch);
        assert_eq!(kind(asm::jr(31), asm::syscall(1)), DelaySlotKind::Syscall);
        assert_eq!(kind(asm::jr(31), asm::brk(0)), DelaySlotKind::Syscall);
    }

    #[test]
    fn test_cycle_estimate_is_one() {
        assert_eq!(cycle_estimate(&decode(asm::div(1, 2))), 1);
        assert_eq!(cycle_estimate(&decode(asm::nop())), 1);
    }
}
