//! Opcode field extraction.

/// Primary opcode (bits [31:26]).
#[inline]
#[must_use]
pub const fn op_primary(op: u32) -> u32 {
    op >> 26
}

/// `rs` field (bits [25:21]).
#[inline]
#[must_use]
pub const fn op_rs(op: u32) -> u8 {
    ((op >> 21) & 0x1F) as u8
}

/// `rt` field (bits [20:16]).
#[inline]
#[must_use]
pub const fn op_rt(op: u32) -> u8 {
    ((op >> 16) & 0x1F) as u8
}

/// `rd` field (bits [15:11]).
#[inline]
#[must_use]
pub const fn op_rd(op: u32) -> u8 {
    ((op >> 11) & 0x1F) as u8
}

/// `sa` field (bits [10:6]).
#[inline]
#[must_use]
pub const fn op_sa(op: u32) -> u8 {
    ((op >> 6) & 0x1F) as u8
}

/// Function field (bits [5:0]).
#[inline]
#[must_use]
pub const fn op_func(op: u32) -> u32 {
    op & 0x3F
}

/// Zero-extended 16-bit immediate.
#[inline]
#[must_use]
pub const fn op_uimm16(op: u32) -> u32 {
    op & 0xFFFF
}

/// Sign-extended 16-bit immediate.
#[inline]
#[must_use]
pub const fn op_simm16(op: u32) -> i32 {
    (op & 0xFFFF) as u16 as i16 as i32
}

/// FPU `ft` (same bits as `rt`).
#[inline]
#[must_use]
pub const fn op_ft(op: u32) -> u8 {
    op_rt(op)
}

/// FPU `fs` (same bits as `rd`).
#[inline]
#[must_use]
pub const fn op_fs(op: u32) -> u8 {
    op_rd(op)
}

/// FPU `fd` (same bits as `sa`).
#[inline]
#[must_use]
pub const fn op_fd(op: u32) -> u8 {
    op_sa(op)
}

/// Syscall code (bits [25:6]).
#[inline]
#[must_use]
pub const fn op_syscall_code(op: u32) -> u32 {
    (op >> 6) & 0xFFFFF
}

/// Target of a PC-relative branch at `pc`.
#[inline]
#[must_use]
pub const fn branch_target(pc: u32, op: u32) -> u32 {
    pc.wrapping_add(4).wrapping_add((op_simm16(op) << 2) as u32)
}

/// Target of a `j`/`jal` at `pc` (region of the delay slot).
#[inline]
#[must_use]
pub const fn jump_target(pc: u32, op: u32) -> u32 {
    (pc.wrapping_add(4) & 0xF000_0000) | ((op & 0x03FF_FFFF) << 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        // addu r3, r1, r2
        let op = 0x0022_1821;
        assert_eq!(op_primary(op), 0);
        assert_eq!(op_rs(op), 1);
        assert_eq!(op_rt(op), 2);
        assert_eq!(op_rd(op), 3);
        assert_eq!(op_func(op), 0x21);
    }

    #[test]
    fn test_immediates() {
        // addiu r1, r0, -1
        let op = 0x2401_FFFF;
        assert_eq!(op_simm16(op), -1);
        assert_eq!(op_uimm16(op), 0xFFFF);
    }

    #[test]
    fn test_branch_and_jump_targets() {
        // beq r0, r0, -1 at 0x100 branches to itself.
        assert_eq!(branch_target(0x100, 0x1000_FFFF), 0x100);
        assert_eq!(branch_target(0x100, 0x1000_0003), 0x110);
        // j 0x08000040 from 0x08000000
        assert_eq!(jump_target(0x0800_0000, 0x0800_0000 | (0x0800_0040 >> 2)), 0x0800_0040);
    }
}
