//! Instruction encoders.
//!
//! Used by tests and tools to build guest code without an assembler.
//! Branch offsets are in instructions, relative to the delay slot.

#![allow(clippy::cast_sign_loss, clippy::missing_const_for_fn)]

const fn r_type(func: u32, rs: u8, rt: u8, rd: u8, sa: u8) -> u32 {
    ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | ((sa as u32) << 6) | func
}

const fn i_type(primary: u32, rs: u8, rt: u8, imm: u16) -> u32 {
    (primary << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | imm as u32
}

const fn off(offset: i32) -> u16 {
    offset as u16
}

#[must_use]
pub const fn nop() -> u32 {
    0
}

#[must_use]
pub const fn sll(rd: u8, rt: u8, sa: u8) -> u32 {
    r_type(0x00, 0, rt, rd, sa)
}

#[must_use]
pub const fn srl(rd: u8, rt: u8, sa: u8) -> u32 {
    r_type(0x02, 0, rt, rd, sa)
}

#[must_use]
pub const fn rotr(rd: u8, rt: u8, sa: u8) -> u32 {
    r_type(0x02, 1, rt, rd, sa)
}

#[must_use]
pub const fn sra(rd: u8, rt: u8, sa: u8) -> u32 {
    r_type(0x03, 0, rt, rd, sa)
}

#[must_use]
pub const fn sllv(rd: u8, rt: u8, rs: u8) -> u32 {
    r_type(0x04, rs, rt, rd, 0)
}

#[must_use]
pub const fn srlv(rd: u8, rt: u8, rs: u8) -> u32 {
    r_type(0x06, rs, rt, rd, 0)
}

#[must_use]
pub const fn rotrv(rd: u8, rt: u8, rs: u8) -> u32 {
    r_type(0x06, rs, rt, rd, 1)
}

#[must_use]
pub const fn srav(rd: u8, rt: u8, rs: u8) -> u32 {
    r_type(0x07, rs, rt, rd, 0)
}

#[must_use]
pub const fn jr(rs: u8) -> u32 {
    r_type(0x08, rs, 0, 0, 0)
}

#[must_use]
pub const fn jalr(rd: u8, rs: u8) -> u32 {
    r_type(0x09, rs, 0, rd, 0)
}

#[must_use]
pub const fn movz(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x0A, rs, rt, rd, 0)
}

#[must_use]
pub const fn movn(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x0B, rs, rt, rd, 0)
}

#[must_use]
pub const fn syscall(code: u32) -> u32 {
    ((code & 0xFFFFF) << 6) | 0x0C
}

#[must_use]
pub const fn brk(code: u32) -> u32 {
    ((code & 0xFFFFF) << 6) | 0x0D
}

#[must_use]
pub const fn mfhi(rd: u8) -> u32 {
    r_type(0x10, 0, 0, rd, 0)
}

#[must_use]
pub const fn mthi(rs: u8) -> u32 {
    r_type(0x11, rs, 0, 0, 0)
}

#[must_use]
pub const fn mflo(rd: u8) -> u32 {
    r_type(0x12, 0, 0, rd, 0)
}

#[must_use]
pub const fn mtlo(rs: u8) -> u32 {
    r_type(0x13, rs, 0, 0, 0)
}

#[must_use]
pub const fn clz(rd: u8, rs: u8) -> u32 {
    r_type(0x16, rs, 0, rd, 0)
}

#[must_use]
pub const fn clo(rd: u8, rs: u8) -> u32 {
    r_type(0x17, rs, 0, rd, 0)
}

#[must_use]
pub const fn mult(rs: u8, rt: u8) -> u32 {
    r_type(0x18, rs, rt, 0, 0)
}

#[must_use]
pub const fn multu(rs: u8, rt: u8) -> u32 {
    r_type(0x19, rs, rt, 0, 0)
}

#[must_use]
pub const fn div(rs: u8, rt: u8) -> u32 {
    r_type(0x1A, rs, rt, 0, 0)
}

#[must_use]
pub const fn divu(rs: u8, rt: u8) -> u32 {
    r_type(0x1B, rs, rt, 0, 0)
}

#[must_use]
pub const fn madd(rs: u8, rt: u8) -> u32 {
    r_type(0x1C, rs, rt, 0, 0)
}

#[must_use]
pub const fn maddu(rs: u8, rt: u8) -> u32 {
    r_type(0x1D, rs, rt, 0, 0)
}

#[must_use]
pub const fn msub(rs: u8, rt: u8) -> u32 {
    r_type(0x2E, rs, rt, 0, 0)
}

#[must_use]
pub const fn msubu(rs: u8, rt: u8) -> u32 {
    r_type(0x2F, rs, rt, 0, 0)
}

#[must_use]
pub const fn add(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x20, rs, rt, rd, 0)
}

#[must_use]
pub const fn addu(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x21, rs, rt, rd, 0)
}

#[must_use]
pub const fn sub(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x22, rs, rt, rd, 0)
}

#[must_use]
pub const fn subu(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x23, rs, rt, rd, 0)
}

#[must_use]
pub const fn and(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x24, rs, rt, rd, 0)
}

#[must_use]
pub const fn or(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x25, rs, rt, rd, 0)
}

#[must_use]
pub const fn xor(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x26, rs, rt, rd, 0)
}

#[must_use]
pub const fn nor(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x27, rs, rt, rd, 0)
}

#[must_use]
pub const fn slt(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x2A, rs, rt, rd, 0)
}

#[must_use]
pub const fn sltu(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x2B, rs, rt, rd, 0)
}

#[must_use]
pub const fn max(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x2C, rs, rt, rd, 0)
}

#[must_use]
pub const fn min(rd: u8, rs: u8, rt: u8) -> u32 {
    r_type(0x2D, rs, rt, rd, 0)
}

#[must_use]
pub const fn bltz(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 0, off(offset))
}

#[must_use]
pub const fn bgez(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 1, off(offset))
}

#[must_use]
pub const fn bltzl(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 2, off(offset))
}

#[must_use]
pub const fn bgezl(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 3, off(offset))
}

#[must_use]
pub const fn bltzal(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 16, off(offset))
}

#[must_use]
pub const fn bgezal(rs: u8, offset: i32) -> u32 {
    i_type(1, rs, 17, off(offset))
}

/// `j target` (absolute address in the current 256 MiB region).
#[must_use]
pub const fn j(target: u32) -> u32 {
    (2 << 26) | ((target >> 2) & 0x03FF_FFFF)
}

#[must_use]
pub const fn jal(target: u32) -> u32 {
    (3 << 26) | ((target >> 2) & 0x03FF_FFFF)
}

#[must_use]
pub const fn beq(rs: u8, rt: u8, offset: i32) -> u32 {
    i_type(4, rs, rt, off(offset))
}

#[must_use]
pub const fn bne(rs: u8, rt: u8, offset: i32) -> u32 {
    i_type(5, rs, rt, off(offset))
}

#[must_use]
pub const fn blez(rs: u8, offset: i32) -> u32 {
    i_type(6, rs, 0, off(offset))
}

#[must_use]
pub const fn bgtz(rs: u8, offset: i32) -> u32 {
    i_type(7, rs, 0, off(offset))
}

#[must_use]
pub const fn beql(rs: u8, rt: u8, offset: i32) -> u32 {
    i_type(20, rs, rt, off(offset))
}

#[must_use]
pub const fn bnel(rs: u8, rt: u8, offset: i32) -> u32 {
    i_type(21, rs, rt, off(offset))
}

#[must_use]
pub const fn blezl(rs: u8, offset: i32) -> u32 {
    i_type(22, rs, 0, off(offset))
}

#[must_use]
pub const fn bgtzl(rs: u8, offset: i32) -> u32 {
    i_type(23, rs, 0, off(offset))
}

#[must_use]
pub const fn addi(rt: u8, rs: u8, imm: i16) -> u32 {
    i_type(8, rs, rt, imm as u16)
}

#[must_use]
pub const fn addiu(rt: u8, rs: u8, imm: i16) -> u32 {
    i_type(9, rs, rt, imm as u16)
}

#[must_use]
pub const fn slti(rt: u8, rs: u8, imm: i16) -> u32 {
    i_type(10, rs, rt, imm as u16)
}

#[must_use]
pub const fn sltiu(rt: u8, rs: u8, imm: i16) -> u32 {
    i_type(11, rs, rt, imm as u16)
}

#[must_use]
pub const fn andi(rt: u8, rs: u8, imm: u16) -> u32 {
    i_type(12, rs, rt, imm)
}

#[must_use]
pub const fn ori(rt: u8, rs: u8, imm: u16) -> u32 {
    i_type(13, rs, rt, imm)
}

#[must_use]
pub const fn xori(rt: u8, rs: u8, imm: u16) -> u32 {
    i_type(14, rs, rt, imm)
}

#[must_use]
pub const fn lui(rt: u8, imm: u16) -> u32 {
    i_type(15, 0, rt, imm)
}

#[must_use]
pub const fn lb(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x20, base, rt, offset as u16)
}

#[must_use]
pub const fn lh(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x21, base, rt, offset as u16)
}

#[must_use]
pub const fn lwl(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x22, base, rt, offset as u16)
}

#[must_use]
pub const fn lw(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x23, base, rt, offset as u16)
}

#[must_use]
pub const fn lbu(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x24, base, rt, offset as u16)
}

#[must_use]
pub const fn lhu(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x25, base, rt, offset as u16)
}

#[must_use]
pub const fn lwr(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x26, base, rt, offset as u16)
}

#[must_use]
pub const fn sb(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x28, base, rt, offset as u16)
}

#[must_use]
pub const fn sh(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x29, base, rt, offset as u16)
}

#[must_use]
pub const fn swl(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x2A, base, rt, offset as u16)
}

#[must_use]
pub const fn sw(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x2B, base, rt, offset as u16)
}

#[must_use]
pub const fn swr(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x2E, base, rt, offset as u16)
}

#[must_use]
pub const fn ll(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x30, base, rt, offset as u16)
}

#[must_use]
pub const fn sc(rt: u8, base: u8, offset: i16) -> u32 {
    i_type(0x38, base, rt, offset as u16)
}

#[must_use]
pub const fn lwc1(ft: u8, base: u8, offset: i16) -> u32 {
    i_type(0x31, base, ft, offset as u16)
}

#[must_use]
pub const fn swc1(ft: u8, base: u8, offset: i16) -> u32 {
    i_type(0x39, base, ft, offset as u16)
}

const fn cop1(fmt: u8, ft: u8, fs: u8, fd: u8, func: u32) -> u32 {
    (17 << 26) | r_type(func, fmt, ft, fs, fd)
}

#[must_use]
pub const fn mfc1(rt: u8, fs: u8) -> u32 {
    cop1(0, rt, fs, 0, 0)
}

#[must_use]
pub const fn cfc1(rt: u8, fs: u8) -> u32 {
    cop1(2, rt, fs, 0, 0)
}

#[must_use]
pub const fn mtc1(rt: u8, fs: u8) -> u32 {
    cop1(4, rt, fs, 0, 0)
}

#[must_use]
pub const fn ctc1(rt: u8, fs: u8) -> u32 {
    cop1(6, rt, fs, 0, 0)
}

#[must_use]
pub const fn bc1f(offset: i32) -> u32 {
    i_type(17, 8, 0, off(offset))
}

#[must_use]
pub const fn bc1t(offset: i32) -> u32 {
    i_type(17, 8, 1, off(offset))
}

#[must_use]
pub const fn bc1fl(offset: i32) -> u32 {
    i_type(17, 8, 2, off(offset))
}

#[must_use]
pub const fn bc1tl(offset: i32) -> u32 {
    i_type(17, 8, 3, off(offset))
}

#[must_use]
pub const fn add_s(fd: u8, fs: u8, ft: u8) -> u32 {
    cop1(16, ft, fs, fd, 0)
}

#[must_use]
pub const fn sub_s(fd: u8, fs: u8, ft: u8) -> u32 {
    cop1(16, ft, fs, fd, 1)
}

#[must_use]
pub const fn mul_s(fd: u8, fs: u8, ft: u8) -> u32 {
    cop1(16, ft, fs, fd, 2)
}

#[must_use]
pub const fn div_s(fd: u8, fs: u8, ft: u8) -> u32 {
    cop1(16, ft, fs, fd, 3)
}

#[must_use]
pub const fn sqrt_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 4)
}

#[must_use]
pub const fn abs_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 5)
}

#[must_use]
pub const fn mov_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 6)
}

#[must_use]
pub const fn neg_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 7)
}

#[must_use]
pub const fn round_w_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 12)
}

#[must_use]
pub const fn trunc_w_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 13)
}

#[must_use]
pub const fn ceil_w_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 14)
}

#[must_use]
pub const fn floor_w_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 15)
}

#[must_use]
pub const fn cvt_w_s(fd: u8, fs: u8) -> u32 {
    cop1(16, 0, fs, fd, 36)
}

#[must_use]
pub const fn cvt_s_w(fd: u8, fs: u8) -> u32 {
    cop1(20, 0, fs, fd, 32)
}

/// `c.cond.s fs, ft` with `cond` in 0..16 (e.g. 2 = eq, 12 = lt, 14 = le).
#[must_use]
pub const fn c_cond_s(cond: u8, fs: u8, ft: u8) -> u32 {
    cop1(16, ft, fs, 0, 48 | (cond as u32 & 0xF))
}

const fn special3(func: u32, rs: u8, rt: u8, rd: u8, sa: u8) -> u32 {
    (0x1F << 26) | r_type(func, rs, rt, rd, sa)
}

/// `ext rt, rs, pos, size`
#[must_use]
pub const fn ext(rt: u8, rs: u8, pos: u8, size: u8) -> u32 {
    special3(0, rs, rt, size - 1, pos)
}

/// `ins rt, rs, pos, size`
#[must_use]
pub const fn ins(rt: u8, rs: u8, pos: u8, size: u8) -> u32 {
    special3(4, rs, rt, pos + size - 1, pos)
}

#[must_use]
pub const fn wsbh(rd: u8, rt: u8) -> u32 {
    special3(0x20, 0, rt, rd, 0x02)
}

#[must_use]
pub const fn wsbw(rd: u8, rt: u8) -> u32 {
    special3(0x20, 0, rt, rd, 0x03)
}

#[must_use]
pub const fn seb(rd: u8, rt: u8) -> u32 {
    special3(0x20, 0, rt, rd, 0x10)
}

#[must_use]
pub const fn bitrev(rd: u8, rt: u8) -> u32 {
    special3(0x20, 0, rt, rd, 0x14)
}

#[must_use]
pub const fn seh(rd: u8, rt: u8) -> u32 {
    special3(0x20, 0, rt, rd, 0x18)
}

/// Little-endian bytes of a program.
#[must_use]
pub fn to_bytes(program: &[u32]) -> Vec<u8> {
    program.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(addiu(1, 0, 5), 0x2401_0005);
        assert_eq!(jr(31), 0x03E0_0008);
        assert_eq!(addu(3, 1, 2), 0x0022_1821);
        assert_eq!(lui(1, 0x0800), 0x3C01_0800);
        assert_eq!(sw(2, 29, 16), 0xAFA2_0010);
        assert_eq!(beq(0, 0, -1), 0x1000_FFFF);
        assert_eq!(syscall(0x2015), 0x0008_054C);
    }

    #[test]
    fn test_to_bytes_little_endian() {
        assert_eq!(to_bytes(&[0x0403_0201]), vec![1, 2, 3, 4]);
    }
}
