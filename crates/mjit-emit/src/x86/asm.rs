//! x86-64 instruction encoding.
//!
//! Only the forms the block compiler needs. Integer ops are 32-bit unless
//! the name ends in `64`; guest values never need more except for the
//! LO/HI pair and host pointers.

use super::codebuf::{CodeBuffer, Label};

/// x86-64 general-purpose registers, numbered as in the encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    const ALL: [Self; 16] = [
        Self::Rax,
        Self::Rcx,
        Self::Rdx,
        Self::Rbx,
        Self::Rsp,
        Self::Rbp,
        Self::Rsi,
        Self::Rdi,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// Register with encoding number `index & 15`.
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        Self::ALL[(index & 15) as usize]
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    const fn low(self) -> u8 {
        self as u8 & 7
    }

    const fn high(self) -> u8 {
        (self as u8 >> 3) & 1
    }
}

/// SSE register `xmm0`..`xmm15`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Xmm(pub u8);

/// Condition codes for `jcc`, `setcc` and `cmovcc`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl Cond {
    #[must_use]
    pub const fn invert(self) -> Self {
        match self {
            Self::B => Self::Ae,
            Self::Ae => Self::B,
            Self::E => Self::Ne,
            Self::Ne => Self::E,
            Self::Be => Self::A,
            Self::A => Self::Be,
            Self::L => Self::Ge,
            Self::Ge => Self::L,
            Self::Le => Self::G,
            Self::G => Self::Le,
        }
    }
}

/// Group-1 ALU operations, by their `/digit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Alu {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Group-2 shift and rotate operations, by their `/digit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Shift {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Scalar single-precision SSE arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Sse {
    Sqrt = 0x51,
    Add = 0x58,
    Mul = 0x59,
    Sub = 0x5C,
    Div = 0x5E,
}

/// `[base + index + disp]` memory operand (index scale is always 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mem {
    pub base: Reg,
    pub index: Option<Reg>,
    pub disp: i32,
}

impl Mem {
    #[must_use]
    pub const fn base(base: Reg, disp: i32) -> Self {
        Self {
            base,
            index: None,
            disp,
        }
    }

    #[must_use]
    pub const fn indexed(base: Reg, index: Reg) -> Self {
        Self {
            base,
            index: Some(index),
            disp: 0,
        }
    }
}

#[derive(Clone, Copy)]
enum Rm {
    Reg(u8),
    Mem(Mem),
}

/// Whether an 8-bit operand in register `index` needs a REX prefix
/// (`spl`, `bpl`, `sil`, `dil` instead of `ah`..`bh`).
const fn byte_needs_rex(index: u8) -> bool {
    index >= 4 && index < 8
}

const fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Machine code emitter over a [`CodeBuffer`].
#[derive(Debug, Default)]
pub struct Assembler {
    buf: CodeBuffer,
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn buf(&self) -> &CodeBuffer {
        &self.buf
    }

    pub const fn buf_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    fn encode(&mut self, prefix: Option<u8>, w: bool, force_rex: bool, opcode: &[u8], reg: u8, rm: Rm) {
        if let Some(p) = prefix {
            self.buf.emit_u8(p);
        }
        let (x, b) = match rm {
            Rm::Reg(r) => (0, (r >> 3) & 1),
            Rm::Mem(m) => (m.index.map_or(0, Reg::high), m.base.high()),
        };
        let rex = 0x40 | (u8::from(w) << 3) | (((reg >> 3) & 1) << 2) | (x << 1) | b;
        if rex != 0x40 || force_rex {
            self.buf.emit_u8(rex);
        }
        self.buf.emit_bytes(opcode);
        match rm {
            Rm::Reg(r) => self.buf.emit_u8(modrm(3, reg, r)),
            Rm::Mem(m) => self.mem_operand(reg, m),
        }
    }

    fn mem_operand(&mut self, reg: u8, m: Mem) {
        let base = m.base.low();
        let mode = if m.disp == 0 && base != 5 {
            0
        } else if i8::try_from(m.disp).is_ok() {
            1
        } else {
            2
        };
        if m.index.is_some() || base == 4 {
            self.buf.emit_u8(modrm(mode, reg, 4));
            let index = m.index.map_or(4, Reg::low);
            self.buf.emit_u8((index << 3) | base);
        } else {
            self.buf.emit_u8(modrm(mode, reg, base));
        }
        match mode {
            0 => {}
            1 => self.buf.emit_u8(m.disp as u8),
            _ => self.buf.emit_u32(m.disp as u32),
        }
    }

    fn imm_group1(&mut self, w: bool, op: Alu, rm: Rm, imm: i32) {
        if let Ok(small) = i8::try_from(imm) {
            self.encode(None, w, false, &[0x83], op as u8, rm);
            self.buf.emit_u8(small as u8);
        } else {
            self.encode(None, w, false, &[0x81], op as u8, rm);
            self.buf.emit_u32(imm as u32);
        }
    }

    // Moves.

    /// `mov dst, src` (32-bit, zero-extends).
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.encode(None, false, false, &[0x89], src.index(), Rm::Reg(dst.index()));
    }

    pub fn mov_rr64(&mut self, dst: Reg, src: Reg) {
        self.encode(None, true, false, &[0x89], src.index(), Rm::Reg(dst.index()));
    }

    /// `mov dst, imm32`.
    pub fn mov_ri(&mut self, dst: Reg, imm: u32) {
        if dst.high() != 0 {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0xB8 + dst.low());
        self.buf.emit_u32(imm);
    }

    /// `mov dst, imm64`.
    pub fn mov_ri64(&mut self, dst: Reg, imm: u64) {
        self.buf.emit_u8(0x48 | dst.high());
        self.buf.emit_u8(0xB8 + dst.low());
        self.buf.emit_u64(imm);
    }

    pub fn load(&mut self, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[0x8B], dst.index(), Rm::Mem(src));
    }

    pub fn load64(&mut self, dst: Reg, src: Mem) {
        self.encode(None, true, false, &[0x8B], dst.index(), Rm::Mem(src));
    }

    pub fn store(&mut self, dst: Mem, src: Reg) {
        self.encode(None, false, false, &[0x89], src.index(), Rm::Mem(dst));
    }

    pub fn store64(&mut self, dst: Mem, src: Reg) {
        self.encode(None, true, false, &[0x89], src.index(), Rm::Mem(dst));
    }

    pub fn store8(&mut self, dst: Mem, src: Reg) {
        self.encode(None, false, byte_needs_rex(src.index()), &[0x88], src.index(), Rm::Mem(dst));
    }

    pub fn store16(&mut self, dst: Mem, src: Reg) {
        self.encode(Some(0x66), false, false, &[0x89], src.index(), Rm::Mem(dst));
    }

    /// `mov dword [dst], imm32`.
    pub fn store_imm(&mut self, dst: Mem, imm: u32) {
        self.encode(None, false, false, &[0xC7], 0, Rm::Mem(dst));
        self.buf.emit_u32(imm);
    }

    pub fn movzx8_load(&mut self, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[0x0F, 0xB6], dst.index(), Rm::Mem(src));
    }

    pub fn movsx8_load(&mut self, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[0x0F, 0xBE], dst.index(), Rm::Mem(src));
    }

    pub fn movzx16_load(&mut self, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[0x0F, 0xB7], dst.index(), Rm::Mem(src));
    }

    pub fn movsx16_load(&mut self, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[0x0F, 0xBF], dst.index(), Rm::Mem(src));
    }

    /// `movzx dst, src8`.
    pub fn movzx8(&mut self, dst: Reg, src: Reg) {
        let rex = byte_needs_rex(src.index());
        self.encode(None, false, rex, &[0x0F, 0xB6], dst.index(), Rm::Reg(src.index()));
    }

    /// `movsx dst, src8`.
    pub fn movsx8(&mut self, dst: Reg, src: Reg) {
        let rex = byte_needs_rex(src.index());
        self.encode(None, false, rex, &[0x0F, 0xBE], dst.index(), Rm::Reg(src.index()));
    }

    /// `movsx dst, src16`.
    pub fn movsx16(&mut self, dst: Reg, src: Reg) {
        self.encode(None, false, false, &[0x0F, 0xBF], dst.index(), Rm::Reg(src.index()));
    }

    /// `movsxd dst64, src32`.
    pub fn movsxd(&mut self, dst: Reg, src: Reg) {
        self.encode(None, true, false, &[0x63], dst.index(), Rm::Reg(src.index()));
    }

    // Integer arithmetic.

    pub fn alu_rr(&mut self, op: Alu, dst: Reg, src: Reg) {
        self.encode(None, false, false, &[((op as u8) << 3) | 1], src.index(), Rm::Reg(dst.index()));
    }

    pub fn alu_rr64(&mut self, op: Alu, dst: Reg, src: Reg) {
        self.encode(None, true, false, &[((op as u8) << 3) | 1], src.index(), Rm::Reg(dst.index()));
    }

    pub fn alu_ri(&mut self, op: Alu, dst: Reg, imm: i32) {
        self.imm_group1(false, op, Rm::Reg(dst.index()), imm);
    }

    pub fn alu_ri64(&mut self, op: Alu, dst: Reg, imm: i32) {
        self.imm_group1(true, op, Rm::Reg(dst.index()), imm);
    }

    /// `op dword [dst], imm`.
    pub fn alu_mi(&mut self, op: Alu, dst: Mem, imm: i32) {
        self.imm_group1(false, op, Rm::Mem(dst), imm);
    }

    /// `op dst, dword [src]`.
    pub fn alu_rm(&mut self, op: Alu, dst: Reg, src: Mem) {
        self.encode(None, false, false, &[((op as u8) << 3) | 3], dst.index(), Rm::Mem(src));
    }

    /// `op dword [dst], src`.
    pub fn alu_mr(&mut self, op: Alu, dst: Mem, src: Reg) {
        self.encode(None, false, false, &[((op as u8) << 3) | 1], src.index(), Rm::Mem(dst));
    }

    /// `cmp byte [dst], imm8`.
    pub fn cmp_mi8(&mut self, dst: Mem, imm: u8) {
        self.encode(None, false, false, &[0x80], Alu::Cmp as u8, Rm::Mem(dst));
        self.buf.emit_u8(imm);
    }

    pub fn test_rr(&mut self, a: Reg, b: Reg) {
        self.encode(None, false, false, &[0x85], b.index(), Rm::Reg(a.index()));
    }

    pub fn neg(&mut self, r: Reg) {
        self.encode(None, false, false, &[0xF7], 3, Rm::Reg(r.index()));
    }

    pub fn not(&mut self, r: Reg) {
        self.encode(None, false, false, &[0xF7], 2, Rm::Reg(r.index()));
    }

    /// Shift or rotate by an immediate.
    pub fn shift_ri(&mut self, op: Shift, r: Reg, amount: u8) {
        self.encode(None, false, false, &[0xC1], op as u8, Rm::Reg(r.index()));
        self.buf.emit_u8(amount);
    }

    pub fn shift_ri64(&mut self, op: Shift, r: Reg, amount: u8) {
        self.encode(None, true, false, &[0xC1], op as u8, Rm::Reg(r.index()));
        self.buf.emit_u8(amount);
    }

    /// Shift or rotate by `cl`.
    pub fn shift_cl(&mut self, op: Shift, r: Reg) {
        self.encode(None, false, false, &[0xD3], op as u8, Rm::Reg(r.index()));
    }

    /// `imul dst64, src64`.
    pub fn imul_rr64(&mut self, dst: Reg, src: Reg) {
        self.encode(None, true, false, &[0x0F, 0xAF], dst.index(), Rm::Reg(src.index()));
    }

    pub fn setcc(&mut self, cond: Cond, dst: Reg) {
        let rex = byte_needs_rex(dst.index());
        self.encode(None, false, rex, &[0x0F, 0x90 | cond as u8], 0, Rm::Reg(dst.index()));
    }

    pub fn cmov(&mut self, cond: Cond, dst: Reg, src: Reg) {
        self.encode(None, false, false, &[0x0F, 0x40 | cond as u8], dst.index(), Rm::Reg(src.index()));
    }

    pub fn bsr(&mut self, dst: Reg, src: Reg) {
        self.encode(None, false, false, &[0x0F, 0xBD], dst.index(), Rm::Reg(src.index()));
    }

    pub fn bswap(&mut self, r: Reg) {
        if r.high() != 0 {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_bytes(&[0x0F, 0xC8 + r.low()]);
    }

    // Control flow.

    pub fn push(&mut self, r: Reg) {
        if r.high() != 0 {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x50 + r.low());
    }

    pub fn pop(&mut self, r: Reg) {
        if r.high() != 0 {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x58 + r.low());
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    /// `call r`.
    pub fn call_r(&mut self, r: Reg) {
        self.encode(None, false, false, &[0xFF], 2, Rm::Reg(r.index()));
    }

    /// `jmp rel32` to `label`. Returns the offset of the rel32 field.
    pub fn jmp(&mut self, label: Label) -> usize {
        self.buf.emit_u8(0xE9);
        self.buf.emit_rel32(label)
    }

    /// `jcc rel32` to `label`. Returns the offset of the rel32 field.
    pub fn jcc(&mut self, cond: Cond, label: Label) -> usize {
        self.buf.emit_bytes(&[0x0F, 0x80 | cond as u8]);
        self.buf.emit_rel32(label)
    }

    // SSE.

    /// `movd dst, src` (GPR to XMM).
    pub fn movd_to_xmm(&mut self, dst: Xmm, src: Reg) {
        self.encode(Some(0x66), false, false, &[0x0F, 0x6E], dst.0, Rm::Reg(src.index()));
    }

    /// `movd dst, src` (XMM to GPR).
    pub fn movd_from_xmm(&mut self, dst: Reg, src: Xmm) {
        self.encode(Some(0x66), false, false, &[0x0F, 0x7E], src.0, Rm::Reg(dst.index()));
    }

    pub fn movss_load(&mut self, dst: Xmm, src: Mem) {
        self.encode(Some(0xF3), false, false, &[0x0F, 0x10], dst.0, Rm::Mem(src));
    }

    pub fn movss_store(&mut self, dst: Mem, src: Xmm) {
        self.encode(Some(0xF3), false, false, &[0x0F, 0x11], src.0, Rm::Mem(dst));
    }

    pub fn movaps(&mut self, dst: Xmm, src: Xmm) {
        self.encode(None, false, false, &[0x0F, 0x28], dst.0, Rm::Reg(src.0));
    }

    /// `addss`/`subss`/`mulss`/`divss`/`sqrtss dst, src`.
    pub fn sse(&mut self, op: Sse, dst: Xmm, src: Xmm) {
        self.encode(Some(0xF3), false, false, &[0x0F, op as u8], dst.0, Rm::Reg(src.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut a = Assembler::new();
        f(&mut a);
        a.buf().code().to_vec()
    }

    #[test]
    fn test_register_moves() {
        assert_eq!(bytes(|a| a.mov_rr(Reg::Rax, Reg::Rcx)), [0x89, 0xC8]);
        assert_eq!(bytes(|a| a.mov_rr64(Reg::Rdi, Reg::R13)), [0x4C, 0x89, 0xEF]);
        assert_eq!(bytes(|a| a.mov_ri(Reg::R9, 7)), [0x41, 0xB9, 7, 0, 0, 0]);
        assert_eq!(
            bytes(|a| a.mov_ri64(Reg::Rax, 0x1122_3344_5566_7788)),
            [0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_memory_operands() {
        // mov r13d, [rbx + 0x18]
        assert_eq!(bytes(|a| a.load(Reg::R13, Mem::base(Reg::Rbx, 0x18))), [0x44, 0x8B, 0x6B, 0x18]);
        // mov eax, [r15 + rax]
        assert_eq!(bytes(|a| a.load(Reg::Rax, Mem::indexed(Reg::R15, Reg::Rax))), [0x41, 0x8B, 0x04, 0x07]);
        // rbp/r13 bases always carry a displacement.
        assert_eq!(bytes(|a| a.load(Reg::Rax, Mem::base(Reg::R13, 0))), [0x41, 0x8B, 0x45, 0x00]);
        // rsp/r12 bases need a SIB byte.
        assert_eq!(bytes(|a| a.load(Reg::Rax, Mem::base(Reg::R12, 0))), [0x41, 0x8B, 0x04, 0x24]);
        // mov rax, [rbx + 0x200]
        assert_eq!(
            bytes(|a| a.load64(Reg::Rax, Mem::base(Reg::Rbx, 0x200))),
            [0x48, 0x8B, 0x83, 0x00, 0x02, 0x00, 0x00]
        );
        // cmp byte [r14 + rcx], 0
        assert_eq!(
            bytes(|a| a.cmp_mi8(Mem::indexed(Reg::R14, Reg::Rcx), 0)),
            [0x41, 0x80, 0x3C, 0x0E, 0x00]
        );
    }

    #[test]
    fn test_byte_registers_get_rex() {
        assert_eq!(bytes(|a| a.movzx8(Reg::Rax, Reg::Rsi)), [0x40, 0x0F, 0xB6, 0xC6]);
        assert_eq!(bytes(|a| a.movzx8(Reg::Rax, Reg::Rax)), [0x0F, 0xB6, 0xC0]);
        assert_eq!(bytes(|a| a.setcc(Cond::L, Reg::Rax)), [0x0F, 0x9C, 0xC0]);
        assert_eq!(
            bytes(|a| a.store8(Mem::indexed(Reg::R15, Reg::Rax), Reg::Rdi)),
            [0x41, 0x88, 0x3C, 0x07]
        );
    }

    #[test]
    fn test_alu_immediates() {
        assert_eq!(bytes(|a| a.alu_ri64(Alu::Add, Reg::Rsp, 8)), [0x48, 0x83, 0xC4, 0x08]);
        assert_eq!(
            bytes(|a| a.alu_ri(Alu::And, Reg::Rax, 0x7FFF_FFFF)),
            [0x81, 0xE0, 0xFF, 0xFF, 0xFF, 0x7F]
        );
        // sub dword [rbx + 0x21c], 5
        assert_eq!(
            bytes(|a| a.alu_mi(Alu::Sub, Mem::base(Reg::Rbx, 0x21C), 5)),
            [0x83, 0xAB, 0x1C, 0x02, 0x00, 0x00, 0x05]
        );
        // and eax, [rbx + 0x20]
        assert_eq!(bytes(|a| a.alu_rm(Alu::And, Reg::Rax, Mem::base(Reg::Rbx, 0x20))), [0x23, 0x43, 0x20]);
    }

    #[test]
    fn test_misc_encodings() {
        assert_eq!(bytes(|a| a.push(Reg::R15)), [0x41, 0x57]);
        assert_eq!(bytes(|a| a.pop(Reg::Rbx)), [0x5B]);
        assert_eq!(bytes(|a| a.call_r(Reg::Rax)), [0xFF, 0xD0]);
        assert_eq!(bytes(|a| a.imul_rr64(Reg::Rax, Reg::Rcx)), [0x48, 0x0F, 0xAF, 0xC1]);
        assert_eq!(bytes(|a| a.movsxd(Reg::Rax, Reg::R13)), [0x49, 0x63, 0xC5]);
        assert_eq!(bytes(|a| a.cmov(Cond::E, Reg::Rax, Reg::Rcx)), [0x0F, 0x44, 0xC1]);
        assert_eq!(bytes(|a| a.bswap(Reg::R12)), [0x41, 0x0F, 0xCC]);
        assert_eq!(bytes(|a| a.shift_cl(Shift::Sar, Reg::Rax)), [0xD3, 0xF8]);
        assert_eq!(bytes(|a| a.shift_ri(Shift::Rol, Reg::Rax, 16)), [0xC1, 0xC0, 0x10]);
    }

    #[test]
    fn test_sse_encodings() {
        assert_eq!(bytes(|a| a.sse(Sse::Add, Xmm(0), Xmm(9))), [0xF3, 0x41, 0x0F, 0x58, 0xC1]);
        assert_eq!(bytes(|a| a.movd_to_xmm(Xmm(2), Reg::Rax)), [0x66, 0x0F, 0x6E, 0xD0]);
        assert_eq!(bytes(|a| a.movd_from_xmm(Reg::Rax, Xmm(10))), [0x66, 0x44, 0x0F, 0x7E, 0xD0]);
        assert_eq!(bytes(|a| a.movaps(Xmm(3), Xmm(0))), [0x0F, 0x28, 0xD8]);
    }

    #[test]
    fn test_jumps_resolve_to_labels() {
        let mut a = Assembler::new();
        let done = a.new_label();
        let site = a.jcc(Cond::Ne, done);
        a.ret();
        a.bind(done);
        a.buf_mut().resolve().expect("bound");
        assert_eq!(site, 2);
        assert_eq!(a.buf().code(), [0x0F, 0x85, 0x01, 0x00, 0x00, 0x00, 0xC3]);
    }

    #[test]
    fn test_cond_invert_round_trips() {
        for c in [Cond::B, Cond::E, Cond::Be, Cond::L, Cond::Le] {
            assert_ne!(c.invert(), c);
            assert_eq!(c.invert().invert(), c);
        }
    }
}
