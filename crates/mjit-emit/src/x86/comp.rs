//! IR to x86-64 translation.
//!
//! Handlers read operands through the register caches and compute into
//! `eax`/`ecx` when that avoids aliasing questions between `dest` and the
//! sources. Cache calls never touch the scratch registers, so a value in
//! `eax` survives a `map_out`. Flags do not survive cache calls.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use mjit_ir::reg::{IRREG_HI, IRREG_LO, IRREG_ZERO};
use mjit_ir::{Arg, IrBlock, IrInst, IrOp, IrReg};
use mjit_state::{CODE_PAGE_CODE, CODE_PAGE_DIRTY, DIRTY_OVERFLOW, DIRTY_RANGE_SLOTS, GuestState};
use tracing::trace;

use super::asm::{Alu, Assembler, Cond, Mem, Reg, Shift, Sse, Xmm};
use super::emitter::{field, slot};
use super::helpers::exec_ir_addr;
use super::registers::{CODE_PAGES, FSCRATCH, MEMBASE, SAVED, SCRATCH0, SCRATCH1, STATE};
use super::{ExitSite, NativeBlock, PendingExit, X64Backend};
use crate::backend::IrBackend;
use crate::error::EmitError;
use crate::regcache::Location;

/// Constant result of a pure integer op, matching the interpreter.
fn fold(inst: &IrInst, a: u32, b: u32) -> Option<u32> {
    let c = inst.constant;
    let amount = u32::from(inst.src2 & 31);
    Some(match inst.op {
        IrOp::Mov => a,
        IrOp::Add => a.wrapping_add(b),
        IrOp::Sub => a.wrapping_sub(b),
        IrOp::Neg => a.wrapping_neg(),
        IrOp::Not => !a,
        IrOp::And => a & b,
        IrOp::Or => a | b,
        IrOp::Xor => a ^ b,
        IrOp::AddConst => a.wrapping_add(c),
        IrOp::AndConst => a & c,
        IrOp::OrConst => a | c,
        IrOp::XorConst => a ^ c,
        IrOp::Slt => u32::from((a as i32) < (b as i32)),
        IrOp::SltU => u32::from(a < b),
        IrOp::SltConst => u32::from((a as i32) < (c as i32)),
        IrOp::SltUConst => u32::from(a < c),
        IrOp::Shl => a << (b & 31),
        IrOp::Shr => a >> (b & 31),
        IrOp::Sar => ((a as i32) >> (b & 31)) as u32,
        IrOp::Ror => a.rotate_right(b & 31),
        IrOp::ShlImm => a << amount,
        IrOp::ShrImm => a >> amount,
        IrOp::SarImm => ((a as i32) >> amount) as u32,
        IrOp::RorImm => a.rotate_right(amount),
        IrOp::Max => (a as i32).max(b as i32) as u32,
        IrOp::Min => (a as i32).min(b as i32) as u32,
        IrOp::Clz => a.leading_zeros(),
        IrOp::Ext8to32 => a as u8 as i8 as i32 as u32,
        IrOp::Ext16to32 => a as u16 as i16 as i32 as u32,
        IrOp::BSwap16 => ((a & 0xFF00_FF00) >> 8) | ((a & 0x00FF_00FF) << 8),
        IrOp::BSwap32 => a.swap_bytes(),
        IrOp::BitRev => a.reverse_bits(),
        _ => return None,
    })
}

/// Ops whose only effect is a write to `r0`.
fn discards(inst: &IrInst) -> bool {
    inst.dest == IRREG_ZERO && matches!(inst.op.meta().dest, Arg::Gpr) && inst.dest_is_written()
}

const fn alu_of(op: IrOp) -> Option<Alu> {
    match op {
        IrOp::Add | IrOp::AddConst => Some(Alu::Add),
        IrOp::Sub => Some(Alu::Sub),
        IrOp::And | IrOp::AndConst => Some(Alu::And),
        IrOp::Or | IrOp::OrConst => Some(Alu::Or),
        IrOp::Xor | IrOp::XorConst => Some(Alu::Xor),
        _ => None,
    }
}

const fn shift_of(op: IrOp) -> Shift {
    match op {
        IrOp::Shl | IrOp::ShlImm => Shift::Shl,
        IrOp::Shr | IrOp::ShrImm => Shift::Shr,
        IrOp::Sar | IrOp::SarImm => Shift::Sar,
        _ => Shift::Ror,
    }
}

const fn access_width(op: IrOp) -> u32 {
    match op {
        IrOp::Load8 | IrOp::Load8Ext | IrOp::Store8 => 1,
        IrOp::Load16 | IrOp::Load16Ext | IrOp::Store16 => 2,
        _ => 4,
    }
}

fn guest_mem() -> Mem {
    Mem::indexed(MEMBASE, SCRATCH0)
}

impl X64Backend {
    fn known(&self, reg: IrReg) -> Option<u32> {
        self.gpr.is_imm(reg).then(|| self.gpr.imm(reg))
    }

    fn done(&mut self) {
        self.gpr.release_spill_locks();
        self.fpr.release_spill_locks();
    }

    /// Copy `reg`'s current value into `dst` without changing the cache.
    fn read_into(&mut self, dst: Reg, reg: IrReg) {
        if reg == IRREG_LO || reg == IRREG_HI {
            // A 64-bit pair cannot be read one half at a time.
            self.gpr.flush(&mut self.asm, reg);
        }
        match self.gpr.location(reg) {
            Location::Imm(v) => self.asm.mov_ri(dst, v),
            Location::Reg(h) | Location::RegImm(h, _) => {
                let src = Reg::from_index(h);
                if src != dst {
                    self.asm.mov_rr(dst, src);
                }
            }
            Location::RegAsPtr(h) => {
                self.asm.mov_rr64(dst, Reg::from_index(h));
                self.asm.alu_rr64(Alu::Sub, dst, MEMBASE);
            }
            Location::Mem => self.asm.load(dst, slot(reg)),
        }
    }

    /// Bind `dest` to a fresh host register and move `eax` into it.
    fn write_eax(&mut self, dest: IrReg) -> Result<(), EmitError> {
        let d = self.gpr.map_out(&mut self.asm, dest)?;
        self.asm.mov_rr(Reg::from_index(d), SCRATCH0);
        Ok(())
    }

    fn unary(&mut self, inst: &IrInst, body: impl FnOnce(&mut Assembler)) -> Result<(), EmitError> {
        if let Some(v) = self.known(inst.src1).and_then(|a| fold(inst, a, 0)) {
            self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
            return Ok(());
        }
        self.read_into(SCRATCH0, inst.src1);
        body(&mut self.asm);
        self.write_eax(inst.dest)
    }

    fn binary_alu(&mut self, inst: &IrInst, op: Alu) -> Result<(), EmitError> {
        let (a, b) = (self.known(inst.src1), self.known(inst.src2));
        if let (Some(a), Some(b)) = (a, b) {
            if let Some(v) = fold(inst, a, b) {
                self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
                return Ok(());
            }
        }
        self.read_into(SCRATCH0, inst.src1);
        match b {
            Some(b) => self.asm.alu_ri(op, SCRATCH0, b as i32),
            None => {
                self.read_into(SCRATCH1, inst.src2);
                self.asm.alu_rr(op, SCRATCH0, SCRATCH1);
            }
        }
        self.write_eax(inst.dest)
    }

    fn alu_const(&mut self, inst: &IrInst, op: Alu) -> Result<(), EmitError> {
        if let Some(v) = self.known(inst.src1).and_then(|a| fold(inst, a, 0)) {
            self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
            return Ok(());
        }
        let (d, s) = self.gpr.map_dirty_in(&mut self.asm, inst.dest, inst.src1)?;
        let d = Reg::from_index(d);
        if d != Reg::from_index(s) {
            self.asm.mov_rr(d, Reg::from_index(s));
        }
        self.asm.alu_ri(op, d, inst.constant as i32);
        self.done();
        Ok(())
    }

    fn mov(&mut self, dest: IrReg, src: IrReg) -> Result<(), EmitError> {
        if let Some(v) = self.known(src) {
            self.gpr.set_imm(&mut self.asm, dest, v)?;
            return Ok(());
        }
        let (d, s) = self.gpr.map_dirty_in(&mut self.asm, dest, src)?;
        if d != s {
            self.asm.mov_rr(Reg::from_index(d), Reg::from_index(s));
        }
        self.done();
        Ok(())
    }

    /// `eax` = masked, aligned guest offset of `src1 + constant`.
    fn address(&mut self, inst: &IrInst, width: u32) {
        self.read_into(SCRATCH0, inst.src1);
        if inst.constant != 0 {
            self.asm.alu_ri(Alu::Add, SCRATCH0, inst.constant as i32);
        }
        self.asm.alu_rm(Alu::And, SCRATCH0, field(GuestState::mem_mask_offset()));
        if width > 1 {
            self.asm.alu_ri(Alu::And, SCRATCH0, -(width as i32));
        }
    }

    /// After a store at offset `eax`: if it hit a code page, record the
    /// written range and raise `stop`. Mirrors `GuestState::note_code_write`,
    /// flagging the page dirty once the range list is full.
    fn check_code_write(&mut self, width: u32) {
        const ENTRY: i32 = 8;
        let a = &mut self.asm;
        let skip = a.new_label();
        let append = a.new_label();
        let overflow = a.new_label();
        a.mov_rr(SCRATCH1, SCRATCH0);
        a.shift_ri(Shift::Shr, SCRATCH1, mjit_state::CODE_PAGE_SHIFT as u8);
        a.cmp_mi8(Mem::indexed(CODE_PAGES, SCRATCH1), 0);
        a.jcc(Cond::E, skip);
        a.store_imm(field(GuestState::stop_offset()), 1);

        // edx = dirty_count * 8, ecx = end of the write.
        let count = field(GuestState::dirty_count_offset());
        a.load(Reg::Rdx, count);
        a.alu_ri(Alu::Cmp, Reg::Rdx, DIRTY_RANGE_SLOTS as i32);
        a.jcc(Cond::A, overflow);
        a.mov_rr(SCRATCH1, SCRATCH0);
        a.alu_ri(Alu::Add, SCRATCH1, width as i32);
        a.shift_ri(Shift::Shl, Reg::Rdx, 3);
        a.test_rr(Reg::Rdx, Reg::Rdx);
        a.jcc(Cond::E, append);

        let ranges = GuestState::dirty_ranges_offset();
        let entry = |disp: i32| Mem {
            base: STATE,
            index: Some(Reg::Rdx),
            disp: ranges + disp,
        };
        let (last_lo, last_hi) = (entry(-ENTRY), entry(-ENTRY + 4));
        a.alu_mr(Alu::Cmp, last_hi, SCRATCH0);
        a.jcc(Cond::B, append);
        a.alu_mr(Alu::Cmp, last_lo, SCRATCH1);
        a.jcc(Cond::A, append);
        let lo_ok = a.new_label();
        a.alu_mr(Alu::Cmp, last_lo, SCRATCH0);
        a.jcc(Cond::Be, lo_ok);
        a.store(last_lo, SCRATCH0);
        a.bind(lo_ok);
        a.alu_mr(Alu::Cmp, last_hi, SCRATCH1);
        a.jcc(Cond::Ae, skip);
        a.store(last_hi, SCRATCH1);
        a.jmp(skip);

        a.bind(append);
        a.alu_ri(Alu::Cmp, Reg::Rdx, DIRTY_RANGE_SLOTS as i32 * ENTRY);
        a.jcc(Cond::E, overflow);
        a.store(entry(0), SCRATCH0);
        a.store(entry(4), SCRATCH1);
        a.alu_mi(Alu::Add, count, 1);
        a.jmp(skip);

        a.bind(overflow);
        a.store_imm(count, DIRTY_OVERFLOW);
        a.mov_rr(SCRATCH1, SCRATCH0);
        a.shift_ri(Shift::Shr, SCRATCH1, mjit_state::CODE_PAGE_SHIFT as u8);
        a.mov_ri(Reg::Rdx, u32::from(CODE_PAGE_CODE | CODE_PAGE_DIRTY));
        a.store8(Mem::indexed(CODE_PAGES, SCRATCH1), Reg::Rdx);
        a.bind(skip);
    }

    fn flush_all(&mut self) {
        self.gpr.flush_all(&mut self.asm);
        self.fpr.flush_all(&mut self.asm);
    }

    /// Set `pc` and leave through a patchable jump.
    fn exit_to(&mut self, target: u32) {
        self.asm.store_imm(field(GuestState::pc_offset()), target);
        let site = self.asm.jmp(self.epilogue);
        self.exits.push(PendingExit { target, site });
    }

    fn exit_with(&mut self, reason: mjit_state::ExitReason, arg: u32) {
        self.asm.store_imm(field(GuestState::exit_reason_offset()), reason as u32);
        self.asm.store_imm(field(GuestState::exit_arg_offset()), arg);
        self.asm.jmp(self.epilogue);
    }

    fn fpu_binary(&mut self, inst: &IrInst, op: Sse) -> Result<(), EmitError> {
        self.fpr.spill_lock(&[inst.dest, inst.src1, inst.src2]);
        let s1 = self.fpr.map_in(&mut self.asm, inst.src1)?;
        let s2 = self.fpr.map_in(&mut self.asm, inst.src2)?;
        self.asm.movaps(FSCRATCH, Xmm(s1));
        self.asm.sse(op, FSCRATCH, Xmm(s2));
        let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
        self.asm.movaps(Xmm(d), FSCRATCH);
        self.done();
        Ok(())
    }

    fn fpu_bits(&mut self, inst: &IrInst, op: Alu, mask: u32) -> Result<(), EmitError> {
        self.fpr.spill_lock(&[inst.dest, inst.src1]);
        let s = self.fpr.map_in(&mut self.asm, inst.src1)?;
        self.asm.movd_from_xmm(SCRATCH0, Xmm(s));
        self.asm.alu_ri(op, SCRATCH0, mask as i32);
        let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
        self.asm.movd_to_xmm(Xmm(d), SCRATCH0);
        self.done();
        Ok(())
    }

    fn prologue(&mut self) {
        let a = &mut self.asm;
        for r in SAVED {
            a.push(r);
        }
        a.alu_ri64(Alu::Sub, Reg::Rsp, 8);
        a.mov_rr64(STATE, Reg::Rdi);
        a.load64(MEMBASE, field(GuestState::membase_offset()));
        a.load64(CODE_PAGES, field(GuestState::code_pages_offset()));
    }

    /// Linked jumps land here: out of cycles or asked to stop means return.
    fn entry_checks(&mut self) {
        let a = &mut self.asm;
        a.alu_mi(Alu::Cmp, field(GuestState::downcount_offset()), 0);
        a.jcc(Cond::L, self.epilogue);
        a.alu_mi(Alu::Cmp, field(GuestState::stop_offset()), 0);
        a.jcc(Cond::Ne, self.epilogue);
    }

    fn epilogue(&mut self) {
        let a = &mut self.asm;
        a.alu_ri64(Alu::Add, Reg::Rsp, 8);
        for r in SAVED.iter().rev() {
            a.pop(*r);
        }
        a.ret();
    }
}

impl IrBackend for X64Backend {
    type Target = NativeBlock;

    fn begin_block(&mut self, block: &IrBlock) -> Result<(), EmitError> {
        self.asm = Assembler::new();
        self.exits.clear();
        self.epilogue = self.asm.new_label();
        self.prologue();
        self.link_entry = self.asm.offset();
        self.entry_checks();
        self.gpr.start_block(&mut self.asm, &block.insts)?;
        self.fpr.start_block(&mut self.asm, &block.insts)?;
        Ok(())
    }

    fn set_ir_index(&mut self, index: usize) {
        self.gpr.set_ir_index(index);
        self.fpr.set_ir_index(index);
    }

    fn generic_only(&self) -> bool {
        self.generic
    }

    fn comp_const(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        match inst.op {
            IrOp::SetConst => self.gpr.set_imm(&mut self.asm, inst.dest, inst.constant)?,
            _ => {
                let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
                self.asm.mov_ri(SCRATCH0, inst.constant);
                self.asm.movd_to_xmm(Xmm(d), SCRATCH0);
            }
        }
        Ok(())
    }

    fn comp_arith(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        match inst.op {
            IrOp::Mov => self.mov(inst.dest, inst.src1),
            IrOp::Add => self.binary_alu(inst, Alu::Add),
            IrOp::Sub => self.binary_alu(inst, Alu::Sub),
            IrOp::Neg => self.unary(inst, |a| a.neg(SCRATCH0)),
            IrOp::AddConst => self.alu_const(inst, Alu::Add),
            _ => self.comp_generic(inst),
        }
    }

    fn comp_logic(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        match inst.op {
            IrOp::Not => self.unary(inst, |a| a.not(SCRATCH0)),
            IrOp::And | IrOp::Or | IrOp::Xor => {
                let op = alu_of(inst.op).ok_or(EmitError::Unsupported(inst.op))?;
                self.binary_alu(inst, op)
            }
            IrOp::AndConst | IrOp::OrConst | IrOp::XorConst => {
                let op = alu_of(inst.op).ok_or(EmitError::Unsupported(inst.op))?;
                self.alu_const(inst, op)
            }
            IrOp::Clz => {
                if let Some(v) = self.known(inst.src1).and_then(|a| fold(inst, a, 0)) {
                    self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
                    return Ok(());
                }
                self.read_into(SCRATCH1, inst.src1);
                let a = &mut self.asm;
                a.bsr(SCRATCH0, SCRATCH1);
                a.mov_ri(SCRATCH1, 63);
                a.cmov(Cond::E, SCRATCH0, SCRATCH1);
                a.alu_ri(Alu::Xor, SCRATCH0, 31);
                self.write_eax(inst.dest)
            }
            IrOp::Ext8to32 => self.unary(inst, |a| a.movsx8(SCRATCH0, SCRATCH0)),
            IrOp::Ext16to32 => self.unary(inst, |a| a.movsx16(SCRATCH0, SCRATCH0)),
            IrOp::BSwap16 => self.unary(inst, |a| {
                a.bswap(SCRATCH0);
                a.shift_ri(Shift::Rol, SCRATCH0, 16);
            }),
            IrOp::BSwap32 => self.unary(inst, |a| a.bswap(SCRATCH0)),
            _ => self.comp_generic(inst),
        }
    }

    fn comp_shift(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        let op = shift_of(inst.op);
        let by_reg = matches!(inst.op, IrOp::Shl | IrOp::Shr | IrOp::Sar | IrOp::Ror);
        let a = self.known(inst.src1);
        let b = if by_reg { self.known(inst.src2) } else { Some(0) };
        if let (Some(a), Some(b)) = (a, b) {
            if let Some(v) = fold(inst, a, b) {
                self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
                return Ok(());
            }
        }
        if by_reg {
            if let Some(b) = b {
                self.read_into(SCRATCH0, inst.src1);
                self.asm.shift_ri(op, SCRATCH0, (b & 31) as u8);
            } else {
                self.read_into(SCRATCH1, inst.src2);
                self.read_into(SCRATCH0, inst.src1);
                self.asm.shift_cl(op, SCRATCH0);
            }
        } else {
            self.read_into(SCRATCH0, inst.src1);
            self.asm.shift_ri(op, SCRATCH0, inst.src2 & 31);
        }
        self.write_eax(inst.dest)
    }

    fn comp_compare(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        let with_const = matches!(inst.op, IrOp::SltConst | IrOp::SltUConst);
        let a = self.known(inst.src1);
        let b = if with_const {
            Some(inst.constant)
        } else {
            self.known(inst.src2)
        };
        if let (Some(a), Some(b)) = (a, b) {
            if let Some(v) = fold(inst, a, b) {
                self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
                return Ok(());
            }
        }
        self.read_into(SCRATCH0, inst.src1);
        match b {
            Some(b) => self.asm.alu_ri(Alu::Cmp, SCRATCH0, b as i32),
            None => {
                self.read_into(SCRATCH1, inst.src2);
                self.asm.alu_rr(Alu::Cmp, SCRATCH0, SCRATCH1);
            }
        }
        let cond = match inst.op {
            IrOp::Slt | IrOp::SltConst => Cond::L,
            _ => Cond::B,
        };
        self.asm.setcc(cond, SCRATCH0);
        self.asm.movzx8(SCRATCH0, SCRATCH0);
        self.write_eax(inst.dest)
    }

    fn comp_cond_move(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        match inst.op {
            IrOp::MovZ | IrOp::MovNZ => {
                let want_zero = inst.op == IrOp::MovZ;
                if let Some(b) = self.known(inst.src2) {
                    return if (b == 0) == want_zero {
                        self.mov(inst.dest, inst.src1)
                    } else {
                        Ok(())
                    };
                }
                self.gpr.spill_lock(&[inst.dest, inst.src1, inst.src2]);
                let s1 = self.gpr.map_in(&mut self.asm, inst.src1)?;
                let s2 = self.gpr.map_in(&mut self.asm, inst.src2)?;
                let d = self.gpr.map_in_out(&mut self.asm, inst.dest)?;
                let (d, s1, s2) = (Reg::from_index(d), Reg::from_index(s1), Reg::from_index(s2));
                self.asm.test_rr(s2, s2);
                self.asm.cmov(if want_zero { Cond::E } else { Cond::Ne }, d, s1);
                self.done();
                Ok(())
            }
            IrOp::Max | IrOp::Min => {
                if let (Some(a), Some(b)) = (self.known(inst.src1), self.known(inst.src2)) {
                    if let Some(v) = fold(inst, a, b) {
                        self.gpr.set_imm(&mut self.asm, inst.dest, v)?;
                        return Ok(());
                    }
                }
                self.read_into(SCRATCH0, inst.src1);
                self.read_into(SCRATCH1, inst.src2);
                self.asm.alu_rr(Alu::Cmp, SCRATCH0, SCRATCH1);
                let take_second = if inst.op == IrOp::Max { Cond::L } else { Cond::G };
                self.asm.cmov(take_second, SCRATCH0, SCRATCH1);
                self.write_eax(inst.dest)
            }
            _ => self.comp_generic(inst),
        }
    }

    fn comp_mult(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        let signed = match inst.op {
            IrOp::Mult | IrOp::Madd | IrOp::Msub => true,
            IrOp::MultU | IrOp::MaddU | IrOp::MsubU => false,
            _ => return self.comp_generic(inst),
        };
        self.read_into(SCRATCH0, inst.src1);
        self.read_into(SCRATCH1, inst.src2);
        if signed {
            self.asm.movsxd(SCRATCH0, SCRATCH0);
            self.asm.movsxd(SCRATCH1, SCRATCH1);
        }
        self.asm.imul_rr64(SCRATCH0, SCRATCH1);

        let accumulate = !matches!(inst.op, IrOp::Mult | IrOp::MultU);
        let pair = Reg::from_index(self.gpr.map_pair64(&mut self.asm, accumulate)?);
        match inst.op {
            IrOp::Madd | IrOp::MaddU => self.asm.alu_rr64(Alu::Add, pair, SCRATCH0),
            IrOp::Msub | IrOp::MsubU => self.asm.alu_rr64(Alu::Sub, pair, SCRATCH0),
            _ => self.asm.mov_rr64(pair, SCRATCH0),
        }
        self.done();
        Ok(())
    }

    fn comp_load(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        if matches!(inst.op, IrOp::Load32Left | IrOp::Load32Right) {
            return self.comp_generic(inst);
        }

        // Byte loads straight through a host pointer.
        if self.pointerify
            && matches!(inst.op, IrOp::Load8 | IrOp::Load8Ext)
            && inst.constant == 0
            && self.known(inst.src1).is_none()
        {
            self.gpr.spill_lock(&[inst.dest, inst.src1]);
            let p = Reg::from_index(self.gpr.pointerify(&mut self.asm, inst.src1)?);
            let d = Reg::from_index(self.gpr.map_out(&mut self.asm, inst.dest)?);
            if inst.op == IrOp::Load8 {
                self.asm.movzx8_load(d, Mem::base(p, 0));
            } else {
                self.asm.movsx8_load(d, Mem::base(p, 0));
            }
            self.done();
            return Ok(());
        }

        self.address(inst, access_width(inst.op));
        if inst.op == IrOp::LoadFloat {
            let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
            self.asm.movss_load(Xmm(d), guest_mem());
            return Ok(());
        }
        let d = Reg::from_index(self.gpr.map_out(&mut self.asm, inst.dest)?);
        match inst.op {
            IrOp::Load8 => self.asm.movzx8_load(d, guest_mem()),
            IrOp::Load8Ext => self.asm.movsx8_load(d, guest_mem()),
            IrOp::Load16 => self.asm.movzx16_load(d, guest_mem()),
            IrOp::Load16Ext => self.asm.movsx16_load(d, guest_mem()),
            _ => self.asm.load(d, guest_mem()),
        }
        Ok(())
    }

    fn comp_store(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if matches!(inst.op, IrOp::Store32Left | IrOp::Store32Right) {
            return self.comp_generic(inst);
        }
        let width = access_width(inst.op);
        if inst.op == IrOp::StoreFloat {
            self.fpr.spill_lock(&[inst.dest]);
            let v = self.fpr.map_in(&mut self.asm, inst.dest)?;
            self.address(inst, width);
            self.asm.movss_store(guest_mem(), Xmm(v));
            self.done();
        } else {
            self.address(inst, width);
            self.read_into(SCRATCH1, inst.dest);
            match width {
                1 => self.asm.store8(guest_mem(), SCRATCH1),
                2 => self.asm.store16(guest_mem(), SCRATCH1),
                _ => self.asm.store(guest_mem(), SCRATCH1),
            }
        }
        self.check_code_write(width);
        Ok(())
    }

    fn comp_fpu(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        if discards(inst) {
            return Ok(());
        }
        match inst.op {
            IrOp::FAdd => self.fpu_binary(inst, Sse::Add),
            IrOp::FSub => self.fpu_binary(inst, Sse::Sub),
            IrOp::FMul => self.fpu_binary(inst, Sse::Mul),
            IrOp::FDiv => self.fpu_binary(inst, Sse::Div),
            IrOp::FSqrt => {
                self.fpr.spill_lock(&[inst.dest, inst.src1]);
                let s = self.fpr.map_in(&mut self.asm, inst.src1)?;
                self.asm.sse(Sse::Sqrt, FSCRATCH, Xmm(s));
                let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
                self.asm.movaps(Xmm(d), FSCRATCH);
                self.done();
                Ok(())
            }
            IrOp::FNeg => self.fpu_bits(inst, Alu::Xor, 0x8000_0000),
            IrOp::FAbs => self.fpu_bits(inst, Alu::And, 0x7FFF_FFFF),
            IrOp::FMov => {
                self.fpr.spill_lock(&[inst.dest, inst.src1]);
                let s = self.fpr.map_in(&mut self.asm, inst.src1)?;
                let d = if inst.dest == inst.src1 {
                    self.fpr.map_in_out(&mut self.asm, inst.dest)?
                } else {
                    self.fpr.map_out(&mut self.asm, inst.dest)?
                };
                if d != s {
                    self.asm.movaps(Xmm(d), Xmm(s));
                }
                self.done();
                Ok(())
            }
            IrOp::FMovFromGpr => {
                self.read_into(SCRATCH0, inst.src1);
                let d = self.fpr.map_out(&mut self.asm, inst.dest)?;
                self.asm.movd_to_xmm(Xmm(d), SCRATCH0);
                Ok(())
            }
            IrOp::FMovToGpr => {
                self.fpr.spill_lock(&[inst.src1]);
                let s = self.fpr.map_in(&mut self.asm, inst.src1)?;
                self.asm.movd_from_xmm(SCRATCH0, Xmm(s));
                self.done();
                self.write_eax(inst.dest)
            }
            _ => self.comp_generic(inst),
        }
    }

    fn comp_exit(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.flush_all();
        match inst.op {
            IrOp::Syscall => self.exit_with(mjit_state::ExitReason::Syscall, inst.constant),
            IrOp::Break => self.exit_with(mjit_state::ExitReason::Break, inst.constant),
            IrOp::ExitToConst => self.exit_to(inst.constant),
            IrOp::ExitToReg => {
                self.read_into(SCRATCH0, inst.src1);
                self.asm.store(field(GuestState::pc_offset()), SCRATCH0);
                self.asm.jmp(self.epilogue);
            }
            op => {
                self.read_into(SCRATCH0, inst.src1);
                let cond = match op {
                    IrOp::ExitToConstIfEq | IrOp::ExitToConstIfNeq => {
                        self.read_into(SCRATCH1, inst.src2);
                        self.asm.alu_rr(Alu::Cmp, SCRATCH0, SCRATCH1);
                        if op == IrOp::ExitToConstIfEq { Cond::E } else { Cond::Ne }
                    }
                    _ => {
                        self.asm.alu_ri(Alu::Cmp, SCRATCH0, 0);
                        match op {
                            IrOp::ExitToConstIfGtZ => Cond::G,
                            IrOp::ExitToConstIfGeZ => Cond::Ge,
                            IrOp::ExitToConstIfLtZ => Cond::L,
                            IrOp::ExitToConstIfLeZ => Cond::Le,
                            _ => return Err(EmitError::Unsupported(op)),
                        }
                    }
                };
                let skip = self.asm.new_label();
                self.asm.jcc(cond.invert(), skip);
                self.exit_to(inst.constant);
                self.asm.bind(skip);
            }
        }
        Ok(())
    }

    fn comp_system(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        match inst.op {
            IrOp::Downcount => {
                self.asm
                    .alu_mi(Alu::Sub, field(GuestState::downcount_offset()), inst.constant as i32);
            }
            IrOp::SetPc => {
                self.read_into(SCRATCH0, inst.src1);
                self.asm.store(field(GuestState::pc_offset()), SCRATCH0);
            }
            IrOp::SetPcConst => self.asm.store_imm(field(GuestState::pc_offset()), inst.constant),
            _ => return self.comp_generic(inst),
        }
        Ok(())
    }

    fn comp_generic(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        trace!(op = inst.op.name(), "helper call");
        self.flush_all();
        let a = &mut self.asm;
        a.mov_rr64(Reg::Rdi, STATE);
        a.mov_ri(Reg::Rsi, inst.pack());
        a.mov_ri(Reg::Rdx, inst.constant);
        a.mov_ri64(SCRATCH0, exec_ir_addr());
        a.call_r(SCRATCH0);
        a.test_rr(SCRATCH0, SCRATCH0);
        a.jcc(Cond::Ne, self.epilogue);
        self.gpr.reload_statics(&mut self.asm);
        self.fpr.reload_statics(&mut self.asm);
        Ok(())
    }

    fn end_block(&mut self, block: &IrBlock) -> Result<NativeBlock, EmitError> {
        // Blocks that fall off the end still write back.
        self.flush_all();
        self.asm.bind(self.epilogue);
        let epilogue = self.asm.offset();
        self.epilogue();
        self.asm.buf_mut().resolve()?;

        let code = self.asm.buf().code();
        let offset = self.space.commit(code)?;
        let exits = self
            .exits
            .drain(..)
            .map(|p| ExitSite {
                target: p.target,
                patch: offset + p.site,
                fallback: offset + epilogue,
            })
            .collect();
        trace!(
            start = format_args!("{:#010x}", block.start),
            bytes = code.len(),
            generic = self.generic,
            "block emitted"
        );
        Ok(NativeBlock {
            offset,
            len: code.len(),
            link_entry: offset + self.link_entry,
            epilogue: offset + epilogue,
            exits,
            generic: self.generic,
        })
    }
}
