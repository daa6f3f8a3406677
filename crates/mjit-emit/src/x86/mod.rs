//! x86-64 native backend.
//!
//! - [`asm`]: instruction encoding
//! - [`codebuf`]: byte buffer with labels
//! - [`code_space`]: W^X executable memory
//! - [`registers`]: host register roles
//! - [`emitter`]: register cache spills and fills
//! - `comp`: per-category IR translation
//! - [`helpers`]: functions native code calls
//!
//! Every block is a complete `sysv64` function taking `*mut GuestState`.
//! Its exits are `jmp rel32` instructions aimed at its own epilogue; the
//! block cache links an exit by re-aiming the jump at another block's
//! [`NativeBlock::link_entry`], which skips the prologue.

pub mod asm;
pub mod code_space;
pub mod codebuf;
mod comp;
pub mod emitter;
pub mod helpers;
pub mod registers;

use mjit_ir::{IrBlock, RegClass};
use mjit_state::GuestState;
use tracing::warn;

use self::asm::Assembler;
use self::code_space::CodeSpace;
use self::codebuf::Label;
use crate::backend::IrBackend;
use crate::config::EmitConfig;
use crate::error::EmitError;
use crate::regcache::RegCache;

/// A patchable block exit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitSite {
    /// Guest address the exit leaves for.
    pub target: u32,
    /// Code-space offset of the jump's rel32 field.
    pub patch: usize,
    /// Where the jump points when unlinked.
    pub fallback: usize,
}

/// A block in the code space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeBlock {
    pub offset: usize,
    pub len: usize,
    /// Entry for linked jumps.
    pub link_entry: usize,
    pub epilogue: usize,
    pub exits: Vec<ExitSite>,
    /// Compiled entirely through the interpreter helper.
    pub generic: bool,
}

#[derive(Clone, Copy, Debug)]
struct PendingExit {
    target: u32,
    site: usize,
}

/// IR to x86-64 compiler and the code space its blocks live in.
#[derive(Debug)]
pub struct X64Backend {
    space: CodeSpace,
    asm: Assembler,
    gpr: RegCache,
    fpr: RegCache,
    pointerify: bool,
    generic: bool,
    epilogue: Label,
    link_entry: usize,
    exits: Vec<PendingExit>,
}

impl X64Backend {
    /// Create a backend. Host pointers are only used when guest memory
    /// covers the whole 32-bit space.
    ///
    /// # Errors
    ///
    /// Returns an error if the code space cannot be mapped.
    pub fn new(config: &EmitConfig, guest_full_space: bool) -> Result<Self, EmitError> {
        let pointerify = config.pointerify && guest_full_space;
        let window = config.lookahead_window;
        let gpr = RegCache::new(
            RegClass::Gpr,
            registers::gpr_order(config.gpr_order.as_deref()),
            config.static_regs.clone(),
            window,
        )
        .with_pointerify(pointerify);
        let fpr = RegCache::new(
            RegClass::Fpr,
            registers::fpr_order(config.fpr_order.as_deref()),
            config.static_regs.clone(),
            window,
        );
        let mut asm = Assembler::new();
        let epilogue = asm.new_label();
        Ok(Self {
            space: CodeSpace::new(config.max_code_bytes)?,
            asm,
            gpr,
            fpr,
            pointerify,
            generic: false,
            epilogue,
            link_entry: 0,
            exits: Vec::new(),
        })
    }

    /// Compile `block`. A block the register cache cannot handle is
    /// compiled again with every instruction routed through the helper.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::CodeSpaceFull`] when the code space needs a clear.
    pub fn compile(&mut self, block: &IrBlock) -> Result<NativeBlock, EmitError> {
        self.generic = false;
        let result = match self.compile_block(block) {
            Err(EmitError::RegCache(err)) => {
                warn!(
                    start = format_args!("{:#010x}", block.start),
                    %err,
                    "register allocation failed, compiling block generically"
                );
                self.generic = true;
                self.compile_block(block)
            }
            other => other,
        };
        self.generic = false;
        result
    }

    /// Point `site` at `dest`.
    ///
    /// # Errors
    ///
    /// Fails if either block is outside the code space.
    pub fn link(&mut self, site: &ExitSite, dest: &NativeBlock) -> Result<(), EmitError> {
        self.space.patch_rel32(site.patch, dest.link_entry)
    }

    /// Point `site` back at its own block's epilogue.
    ///
    /// # Errors
    ///
    /// Fails if the site is outside the code space.
    pub fn unlink(&mut self, site: &ExitSite) -> Result<(), EmitError> {
        self.space.patch_rel32(site.patch, site.fallback)
    }

    /// Run `block` (and whatever it is linked to) against `state`.
    ///
    /// # Safety
    ///
    /// `block` must have been compiled since the last [`X64Backend::clear`],
    /// and `state` must be attached to a live `GuestMemory` that does not
    /// move while the block runs.
    pub unsafe fn run(&self, block: &NativeBlock, state: &mut GuestState) {
        unsafe {
            let entry = self.space.entry(block.offset);
            entry(std::ptr::from_mut(state));
        }
    }

    /// Drop every compiled block.
    pub const fn clear(&mut self) {
        self.space.clear();
    }

    /// Machine code of `block`.
    #[must_use]
    pub fn code(&self, block: &NativeBlock) -> &[u8] {
        self.space.bytes(block.offset, block.len)
    }

    #[must_use]
    pub const fn code_used(&self) -> usize {
        self.space.used()
    }

    #[must_use]
    pub const fn code_capacity(&self) -> usize {
        self.space.capacity()
    }
}

#[cfg(test)]
mod tests {
    use mjit_ir::reg::{IRREG_FPCOND, IRREG_HI, IRREG_LO, fpr};
    use mjit_ir::{IrInst, IrOp, IrWriter};
    use mjit_isa::asm as mips;
    use mjit_state::{ExitReason, GuestMemory};

    use super::*;
    use crate::interp::run_block;

    const BASE: u32 = 0x0800_0000;
    const SIZE: usize = 64 * 1024;

    struct Setup {
        config: EmitConfig,
        base: u32,
        size: usize,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                config: EmitConfig::default(),
                base: BASE,
                size: SIZE,
            }
        }
    }

    fn assert_same(interp: &GuestState, native: &GuestState) {
        assert_eq!(interp.regs, native.regs, "registers");
        assert_eq!(interp.pc, native.pc, "pc");
        assert_eq!(interp.downcount, native.downcount, "downcount");
        assert_eq!(interp.exit_reason, native.exit_reason, "exit reason");
        assert_eq!(interp.exit_arg, native.exit_arg, "exit arg");
        assert_eq!(interp.stop, native.stop, "stop");
        assert_eq!(interp.dirty_count, native.dirty_count, "dirty count");
        assert_eq!(interp.dirty_ranges(), native.dirty_ranges(), "dirty ranges");
    }

    /// Run `insts` through the interpreter and natively from identical
    /// starting states and check that they agree. Returns the native state
    /// and whether the block was compiled generically.
    fn check_with(
        setup: &Setup,
        insts: &[IrInst],
        prep: impl Fn(&mut GuestState, &mut GuestMemory),
    ) -> (GuestState, bool) {
        let block = IrBlock::new(setup.base, 4, 1, insts.to_vec());

        let mut imem = GuestMemory::new(setup.base, setup.size).expect("mmap");
        let mut istate = GuestState::new();
        imem.attach(&mut istate);
        istate.pc = setup.base;
        istate.downcount = 100;
        prep(&mut istate, &mut imem);
        run_block(&block.insts, &mut istate, &mut imem);

        let mut nmem = GuestMemory::new(setup.base, setup.size).expect("mmap");
        let mut nstate = GuestState::new();
        nmem.attach(&mut nstate);
        nstate.pc = setup.base;
        nstate.downcount = 100;
        prep(&mut nstate, &mut nmem);
        let mut backend = X64Backend::new(&setup.config, nmem.covers_full_space()).expect("code space");
        let native = backend.compile(&block).expect("compiles");
        assert!(!backend.gpr.has_dirty());
        assert!(!backend.fpr.has_dirty());
        unsafe { backend.run(&native, &mut nstate) };

        assert_same(&istate, &nstate);
        assert_eq!(
            imem.read_bytes(setup.base, 0x2000).expect("in range"),
            nmem.read_bytes(setup.base, 0x2000).expect("in range"),
            "memory"
        );
        // Taking the dirty code also compares the page flags of an overflow.
        let dirty = nstate.dirty_count;
        assert_eq!(
            imem.take_dirty_code(&mut istate),
            nmem.take_dirty_code(&mut nstate),
            "dirty code"
        );
        nstate.dirty_count = dirty;
        (nstate, native.generic)
    }

    fn check(insts: &[IrInst], prep: impl Fn(&mut GuestState, &mut GuestMemory)) -> GuestState {
        check_with(&Setup::default(), insts, prep).0
    }

    #[test]
    fn test_alu_matches_interpreter() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 4);
        w.set_const(5, 7);
        w.write(IrOp::Add, 6, 1, 2);
        w.write(IrOp::Sub, 7, 6, 5);
        w.write(IrOp::Neg, 8, 3, 0);
        w.write(IrOp::Not, 9, 4, 0);
        w.write(IrOp::And, 10, 1, 4);
        w.write(IrOp::Or, 11, 1, 5);
        w.write(IrOp::Xor, 12, 2, 4);
        w.write_const(IrOp::AddConst, 13, 1, 0xFFFF_FFF0);
        w.write_const(IrOp::AndConst, 14, 4, 0xFF00);
        w.write_const(IrOp::OrConst, 15, 3, 0x8000_0001);
        w.write_const(IrOp::XorConst, 16, 16, 0x55);
        w.write(IrOp::Mov, 17, 1, 0);
        w.write(IrOp::Mov, 18, 5, 0);
        w.write(IrOp::Add, 19, 5, 5);
        w.write(IrOp::Add, 0, 1, 2);
        w.write(IrOp::Mov, 20, 0, 0);
        w.write(IrOp::Sub, 1, 1, 1);
        w.exit_to_const(BASE + 0x40);
        let s = check(w.insts(), |s, _| {
            s.set_gpr(1, 100);
            s.set_gpr(2, 0xFFFF_FFFF);
            s.set_gpr(3, 0x8000_0000);
            s.set_gpr(4, 0x1234_5678);
            s.set_gpr(16, 0xAA);
        });
        assert_eq!(s.gpr(6), 99);
        assert_eq!(s.gpr(19), 14);
        assert_eq!(s.gpr(0), 0);
        assert_eq!(s.gpr(20), 0);
        assert_eq!(s.pc, BASE + 0x40);
        assert_eq!(s.downcount, 96);
    }

    #[test]
    fn test_shifts_match_interpreter() {
        let mut w = IrWriter::new();
        w.write(IrOp::Shl, 5, 1, 2);
        w.write(IrOp::Shr, 6, 1, 2);
        w.write(IrOp::Sar, 7, 1, 2);
        w.write(IrOp::Ror, 8, 1, 2);
        w.write(IrOp::ShlImm, 9, 1, 5);
        w.write(IrOp::ShrImm, 10, 1, 31);
        w.write(IrOp::SarImm, 11, 1, 4);
        w.write(IrOp::RorImm, 12, 1, 8);
        w.set_const(3, 36);
        w.write(IrOp::Shl, 13, 1, 3);
        w.write(IrOp::Sar, 1, 1, 1);
        w.exit_to_const(0);
        check(w.insts(), |s, _| {
            s.set_gpr(1, 0x8765_4321);
            s.set_gpr(2, 35);
        });
    }

    #[test]
    fn test_compare_cond_move_and_bits_match_interpreter() {
        let mut w = IrWriter::new();
        w.write(IrOp::Slt, 5, 1, 2);
        w.write(IrOp::SltU, 6, 1, 2);
        w.write_const(IrOp::SltConst, 7, 1, 5);
        w.write_const(IrOp::SltUConst, 8, 1, 5);
        w.write(IrOp::MovZ, 9, 1, 0);
        w.write(IrOp::MovNZ, 10, 2, 0);
        w.write(IrOp::MovZ, 11, 1, 3);
        w.write(IrOp::MovNZ, 12, 2, 3);
        w.write(IrOp::Max, 13, 1, 2);
        w.write(IrOp::Min, 14, 1, 2);
        w.write(IrOp::Clz, 15, 0, 0);
        w.write(IrOp::Clz, 16, 3, 0);
        w.write(IrOp::Ext8to32, 17, 4, 0);
        w.write(IrOp::Ext16to32, 18, 4, 0);
        w.write(IrOp::BSwap16, 19, 4, 0);
        w.write(IrOp::BSwap32, 20, 4, 0);
        w.write(IrOp::BitRev, 21, 4, 0);
        w.write(IrOp::Clz, 22, 4, 0);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, _| {
            s.set_gpr(1, (-3i32) as u32);
            s.set_gpr(2, 9);
            s.set_gpr(3, 0x0001_0000);
            s.set_gpr(4, 0x1234_8680);
            for r in 9..=12 {
                s.set_gpr(r, 0xDEAD);
            }
        });
        assert_eq!(s.gpr(9), (-3i32) as u32);
        assert_eq!(s.gpr(11), 0xDEAD);
        assert_eq!(s.gpr(15), 32);
        assert_eq!(s.gpr(16), 15);
    }

    #[test]
    fn test_mult_matches_interpreter() {
        let mut w = IrWriter::new();
        w.write(IrOp::Mult, 0, 1, 2);
        w.write(IrOp::Madd, 0, 2, 2);
        w.write(IrOp::Msub, 0, 1, 1);
        w.write(IrOp::MaddU, 0, 1, 2);
        w.write(IrOp::Mov, 5, IRREG_LO, 0);
        w.write(IrOp::Mov, 6, IRREG_HI, 0);
        w.write(IrOp::MultU, 0, 1, 2);
        w.write(IrOp::MsubU, 0, 2, 2);
        w.write(IrOp::Add, 7, IRREG_HI, 2);
        w.write(IrOp::Div, 0, 1, 2);
        w.write(IrOp::Mult, 0, IRREG_LO, IRREG_HI);
        w.exit_to_const(0);
        check(w.insts(), |s, _| {
            s.set_gpr(1, (-3i32) as u32);
            s.set_gpr(2, 0x7FFF_0005);
            s.set_hilo(0x1111_2222_3333_4444);
        });
    }

    #[test]
    fn test_memory_matches_interpreter() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Store32, 2, 1, 0);
        w.write_const(IrOp::Store16, 3, 1, 6);
        w.write_const(IrOp::Store8, 3, 1, 9);
        w.write_const(IrOp::Load32, 4, 1, 0);
        w.write_const(IrOp::Load16, 5, 1, 6);
        w.write_const(IrOp::Load16Ext, 6, 1, 6);
        w.write_const(IrOp::Load8, 7, 1, 9);
        w.write_const(IrOp::Load8Ext, 8, 1, 9);
        // Misaligned and out-of-window addresses are masked, not trapped.
        w.write_const(IrOp::Load32, 9, 1, 0x1_0003);
        w.write_const(IrOp::Load32Left, 10, 1, 3);
        w.write_const(IrOp::Store32Right, 2, 1, 0x11);
        w.set_const(11, BASE + 0x100);
        w.write_const(IrOp::Store32, 2, 11, 0);
        w.write_const(IrOp::Load32, 12, 11, 0);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, m| {
            s.set_gpr(1, BASE + 0x20);
            s.set_gpr(2, 0x8899_AABB);
            s.set_gpr(3, 0xCAFE_F00D);
            m.write_u32(BASE + 0x30, 0x0102_0304).expect("in range");
        });
        assert_eq!(s.gpr(4), 0x8899_AABB);
        assert_eq!(s.gpr(6), 0xFFFF_F00D);
        assert_eq!(s.stop, 0);
    }

    #[test]
    fn test_code_writes_recorded_natively() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Store8, 2, 1, 0x10);
        w.write_const(IrOp::Store16, 2, 1, 0x402);
        w.write_const(IrOp::Store32, 2, 1, 0x408);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, m| {
            m.mark_code(BASE + 0x400, 0x10);
            s.set_gpr(1, BASE);
            s.set_gpr(2, 0x1234_5678);
        });
        assert_eq!(s.stop, 1);
        assert_eq!(s.dirty_ranges(), &[[0x402, 0x404], [0x408, 0x40C]]);
    }

    #[test]
    fn test_adjacent_code_writes_merge_natively() {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Store32, 2, 1, 0x404);
        w.write_const(IrOp::Store32, 2, 1, 0x400);
        w.write_const(IrOp::Store8, 2, 1, 0x402);
        w.write_const(IrOp::Store16, 2, 1, 0x408);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, m| {
            m.mark_code(BASE + 0x400, 0x10);
            s.set_gpr(1, BASE);
            s.set_gpr(2, 0x1234_5678);
        });
        assert_eq!(s.dirty_ranges(), &[[0x400, 0x40A]]);
    }

    #[test]
    fn test_code_write_overflow_natively() {
        let mut w = IrWriter::new();
        for i in 0..=mjit_state::DIRTY_RANGE_SLOTS as u32 {
            w.write_const(IrOp::Store32, 2, 1, 0x400 + i * 0x10);
        }
        w.write_const(IrOp::Store8, 2, 1, 0xC01);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, m| {
            m.mark_code(BASE + 0x400, 0x1000);
            s.set_gpr(1, BASE);
            s.set_gpr(2, 0x1234_5678);
        });
        assert_eq!(s.stop, 1);
        assert!(s.dirty_overflowed());
        assert_eq!(s.dirty_ranges().len(), mjit_state::DIRTY_RANGE_SLOTS);
    }

    #[test]
    fn test_fpu_matches_interpreter() {
        let mut w = IrWriter::new();
        w.write(IrOp::FAdd, fpr(2), fpr(0), fpr(1));
        w.write(IrOp::FSub, fpr(3), fpr(0), fpr(1));
        w.write(IrOp::FMul, fpr(4), fpr(2), fpr(1));
        w.write(IrOp::FDiv, fpr(5), fpr(1), fpr(0));
        w.write(IrOp::FSqrt, fpr(6), fpr(1), 0);
        w.write(IrOp::FNeg, fpr(7), fpr(2), 0);
        w.write(IrOp::FAbs, fpr(8), fpr(7), 0);
        w.write(IrOp::FMov, fpr(9), fpr(8), 0);
        w.write(IrOp::FMovFromGpr, fpr(10), 1, 0);
        w.write(IrOp::FMovToGpr, 2, fpr(9), 0);
        w.set_const_f(fpr(11), -0.5);
        w.write(IrOp::FCmp, 4, fpr(0), fpr(1));
        w.write(IrOp::FRound, fpr(12), fpr(1), 0);
        w.write(IrOp::FCvtSW, fpr(13), fpr(10), 0);
        w.write_const(IrOp::StoreFloat, fpr(4), 3, 0);
        w.write_const(IrOp::LoadFloat, fpr(14), 3, 0);
        w.exit_to_const(0);
        let s = check(w.insts(), |s, _| {
            s.set_fpr(0, 1.5);
            s.set_fpr(1, 2.25);
            s.set_gpr(1, 7);
            s.set_gpr(3, BASE + 0x80);
        });
        assert!((s.fpr(2) - 3.75).abs() < f32::EPSILON);
        assert_eq!(s.reg(IRREG_FPCOND), 1);
        assert_eq!(s.fpr_bits(12), 2);
        assert_eq!(s.fpr_bits(14), s.fpr_bits(4));
    }

    #[test]
    fn test_conditional_exits_match_interpreter() {
        let ops = [
            IrOp::ExitToConstIfEq,
            IrOp::ExitToConstIfNeq,
            IrOp::ExitToConstIfGtZ,
            IrOp::ExitToConstIfGeZ,
            IrOp::ExitToConstIfLtZ,
            IrOp::ExitToConstIfLeZ,
        ];
        for op in ops {
            for value in [0u32, 1, (-1i32) as u32] {
                let mut w = IrWriter::new();
                w.set_const(5, 0x55);
                w.write_full(op, 0, 1, 2, BASE + 0x100);
                w.set_const(6, 0x66);
                w.exit_to_const(BASE + 0x200);
                check(w.insts(), |s, _| {
                    s.set_gpr(1, value);
                    s.set_gpr(2, 1);
                });
            }
        }
    }

    #[test]
    fn test_exit_to_reg_and_syscall() {
        let mut w = IrWriter::new();
        w.set_const(5, 9);
        w.write_const(IrOp::SetPcConst, 0, 0, BASE + 4);
        w.write_const(IrOp::Syscall, 0, 0, 0x42);
        let s = check(w.insts(), |_, _| {});
        assert_eq!(s.exit_reason(), ExitReason::Syscall);
        assert_eq!((s.exit_arg, s.pc, s.gpr(5)), (0x42, BASE + 4, 9));

        let mut w = IrWriter::new();
        w.write_const(IrOp::AddConst, 31, 31, 8);
        w.write(IrOp::ExitToReg, 0, 31, 0);
        let s = check(w.insts(), |s, _| s.set_gpr(31, BASE + 0x10));
        assert_eq!(s.pc, BASE + 0x18);

        let mut w = IrWriter::new();
        w.write_const(IrOp::Break, 0, 0, 7);
        let s = check(w.insts(), |_, _| {});
        assert_eq!(s.exit_reason(), ExitReason::Break);
    }

    #[test]
    fn test_helper_fallback_and_fault() {
        let mut w = IrWriter::new();
        w.set_const(4, 3);
        w.write_const(IrOp::SetPcConst, 0, 0, BASE);
        w.write_const(IrOp::Interpret, 0, 0, mips::addiu(5, 4, 9));
        w.write(IrOp::Add, 6, 5, 29);
        w.exit_to_const(BASE + 4);
        let s = check(w.insts(), |s, _| s.set_gpr(29, 0x1000));
        assert_eq!(s.gpr(6), 0x100C);

        let mut w = IrWriter::new();
        w.set_const(7, 1);
        w.write_const(IrOp::SetPcConst, 0, 0, BASE + 8);
        w.write_const(IrOp::Interpret, 0, 0, 0x6000_0000);
        w.set_const(8, 1);
        w.exit_to_const(0);
        let s = check(w.insts(), |_, _| {});
        assert_eq!(s.exit_reason(), ExitReason::Fault);
        assert_eq!((s.gpr(7), s.gpr(8)), (1, 0));
    }

    #[test]
    fn test_exhausted_registers_fall_back_to_helper() {
        let setup = Setup {
            config: EmitConfig::default().with_gpr_order(vec![13]),
            ..Setup::default()
        };
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 2);
        w.write(IrOp::Add, 5, 1, 29);
        w.write_const(IrOp::AddConst, 29, 29, 0xFFFF_FFF0);
        w.write_const(IrOp::Store32, 5, 29, 0);
        w.exit_to_const(BASE + 8);
        let (s, generic) = check_with(&setup, w.insts(), |s, _| {
            s.set_gpr(1, 4);
            s.set_gpr(29, BASE + 0x100);
        });
        assert!(generic);
        assert_eq!(s.gpr(5), BASE + 0x104);
    }

    #[test]
    fn test_pointerified_byte_loads() {
        let setup = Setup {
            config: EmitConfig::default().with_pointerify(true),
            base: 0,
            size: 1 << 32,
        };
        let mut w = IrWriter::new();
        w.write_const(IrOp::Load8, 3, 1, 0);
        w.write_const(IrOp::Load8Ext, 4, 1, 0);
        w.write(IrOp::Add, 5, 1, 3);
        w.write_const(IrOp::Load8, 6, 2, 0);
        w.write(IrOp::Mov, 7, 2, 0);
        w.write_const(IrOp::Load8, 1, 1, 0);
        w.exit_to_const(0);
        let s = check_with(&setup, w.insts(), |s, m| {
            s.set_gpr(1, 0x40);
            s.set_gpr(2, 0x41);
            m.write_u8(0x40, 0x9C).expect("in range");
            m.write_u8(0x41, 0x07).expect("in range");
        })
        .0;
        assert_eq!((s.gpr(3), s.gpr(4), s.gpr(1)), (0x9C, 0xFFFF_FF9C, 0x9C));
    }

    #[test]
    fn test_link_and_unlink() {
        let mut mem = GuestMemory::new(BASE, SIZE).expect("mmap");
        let mut state = GuestState::new();
        mem.attach(&mut state);
        let mut backend = X64Backend::new(&EmitConfig::default(), false).expect("code space");

        let mut a = IrWriter::new();
        a.write_const(IrOp::Downcount, 0, 0, 5);
        a.write_const(IrOp::AddConst, 1, 1, 1);
        a.exit_to_const(BASE + 0x10);
        let a = backend.compile(&IrBlock::new(BASE, 8, 2, a.into_insts())).expect("compiles");

        let mut b = IrWriter::new();
        b.write_const(IrOp::Downcount, 0, 0, 5);
        b.write_const(IrOp::AddConst, 2, 2, 10);
        b.exit_to_const(BASE + 0x100);
        let b = backend.compile(&IrBlock::new(BASE + 0x10, 8, 2, b.into_insts())).expect("compiles");

        assert_eq!(a.exits.len(), 1);
        assert_eq!(a.exits[0].target, BASE + 0x10);
        backend.link(&a.exits[0], &b).expect("in range");

        state.downcount = 100;
        unsafe { backend.run(&a, &mut state) };
        assert_eq!((state.gpr(1), state.gpr(2), state.pc), (1, 10, BASE + 0x100));

        // Out of cycles: the linked block returns before doing anything.
        state.downcount = 3;
        unsafe { backend.run(&a, &mut state) };
        assert_eq!((state.gpr(1), state.gpr(2), state.pc), (2, 10, BASE + 0x10));

        backend.unlink(&a.exits[0]).expect("in range");
        state.downcount = 100;
        unsafe { backend.run(&a, &mut state) };
        assert_eq!((state.gpr(1), state.gpr(2), state.pc), (3, 10, BASE + 0x10));

        assert_eq!(backend.code(&a).len(), a.len);
        backend.clear();
        assert_eq!(backend.code_used(), 0);
    }
}
