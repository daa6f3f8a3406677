//! MIPS to IR frontend.
//!
//! [`IrFrontend::compile_block`] decodes guest instructions starting at an
//! address and hands each one to exactly one category handler of
//! [`CompileHandlers`]. Handlers track known-constant registers in an
//! [`IrImmRegCache`] and fold them where possible. Everything the frontend
//! does not translate becomes `SetPcConst pc; Interpret op`, which runs the
//! reference interpreter for that single instruction.

mod alu;
mod branch;
mod fpu;
mod imm;
mod mem;

pub use imm::IrImmRegCache;

use std::ops::BitOr;

use mjit_ir::{IrBlock, IrOp, IrWriter};
use mjit_state::GuestMemory;
use tracing::trace;

use crate::decode::{Category, Instr, decode};
use crate::emuhack::Sentinel;
use crate::error::{CompileError, DecodeError};

/// Resolves guest opcodes for the frontend and the interpreter.
///
/// Implementations must return the original opcode where a sentinel has
/// been written over it.
pub trait InstructionSource {
    /// Original opcode at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if `addr` cannot be fetched or holds a sentinel that does not
    /// resolve to a live block.
    fn fetch(&self, mem: &GuestMemory, addr: u32) -> Result<u32, DecodeError>;
}

/// Reads opcodes straight from guest memory. Sentinels are an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemorySource;

impl InstructionSource for MemorySource {
    fn fetch(&self, mem: &GuestMemory, addr: u32) -> Result<u32, DecodeError> {
        let op = mem.read_opcode(addr).map_err(|_| DecodeError::Fetch(addr))?;
        if Sentinel::is_sentinel(op) {
            return Err(DecodeError::StaleSentinel { addr, op });
        }
        Ok(op)
    }
}

/// Instruction classes that can be forced through the generic path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct JitDisable(u32);

impl JitDisable {
    pub const NONE: Self = Self(0);
    pub const ALU: Self = Self(1 << 0);
    pub const SHIFT: Self = Self(1 << 1);
    pub const MULDIV: Self = Self(1 << 2);
    pub const LSU: Self = Self(1 << 3);
    pub const FPU: Self = Self(1 << 4);
    /// Disables delay-slot reordering and static branch folding. Branches
    /// themselves are always translated.
    pub const BRANCH: Self = Self(1 << 5);
    pub const ALL: Self = Self(0x3F);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Parse one flag name (`alu`, `shift`, `muldiv`, `lsu`, `fpu`, `branch`, `all`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "alu" => Some(Self::ALU),
            "shift" => Some(Self::SHIFT),
            "muldiv" => Some(Self::MULDIV),
            "lsu" => Some(Self::LSU),
            "fpu" => Some(Self::FPU),
            "branch" => Some(Self::BRANCH),
            "all" => Some(Self::ALL),
            _ => None,
        }
    }

    /// Whether `category` must go through the generic handler.
    #[must_use]
    pub const fn forces_generic(self, category: Category) -> bool {
        match category {
            Category::Alu | Category::Special3 => self.contains(Self::ALU),
            Category::Shift => self.contains(Self::SHIFT),
            Category::MulDiv => self.contains(Self::MULDIV),
            Category::LoadStore => self.contains(Self::LSU),
            Category::Fpu => self.contains(Self::FPU),
            _ => false,
        }
    }
}

impl BitOr for JitDisable {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Frontend tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontendConfig {
    /// Guest instructions per block before falling through to the next PC.
    pub max_block_instructions: u32,
    pub disable: JitDisable,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            max_block_instructions: 128,
            disable: JitDisable::NONE,
        }
    }
}

impl FrontendConfig {
    #[must_use]
    pub const fn with_max_block_instructions(mut self, n: u32) -> Self {
        self.max_block_instructions = n;
        self
    }

    #[must_use]
    pub const fn with_disable(mut self, disable: JitDisable) -> Self {
        self.disable = disable;
        self
    }
}

/// One handler per instruction category.
pub trait CompileHandlers {
    fn comp_alu(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_shift(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_branch(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_jump(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_mul_div(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_load_store(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_fpu(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_fpu_branch(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_special3(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_vector(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_syscall(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_break(&mut self, instr: Instr) -> Result<(), CompileError>;
    fn comp_generic(&mut self, instr: Instr) -> Result<(), CompileError>;

    /// Disabled categories for this compilation.
    fn disabled(&self) -> JitDisable;

    /// Route `instr` to its handler.
    ///
    /// # Errors
    ///
    /// Propagates handler errors (delay-slot fetch failures).
    fn dispatch(&mut self, instr: Instr) -> Result<(), CompileError> {
        let category = instr.category();
        if self.disabled().forces_generic(category) {
            return self.comp_generic(instr);
        }
        match category {
            Category::Alu => self.comp_alu(instr),
            Category::Shift => self.comp_shift(instr),
            Category::Branch => self.comp_branch(instr),
            Category::Jump => self.comp_jump(instr),
            Category::MulDiv => self.comp_mul_div(instr),
            Category::LoadStore => self.comp_load_store(instr),
            Category::Fpu => self.comp_fpu(instr),
            Category::FpuBranch => self.comp_fpu_branch(instr),
            Category::Special3 => self.comp_special3(instr),
            Category::Vector => self.comp_vector(instr),
            Category::Syscall => self.comp_syscall(instr),
            Category::Break => self.comp_break(instr),
            Category::Nop => Ok(()),
            Category::Cop0 | Category::Invalid => self.comp_generic(instr),
        }
    }
}

/// Builds IR blocks from guest code.
#[derive(Clone, Debug, Default)]
pub struct IrFrontend {
    config: FrontendConfig,
}

impl IrFrontend {
    #[must_use]
    pub const fn new(config: FrontendConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &FrontendConfig {
        &self.config
    }

    /// Translate the block starting at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if `addr` is not a valid code address or the first opcode
    /// cannot be fetched.
    pub fn compile_block(
        &self,
        source: &dyn InstructionSource,
        mem: &GuestMemory,
        addr: u32,
    ) -> Result<IrBlock, CompileError> {
        if addr & 3 != 0 || !mem.is_valid_code_addr(addr) {
            return Err(CompileError::BadStart(addr));
        }
        let mut builder = BlockBuilder::new(&self.config, source, mem, addr);
        builder.run()?;
        let block = builder.finish();
        trace!(
            addr = format_args!("{addr:#010x}"),
            guest = block.guest_instrs,
            ir = block.insts.len(),
            "lifted block"
        );
        Ok(block)
    }
}

/// Per-block compilation state.
struct BlockBuilder<'a> {
    config: &'a FrontendConfig,
    source: &'a dyn InstructionSource,
    mem: &'a GuestMemory,
    ir: IrWriter,
    imm: IrImmRegCache,
    start: u32,
    /// Address of the instruction being compiled.
    pc: u32,
    /// One past the last guest byte consumed.
    end: u32,
    instrs: u32,
    done: bool,
}

impl<'a> BlockBuilder<'a> {
    fn new(config: &'a FrontendConfig, source: &'a dyn InstructionSource, mem: &'a GuestMemory, start: u32) -> Self {
        Self {
            config,
            source,
            mem,
            ir: IrWriter::new(),
            imm: IrImmRegCache::new(),
            start,
            pc: start,
            end: start,
            instrs: 0,
            done: false,
        }
    }

    fn run(&mut self) -> Result<(), CompileError> {
        // Patched with the final instruction count.
        self.ir.write_const(IrOp::Downcount, 0, 0, 0);
        loop {
            if self.instrs >= self.config.max_block_instructions {
                self.exit_to(self.pc);
                return Ok(());
            }
            let raw = match self.source.fetch(self.mem, self.pc) {
                Ok(raw) => raw,
                Err(e) if self.instrs == 0 => return Err(e.into()),
                Err(_) => {
                    // Let the dispatcher fault on the next PC.
                    self.exit_to(self.pc);
                    return Ok(());
                }
            };
            self.consume(self.pc);
            self.dispatch(decode(raw))?;
            if self.done {
                return Ok(());
            }
            self.pc = self.pc.wrapping_add(4);
        }
    }

    fn finish(mut self) -> IrBlock {
        let instrs = self.instrs;
        if let Some(dc) = self.ir.get_mut(0) {
            dc.constant = instrs;
        }
        IrBlock::new(
            self.start,
            self.end.wrapping_sub(self.start),
            instrs,
            self.ir.into_insts(),
        )
    }

    fn consume(&mut self, addr: u32) {
        self.instrs += 1;
        self.end = addr.wrapping_add(4);
    }

    /// Flush every known constant and leave the block for `target`.
    fn exit_to(&mut self, target: u32) {
        self.imm.flush_all(&mut self.ir);
        self.ir.exit_to_const(target);
        self.done = true;
    }

    fn fetch(&self, addr: u32) -> Result<u32, CompileError> {
        Ok(self.source.fetch(self.mem, addr)?)
    }

    const fn branch_opts_disabled(&self) -> bool {
        self.config.disable.contains(JitDisable::BRANCH)
    }
}

impl CompileHandlers for BlockBuilder<'_> {
    fn comp_alu(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.alu(instr);
        Ok(())
    }

    fn comp_shift(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.shift(instr);
        Ok(())
    }

    fn comp_branch(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.branch(instr)
    }

    fn comp_jump(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.jump(instr)
    }

    fn comp_mul_div(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.mul_div(instr);
        Ok(())
    }

    fn comp_load_store(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.load_store(instr);
        Ok(())
    }

    fn comp_fpu(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.fpu(instr);
        Ok(())
    }

    fn comp_fpu_branch(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.branch(instr)
    }

    fn comp_special3(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.special3(instr);
        Ok(())
    }

    fn comp_vector(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.comp_generic(instr)
    }

    fn comp_syscall(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.syscall(instr);
        Ok(())
    }

    fn comp_break(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.syscall(instr);
        Ok(())
    }

    fn comp_generic(&mut self, instr: Instr) -> Result<(), CompileError> {
        self.imm.flush_all(&mut self.ir);
        self.ir.write_const(IrOp::SetPcConst, 0, 0, self.pc);
        self.ir.write_const(IrOp::Interpret, 0, 0, instr.raw);
        Ok(())
    }

    fn disabled(&self) -> JitDisable {
        self.config.disable
    }
}
