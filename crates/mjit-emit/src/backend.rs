//! Backend trait and the IR interpreter backend.

use mjit_ir::{IrBlock, IrCategory, IrInst};

use crate::error::EmitError;

/// A code generator for IR blocks.
///
/// Each IR category has its own handler. [`IrBackend::compile_block`]
/// walks a block and routes every instruction to one of them; backends
/// only override the driver when they need to.
pub trait IrBackend {
    /// What a compiled block turns into.
    type Target;

    /// Prepare for a new block.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start emitting.
    fn begin_block(&mut self, block: &IrBlock) -> Result<(), EmitError>;

    /// Index of the instruction about to be compiled.
    fn set_ir_index(&mut self, _index: usize) {}

    /// When true, every instruction except exits and system ops goes
    /// through [`IrBackend::comp_generic`].
    fn generic_only(&self) -> bool {
        false
    }

    /// `SetConst`, `SetConstF`.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_const(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// `Mov`, `Add`, `Sub`, `Neg`, `AddConst`.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_arith(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Bitwise ops and the bit-manipulation ops.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_logic(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_shift(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_compare(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// `MovZ`, `MovNZ`, `Max`, `Min`.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_cond_move(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Multiply and divide, writing LO/HI.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_mult(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_load(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_store(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Float arithmetic, conversion, compare and moves.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_fpu(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Block exits, syscalls and breaks.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_exit(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// `Downcount`, `SetPc`, `SetPcConst`, `UpdateRoundingMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_system(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Anything without a dedicated translation.
    ///
    /// # Errors
    ///
    /// Returns an error if code for the instruction cannot be emitted.
    fn comp_generic(&mut self, inst: &IrInst) -> Result<(), EmitError>;

    /// Finish the block and produce its target.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be finalized.
    fn end_block(&mut self, block: &IrBlock) -> Result<Self::Target, EmitError>;

    /// Compile a whole block.
    ///
    /// # Errors
    ///
    /// Returns the first handler error.
    fn compile_block(&mut self, block: &IrBlock) -> Result<Self::Target, EmitError> {
        self.begin_block(block)?;
        for (index, inst) in block.insts.iter().enumerate() {
            self.set_ir_index(index);
            let category = inst.op.category();
            if self.generic_only() && !matches!(category, IrCategory::Exit | IrCategory::System | IrCategory::Nop) {
                self.comp_generic(inst)?;
                continue;
            }
            match category {
                IrCategory::Nop => {}
                IrCategory::Const => self.comp_const(inst)?,
                IrCategory::Arith => self.comp_arith(inst)?,
                IrCategory::Logic | IrCategory::Bits => self.comp_logic(inst)?,
                IrCategory::Shift => self.comp_shift(inst)?,
                IrCategory::Compare => self.comp_compare(inst)?,
                IrCategory::CondMove => self.comp_cond_move(inst)?,
                IrCategory::Mult | IrCategory::Div => self.comp_mult(inst)?,
                IrCategory::Load => self.comp_load(inst)?,
                IrCategory::Store => self.comp_store(inst)?,
                IrCategory::FArith | IrCategory::FConvert | IrCategory::FCompare | IrCategory::FMove => {
                    self.comp_fpu(inst)?;
                }
                IrCategory::System => self.comp_system(inst)?,
                IrCategory::Exit => self.comp_exit(inst)?,
                IrCategory::Interpret => self.comp_generic(inst)?,
            }
        }
        self.end_block(block)
    }
}

/// Backend whose target is the IR itself, run by [`crate::interp::run_block`].
#[derive(Debug, Default)]
pub struct InterpreterBackend {
    insts: Vec<IrInst>,
}

impl InterpreterBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unnecessary_wraps)]
    fn keep(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.insts.push(*inst);
        Ok(())
    }
}

impl IrBackend for InterpreterBackend {
    type Target = Vec<IrInst>;

    fn begin_block(&mut self, block: &IrBlock) -> Result<(), EmitError> {
        self.insts.clear();
        self.insts.reserve(block.len());
        Ok(())
    }

    fn comp_const(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_arith(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_logic(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_shift(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_compare(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_cond_move(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_mult(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_load(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_store(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_fpu(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_exit(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_system(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn comp_generic(&mut self, inst: &IrInst) -> Result<(), EmitError> {
        self.keep(inst)
    }

    fn end_block(&mut self, _block: &IrBlock) -> Result<Self::Target, EmitError> {
        Ok(std::mem::take(&mut self.insts))
    }
}
