//! Compiled block targets and the backend that produces them.

use mjit_cache::{BlockLinker, BlockShape, CacheError};
use mjit_emit::{BackendKind, EmitConfig, EmitError, InterpreterBackend, IrBackend};
use mjit_ir::{IrBlock, IrInst};
use tracing::debug;

#[cfg(all(target_arch = "x86_64", unix))]
use mjit_emit::{NativeBlock, X64Backend};

use crate::metrics;

/// What the block cache stores for each block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledCode {
    /// IR run by the interpreter.
    Ir(Vec<IrInst>),
    /// Machine code in the backend's code space. The IR is kept for
    /// disassembly.
    #[cfg(all(target_arch = "x86_64", unix))]
    Native { block: NativeBlock, ir: Vec<IrInst> },
}

impl CompiledCode {
    /// The IR behind this block.
    #[must_use]
    pub fn ir(&self) -> &[IrInst] {
        match self {
            Self::Ir(insts) => insts,
            #[cfg(all(target_arch = "x86_64", unix))]
            Self::Native { ir, .. } => ir,
        }
    }

    #[must_use]
    pub const fn is_native(&self) -> bool {
        !matches!(self, Self::Ir(_))
    }

    /// One line per generated instruction.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.ir().len() + 1);
        #[cfg(all(target_arch = "x86_64", unix))]
        if let Self::Native { block, .. } = self {
            lines.push(format!(
                "native: {} bytes at +{:#x}{}",
                block.len,
                block.offset,
                if block.generic { " (generic)" } else { "" }
            ));
        }
        lines.extend(self.ir().iter().map(ToString::to_string));
        lines
    }
}

enum Backend {
    Interpreter(InterpreterBackend),
    #[cfg(all(target_arch = "x86_64", unix))]
    X64(Box<X64Backend>),
}

/// The configured backend, plus exit patching for the block cache.
pub struct Engine {
    backend: Backend,
    /// Cleared while breakpoints are set so every block returns to the
    /// dispatcher.
    linking: bool,
}

impl Engine {
    /// Build the backend `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::HostUnsupported`] if `kind` cannot run here, or
    /// an error if the code space cannot be mapped.
    pub fn new(kind: BackendKind, config: &EmitConfig, guest_full_space: bool) -> Result<Self, EmitError> {
        if !kind.is_supported() {
            return Err(EmitError::HostUnsupported);
        }
        let backend = match kind {
            BackendKind::Interpreter => Backend::Interpreter(InterpreterBackend::new()),
            #[cfg(all(target_arch = "x86_64", unix))]
            BackendKind::X64 => Backend::X64(Box::new(X64Backend::new(config, guest_full_space)?)),
            #[cfg(not(all(target_arch = "x86_64", unix)))]
            BackendKind::X64 => {
                let _ = (config, guest_full_space);
                return Err(EmitError::HostUnsupported);
            }
        };
        Ok(Self { backend, linking: true })
    }

    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Interpreter(_) => BackendKind::Interpreter,
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(_) => BackendKind::X64,
        }
    }

    pub(crate) const fn set_linking(&mut self, enabled: bool) {
        self.linking = enabled;
    }

    /// Compile `block`, returning the target and what the cache records
    /// about it.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::CodeSpaceFull`] when the code space needs a clear.
    pub fn compile(&mut self, block: &IrBlock) -> Result<(CompiledCode, BlockShape), EmitError> {
        match &mut self.backend {
            Backend::Interpreter(backend) => {
                let insts = backend.compile_block(block)?;
                let shape = BlockShape {
                    size: block.guest_bytes,
                    instrs: block.guest_instrs,
                    exits: block.const_exits().map(|(_, target)| target).collect(),
                    code_bytes: insts.len() * std::mem::size_of::<IrInst>(),
                };
                Ok((CompiledCode::Ir(insts), shape))
            }
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(backend) => {
                let native = backend.compile(block)?;
                if native.generic {
                    metrics::record_generic_fallback();
                }
                let shape = BlockShape {
                    size: block.guest_bytes,
                    instrs: block.guest_instrs,
                    exits: native.exits.iter().map(|site| site.target).collect(),
                    code_bytes: native.len,
                };
                Ok((
                    CompiledCode::Native {
                        block: native,
                        ir: block.insts.clone(),
                    },
                    shape,
                ))
            }
        }
    }

    /// Drop all generated code.
    pub fn clear(&mut self) {
        match &mut self.backend {
            Backend::Interpreter(_) => {}
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(backend) => {
                debug!(used = backend.code_used(), "clearing code space");
                backend.clear();
            }
        }
    }

    /// Bytes of executable code in use.
    #[must_use]
    pub fn code_used(&self) -> usize {
        match &self.backend {
            Backend::Interpreter(_) => 0,
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(backend) => backend.code_used(),
        }
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    pub(crate) fn native(&self) -> Option<&X64Backend> {
        match &self.backend {
            Backend::X64(backend) => Some(backend),
            Backend::Interpreter(_) => None,
        }
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
fn native_exit(code: &CompiledCode, exit: usize) -> Result<&mjit_emit::ExitSite, CacheError> {
    match code {
        CompiledCode::Native { block, .. } => block
            .exits
            .get(exit)
            .ok_or_else(|| CacheError::Link(format!("exit {exit} out of range").into())),
        CompiledCode::Ir(_) => Err(CacheError::Link("IR block has no patchable exits".into())),
    }
}

impl BlockLinker<CompiledCode> for Engine {
    fn can_link(&self) -> bool {
        self.linking && matches!(self.kind(), BackendKind::X64)
    }

    fn link_exit(&mut self, source: &CompiledCode, exit: usize, dest: &CompiledCode) -> Result<(), CacheError> {
        match &mut self.backend {
            Backend::Interpreter(_) => {
                let _ = (source, exit, dest);
                Ok(())
            }
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(backend) => {
                let site = native_exit(source, exit)?;
                let CompiledCode::Native { block: dest, .. } = dest else {
                    return Err(CacheError::Link("cannot link to an IR block".into()));
                };
                backend.link(site, dest).map_err(|e| CacheError::Link(Box::new(e)))
            }
        }
    }

    fn unlink_exit(&mut self, source: &CompiledCode, exit: usize) -> Result<(), CacheError> {
        match &mut self.backend {
            Backend::Interpreter(_) => {
                let _ = (source, exit);
                Ok(())
            }
            #[cfg(all(target_arch = "x86_64", unix))]
            Backend::X64(backend) => {
                let site = native_exit(source, exit)?;
                backend.unlink(site).map_err(|e| CacheError::Link(Box::new(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mjit_ir::{IrOp, IrWriter};

    use super::*;

    fn block() -> IrBlock {
        let mut w = IrWriter::new();
        w.write_const(IrOp::Downcount, 0, 0, 2);
        w.set_const(1, 5);
        w.write(IrOp::Nop, 0, 0, 0);
        w.exit_to_const(0x0800_0010);
        IrBlock::new(0x0800_0000, 8, 2, w.into_insts())
    }

    #[test]
    fn test_interpreter_shape() {
        let mut engine = Engine::new(BackendKind::Interpreter, &EmitConfig::default(), false).expect("interp");
        let (code, shape) = engine.compile(&block()).expect("compiles");
        assert!(!code.is_native());
        assert_eq!(shape.size, 8);
        assert_eq!(shape.instrs, 2);
        assert_eq!(shape.exits, vec![0x0800_0010]);
        assert_eq!(shape.code_bytes, code.ir().len() * std::mem::size_of::<IrInst>());
        assert!(!engine.can_link());
        assert_eq!(engine.code_used(), 0);
    }

    #[test]
    fn test_describe_lists_ir() {
        let code = CompiledCode::Ir(block().insts);
        let lines = code.describe();
        assert_eq!(lines.len(), code.ir().len());
        assert!(lines.iter().all(|l| !l.is_empty()));
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn test_native_shape_and_linking() {
        let mut engine = Engine::new(BackendKind::X64, &EmitConfig::default().with_max_code_bytes(1 << 20), false)
            .expect("code space");
        let (code, shape) = engine.compile(&block()).expect("compiles");
        assert!(code.is_native());
        assert_eq!(shape.exits, vec![0x0800_0010]);
        assert!(shape.code_bytes > 0);
        assert!(engine.can_link());
        engine.link_exit(&code, 0, &code).expect("self link");
        engine.unlink_exit(&code, 0).expect("unlink");
        assert!(engine.unlink_exit(&code, 3).is_err());
        engine.set_linking(false);
        assert!(!engine.can_link());
        engine.clear();
        assert_eq!(engine.code_used(), 0);
    }
}
