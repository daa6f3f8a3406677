//! Backend configuration.

use mjit_ir::IrReg;
use mjit_ir::reg::IRREG_SP;

/// Default register-cache lookahead, in IR instructions.
pub const DEFAULT_LOOKAHEAD_WINDOW: usize = 30;

/// Default executable code space (64 MiB).
pub const DEFAULT_MAX_CODE_BYTES: usize = 64 << 20;

/// Which backend runs translated blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Interpret the IR.
    Interpreter,
    /// Emit x86-64 machine code.
    #[default]
    X64,
}

impl BackendKind {
    /// Parse a backend name (`interp`, `ir`, `x64`, `x86_64`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "interp" | "interpreter" | "ir" => Some(Self::Interpreter),
            "x64" | "x86_64" | "x86-64" | "native" => Some(Self::X64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interpreter => "interp",
            Self::X64 => "x64",
        }
    }

    /// Whether this backend can run on the current host.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        match self {
            Self::Interpreter => true,
            Self::X64 => cfg!(all(target_arch = "x86_64", unix)),
        }
    }
}

/// Code generation configuration.
#[derive(Clone, Debug)]
pub struct EmitConfig {
    /// IR instructions the register cache looks ahead when picking a victim.
    pub lookahead_window: usize,
    /// Guest registers kept in host registers for the whole block.
    pub static_regs: Vec<IrReg>,
    /// Allow `membase + value` host pointers (needs 4 GiB guest memory).
    pub pointerify: bool,
    /// Size of the executable code space.
    pub max_code_bytes: usize,
    /// Host GPR allocation order override (x86 register numbers).
    pub gpr_order: Option<Vec<u8>>,
    /// Host XMM allocation order override.
    pub fpr_order: Option<Vec<u8>>,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            lookahead_window: DEFAULT_LOOKAHEAD_WINDOW,
            static_regs: vec![IRREG_SP],
            pointerify: false,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            gpr_order: None,
            fpr_order: None,
        }
    }
}

impl EmitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_lookahead_window(mut self, window: usize) -> Self {
        self.lookahead_window = window;
        self
    }

    #[must_use]
    pub fn with_static_regs(mut self, regs: Vec<IrReg>) -> Self {
        self.static_regs = regs;
        self
    }

    #[must_use]
    pub const fn with_pointerify(mut self, enabled: bool) -> Self {
        self.pointerify = enabled;
        self
    }

    #[must_use]
    pub const fn with_max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_gpr_order(mut self, order: Vec<u8>) -> Self {
        self.gpr_order = Some(order);
        self
    }

    #[must_use]
    pub fn with_fpr_order(mut self, order: Vec<u8>) -> Self {
        self.fpr_order = Some(order);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmitConfig::default();
        assert_eq!(config.lookahead_window, 30);
        assert_eq!(config.static_regs, vec![IRREG_SP]);
        assert!(!config.pointerify);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::from_name("IR"), Some(BackendKind::Interpreter));
        assert_eq!(BackendKind::from_name("x86_64"), Some(BackendKind::X64));
        assert_eq!(BackendKind::from_name("arm"), None);
        assert_eq!(BackendKind::Interpreter.name(), "interp");
        assert!(BackendKind::Interpreter.is_supported());
    }
}
