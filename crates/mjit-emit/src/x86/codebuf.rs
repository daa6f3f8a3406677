//! Byte buffer for one block's machine code, with rel32 labels.

use crate::error::EmitError;

/// A position in the buffer that jumps can target before it is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    /// Offsets of rel32 fields and the label they point at.
    fixups: Vec<(usize, Label)>,
}

impl CodeBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all code, labels and fixups.
    pub fn clear(&mut self) {
        self.code.clear();
        self.labels.clear();
        self.fixups.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    #[must_use]
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0).copied().flatten()
    }

    /// Emit a rel32 placeholder for `label` and return its offset.
    pub fn emit_rel32(&mut self, label: Label) -> usize {
        let at = self.code.len();
        self.fixups.push((at, label));
        self.emit_u32(0);
        at
    }

    /// Fill in every rel32 placeholder.
    ///
    /// # Errors
    ///
    /// Fails on a label that was never bound.
    pub fn resolve(&mut self) -> Result<(), EmitError> {
        for (at, label) in self.fixups.drain(..) {
            let target = self.labels[label.0].ok_or(EmitError::UnboundLabel(label.0))?;
            let rel = rel32(at + 4, target)?;
            self.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }
}

/// Displacement from the end of a rel32 field at `from` to `to`.
///
/// # Errors
///
/// Fails if the distance does not fit in 32 bits.
pub fn rel32(from: usize, to: usize) -> Result<i32, EmitError> {
    let delta = to as i64 - from as i64;
    i32::try_from(delta).map_err(|_| EmitError::JumpRange)
}
