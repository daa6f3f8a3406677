//! Save and restore guest state.
//!
//! Layout: an uncompressed header (magic, version, memory base and size)
//! followed by a zstd stream holding PC, downcount, flags, the register
//! file and guest memory. Memory is written with original opcodes in place
//! of block sentinels, so a state can be loaded by any backend.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use mjit_ir::reg::IR_REG_COUNT;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jit::Jit;

const MAGIC: &[u8; 4] = b"MJIT";
const VERSION: u32 = 1;
const CHUNK: usize = 64 * 1024;

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

impl Jit {
    /// Save guest state to a file.
    ///
    /// # Errors
    ///
    /// Fails on IO errors.
    pub fn save_state(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load guest state from a file. The block cache is cleared.
    ///
    /// # Errors
    ///
    /// Fails on IO errors or if the file does not match this memory layout.
    pub fn load_state(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load_from(&mut reader)
    }

    /// Write guest state to `writer`.
    ///
    /// # Errors
    ///
    /// Fails on IO errors.
    pub fn save_to(&mut self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&self.mem.base().to_le_bytes())?;
        writer.write_all(&(self.mem.size() as u64).to_le_bytes())?;

        let saved = self.cache.save_and_clear_sentinels(&mut self.mem);
        let written = self.write_body(writer);
        self.cache.restore_sentinels(&mut self.mem, &saved)?;
        written?;
        debug!(size = self.mem.size(), pc = format_args!("{:#010x}", self.state.pc), "state saved");
        Ok(())
    }

    fn write_body(&self, writer: &mut impl Write) -> Result<()> {
        let mut encoder = zstd::stream::Encoder::new(writer, 3)?;
        let state = &self.state;
        encoder.write_all(&state.pc.to_le_bytes())?;
        encoder.write_all(&state.downcount.to_le_bytes())?;
        encoder.write_all(&[state.interrupt_pending, state.in_delay_slot])?;
        for reg in &state.regs {
            encoder.write_all(&reg.to_le_bytes())?;
        }
        for chunk in self.mem.as_slice().chunks(CHUNK) {
            encoder.write_all(chunk)?;
        }
        encoder.finish()?;
        Ok(())
    }

    /// Read guest state from `reader`. The block cache is cleared and
    /// rebuilt as code runs.
    ///
    /// # Errors
    ///
    /// Fails on IO errors or if the header does not match this memory layout.
    pub fn load_from(&mut self, reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::State("invalid state file magic".to_string()));
        }
        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(Error::State(format!("unsupported state version {version}")));
        }
        let base = read_u32(reader)?;
        let mut size = [0u8; 8];
        reader.read_exact(&mut size)?;
        let size = u64::from_le_bytes(size);
        if base != self.mem.base() || size != self.mem.size() as u64 {
            return Err(Error::State(format!(
                "memory mismatch: file has {size:#x} bytes at {base:#010x}, jit has {:#x} at {:#010x}",
                self.mem.size(),
                self.mem.base()
            )));
        }

        let mut decoder = zstd::stream::Decoder::new(reader)?;
        let pc = read_u32(&mut decoder)?;
        let downcount = read_u32(&mut decoder)?;
        let interrupt_pending = read_u8(&mut decoder)?;
        let in_delay_slot = read_u8(&mut decoder)?;
        let mut regs = [0u32; IR_REG_COUNT];
        for reg in &mut regs {
            *reg = read_u32(&mut decoder)?;
        }
        let mut image = vec![0u8; self.mem.size()];
        decoder.read_exact(&mut image)?;

        self.clear_all()?;
        self.mem.load_image(&image)?;
        self.pending.lock().clear();
        let state = &mut self.state;
        state.reset();
        state.regs = regs;
        state.pc = pc;
        state.downcount = i32::from_le_bytes(downcount.to_le_bytes());
        state.interrupt_pending = interrupt_pending;
        state.in_delay_slot = in_delay_slot;
        debug!(pc = format_args!("{pc:#010x}"), "state loaded");
        Ok(())
    }
}
