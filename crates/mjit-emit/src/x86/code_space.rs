//! Executable memory for compiled blocks.
//!
//! One anonymous mapping, filled front to back. The mapping is never
//! writable and executable at the same time: commits and patches flip it
//! to read-write, copy, and flip it back to read-execute.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use mjit_state::GuestState;
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use tracing::debug;

use crate::error::EmitError;

const PAGE_SIZE: usize = 4096;
/// Blocks start on this boundary.
const BLOCK_ALIGN: usize = 16;

/// Native block entry point.
pub type BlockFn = unsafe extern "sysv64" fn(*mut GuestState);

pub struct CodeSpace {
    region: NonNull<c_void>,
    size: usize,
    used: usize,
}

impl CodeSpace {
    /// Map `size` bytes (rounded up to whole pages).
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping fails.
    pub fn new(size: usize) -> Result<Self, EmitError> {
        let size = size.max(PAGE_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let len = NonZeroUsize::new(size).ok_or(EmitError::CodeSpaceFull { needed: size, free: 0 })?;
        let region = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE,
            )?
        };
        debug!(size = format_args!("{size:#x}"), "code space mapped");
        Ok(Self { region, size, used: 0 })
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn free(&self) -> usize {
        self.size - self.used
    }

    /// Forget every block. Old entry points must not be called afterwards.
    pub const fn clear(&mut self) {
        self.used = 0;
    }

    fn protect(&self, prot: ProtFlags) -> Result<(), EmitError> {
        unsafe { mprotect(self.region, self.size, prot)? };
        Ok(())
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), EmitError> {
        self.protect(ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)?;
        unsafe {
            let dst = self.region.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        self.protect(ProtFlags::PROT_READ | ProtFlags::PROT_EXEC)
    }

    /// Copy `code` in and return its offset.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::CodeSpaceFull`] if it does not fit.
    pub fn commit(&mut self, code: &[u8]) -> Result<usize, EmitError> {
        let offset = self.used.next_multiple_of(BLOCK_ALIGN);
        if offset + code.len() > self.size {
            return Err(EmitError::CodeSpaceFull {
                needed: code.len(),
                free: self.size.saturating_sub(offset),
            });
        }
        self.write_at(offset, code)?;
        self.used = offset + code.len();
        Ok(offset)
    }

    /// Point the rel32 field at `site` to `dest`.
    ///
    /// # Errors
    ///
    /// Fails if either offset is outside the used area.
    pub fn patch_rel32(&mut self, site: usize, dest: usize) -> Result<(), EmitError> {
        if site + 4 > self.used || dest >= self.used {
            return Err(EmitError::JumpRange);
        }
        let rel = super::codebuf::rel32(site + 4, dest)?;
        self.write_at(site, &rel.to_le_bytes())
    }

    /// Code bytes at `[offset, offset + len)`.
    #[must_use]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        let end = (offset + len).min(self.used);
        let start = offset.min(end);
        unsafe { std::slice::from_raw_parts(self.region.as_ptr().cast::<u8>().add(start), end - start) }
    }

    /// Entry point of the code at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be the start of a block committed since the last
    /// [`CodeSpace::clear`].
    #[must_use]
    pub unsafe fn entry(&self, offset: usize) -> BlockFn {
        unsafe {
            let ptr = self.region.as_ptr().cast::<u8>().add(offset);
            std::mem::transmute::<*mut u8, BlockFn>(ptr)
        }
    }
}

impl Drop for CodeSpace {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.region, self.size);
        }
    }
}

impl std::fmt::Debug for CodeSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSpace")
            .field("size", &self.size)
            .field("used", &self.used)
            .finish_non_exhaustive()
    }
}

unsafe impl Send for CodeSpace {}
