//! Guest memory backed by an anonymous mapping.
//!
//! The guest sees a flat window `[base, base + size)`. A guest address maps
//! to memory offset `addr & (size - 1)`, which is what native code computes,
//! so `base` must be a multiple of `size`. Guard pages on each side catch
//! stray host accesses at the OS level.
//!
//! Alongside the bytes, a code-page map holds one byte per 1 KiB page. A
//! nonzero entry means some translated block covers that page, and guest
//! stores there must be reported.

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use thiserror::Error;
use tracing::debug;

use crate::state::GuestState;

/// Guard region size on each side of guest memory.
pub const GUARD_SIZE: usize = 1 << 14;

/// Default guest memory size (32 MiB).
pub const DEFAULT_MEMORY_SIZE: usize = 32 << 20;

/// Default lowest guest address (PSP user memory).
pub const DEFAULT_MEMORY_BASE: u32 = 0x0800_0000;

/// log2 of the code-page granularity.
pub const CODE_PAGE_SHIFT: u32 = 10;

/// Code-page granularity in bytes.
pub const CODE_PAGE_SIZE: u32 = 1 << CODE_PAGE_SHIFT;

/// Code-page map flag: the page holds compiled code.
pub const CODE_PAGE_CODE: u8 = 1;

/// Code-page map flag: a guest store hit the page after the dirty-range
/// list in [`GuestState`] filled up.
pub const CODE_PAGE_DIRTY: u8 = 2;

/// Callback invoked with `(addr, len)` after a notifying write.
type WriteHook = Box<dyn FnMut(u32, u32) + Send>;

/// Memory allocation or access error.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mmap failed: {0}")]
    MmapFailed(#[from] nix::Error),

    #[error("invalid memory size: {0:#x} (must be a power of two of at least 1 KiB)")]
    InvalidSize(usize),

    #[error("base {base:#010x} is not aligned to memory size {size:#x}")]
    UnalignedBase { base: u32, size: usize },

    #[error("address {addr:#010x} (+{len}) is outside guest memory")]
    OutOfRange { addr: u32, len: usize },
}

/// Flat guest memory.
pub struct GuestMemory {
    /// Start of the mapping, including the first guard.
    region: NonNull<c_void>,
    total_size: usize,
    size: usize,
    base: u32,
    mask: u32,
    code_pages: Vec<u8>,
    write_hook: Option<WriteHook>,
}

impl GuestMemory {
    /// Map `size` bytes of guest memory starting at guest address `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or mmap fails.
    pub fn new(base: u32, size: usize) -> Result<Self, MemoryError> {
        if size < CODE_PAGE_SIZE as usize || !size.is_power_of_two() || size > 1 << 32 {
            return Err(MemoryError::InvalidSize(size));
        }
        if u64::from(base) % size as u64 != 0 {
            return Err(MemoryError::UnalignedBase { base, size });
        }

        let total_size = size
            .checked_add(2 * GUARD_SIZE)
            .ok_or(MemoryError::InvalidSize(size))?;
        let total_size_nz = NonZeroUsize::new(total_size).ok_or(MemoryError::InvalidSize(size))?;

        // Whole region starts inaccessible.
        let region = unsafe {
            mmap_anonymous(
                None,
                total_size_nz,
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE,
            )?
        };

        let memory_start = unsafe {
            NonNull::new_unchecked(region.as_ptr().cast::<u8>().add(GUARD_SIZE).cast::<c_void>())
        };
        unsafe {
            mprotect(memory_start, size, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)?;
        }

        debug!(
            base = format_args!("{base:#010x}"),
            size = format_args!("{size:#x}"),
            "guest memory mapped"
        );

        Ok(Self {
            region,
            total_size,
            size,
            base,
            mask: (size - 1) as u32,
            code_pages: vec![0; size >> CODE_PAGE_SHIFT],
            write_hook: None,
        })
    }

    /// Map the default 32 MiB window at `0x08000000`.
    ///
    /// # Errors
    ///
    /// Returns an error if mmap fails.
    pub fn with_default_size() -> Result<Self, MemoryError> {
        Self::new(DEFAULT_MEMORY_BASE, DEFAULT_MEMORY_SIZE)
    }

    /// Host pointer to memory offset 0.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        unsafe { self.region.as_ptr().cast::<u8>().add(GUARD_SIZE) }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Guest address to offset mask.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Whether the mapping covers the whole 32-bit guest space, so that
    /// `membase + addr` is a valid host pointer for every guest address.
    #[must_use]
    pub const fn covers_full_space(&self) -> bool {
        self.mask == u32::MAX
    }

    /// Point `state` at this memory. `state.host` is set to `self`, so the
    /// memory must not move while the state is in use.
    pub fn attach(&mut self, state: &mut GuestState) {
        state.membase = self.as_ptr();
        state.code_pages = self.code_pages.as_mut_ptr();
        state.mem_mask = self.mask;
        state.mem_base = self.base;
        state.host = std::ptr::from_mut(self).cast::<c_void>();
    }

    /// Offset of `addr` if `[addr, addr + len)` lies inside guest memory.
    #[must_use]
    pub fn offset(&self, addr: u32, len: usize) -> Option<usize> {
        let start = u64::from(addr).checked_sub(u64::from(self.base))?;
        let end = start.checked_add(len as u64)?;
        (end <= self.size as u64).then_some(start as usize)
    }

    /// Offset used by guest accesses of `width` bytes: masked and aligned down.
    #[must_use]
    pub const fn access_offset(&self, addr: u32, width: u32) -> usize {
        (addr & self.mask & !(width - 1)) as usize
    }

    /// Whether `addr` may hold guest code.
    #[must_use]
    pub fn is_valid_code_addr(&self, addr: u32) -> bool {
        addr & 3 == 0 && self.offset(addr, 4).is_some()
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.size) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.size) }
    }

    /// Whole guest memory as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes()
    }

    /// Read `len` bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn read_bytes(&self, addr: u32, len: usize) -> Result<&[u8], MemoryError> {
        let off = self.offset(addr, len).ok_or(MemoryError::OutOfRange { addr, len })?;
        Ok(&self.bytes()[off..off + len])
    }

    /// Write bytes at `addr` and notify the write hook.
    ///
    /// Returns whether the write touched a code page.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<bool, MemoryError> {
        let len = data.len();
        let off = self.offset(addr, len).ok_or(MemoryError::OutOfRange { addr, len })?;
        self.bytes_mut()[off..off + len].copy_from_slice(data);
        let touched = self.range_has_code(off, len);
        if let Some(hook) = self.write_hook.as_mut() {
            hook(addr, len as u32);
        }
        Ok(touched)
    }

    /// Install a callback run after every [`GuestMemory::write_bytes`].
    pub fn set_write_hook(&mut self, hook: impl FnMut(u32, u32) + Send + 'static) {
        self.write_hook = Some(Box::new(hook));
    }

    /// Checked byte read.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is outside guest memory.
    pub fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.read_bytes(addr, 1)?[0])
    }

    /// Checked little-endian halfword read.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn read_u16(&self, addr: u32) -> Result<u16, MemoryError> {
        let b = self.read_bytes(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Checked little-endian word read.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        let b = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Checked byte write, with notification.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is outside guest memory.
    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<bool, MemoryError> {
        self.write_bytes(addr, &[value])
    }

    /// Checked halfword write, with notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<bool, MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Checked word write, with notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside guest memory.
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<bool, MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Raw opcode write, no notification. Used for sentinels.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is not a valid code address.
    pub fn write_opcode(&mut self, addr: u32, op: u32) -> Result<(), MemoryError> {
        let off = self
            .offset(addr, 4)
            .filter(|_| addr & 3 == 0)
            .ok_or(MemoryError::OutOfRange { addr, len: 4 })?;
        self.bytes_mut()[off..off + 4].copy_from_slice(&op.to_le_bytes());
        Ok(())
    }

    /// Opcode read; identical to [`GuestMemory::read_u32`] on aligned addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is not a valid code address.
    pub fn read_opcode(&self, addr: u32) -> Result<u32, MemoryError> {
        if addr & 3 != 0 {
            return Err(MemoryError::OutOfRange { addr, len: 4 });
        }
        self.read_u32(addr)
    }

    // Guest data accesses. These mask instead of checking, exactly like
    // native code, so the interpreter and compiled blocks agree on every
    // address.

    #[must_use]
    pub fn load_u8(&self, addr: u32) -> u8 {
        self.bytes()[self.access_offset(addr, 1)]
    }

    #[must_use]
    pub fn load_u16(&self, addr: u32) -> u16 {
        let off = self.access_offset(addr, 2);
        let b = self.bytes();
        u16::from_le_bytes([b[off], b[off + 1]])
    }

    #[must_use]
    pub fn load_u32(&self, addr: u32) -> u32 {
        let off = self.access_offset(addr, 4);
        let b = self.bytes();
        u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    }

    /// Guest byte store. Records a code write in `state` if it hits a code page.
    pub fn store_u8(&mut self, state: &mut GuestState, addr: u32, value: u8) {
        let off = self.access_offset(addr, 1);
        self.bytes_mut()[off] = value;
        self.check_code_write(state, off, 1);
    }

    pub fn store_u16(&mut self, state: &mut GuestState, addr: u32, value: u16) {
        let off = self.access_offset(addr, 2);
        self.bytes_mut()[off..off + 2].copy_from_slice(&value.to_le_bytes());
        self.check_code_write(state, off, 2);
    }

    pub fn store_u32(&mut self, state: &mut GuestState, addr: u32, value: u32) {
        let off = self.access_offset(addr, 4);
        self.bytes_mut()[off..off + 4].copy_from_slice(&value.to_le_bytes());
        self.check_code_write(state, off, 4);
    }

    fn check_code_write(&mut self, state: &mut GuestState, off: usize, width: usize) {
        let page = off >> CODE_PAGE_SHIFT;
        if self.code_pages[page] != 0 && !state.note_code_write(off as u32, (off + width) as u32) {
            self.code_pages[page] |= CODE_PAGE_DIRTY;
        }
    }

    /// Take the code written by guest stores since the last call, as guest
    /// `(addr, len)` ranges.
    ///
    /// Pages flagged [`CODE_PAGE_DIRTY`] after an overflow come back whole,
    /// one range per run of consecutive pages.
    pub fn take_dirty_code(&mut self, state: &mut GuestState) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = state
            .dirty_ranges()
            .iter()
            .map(|&[lo, hi]| (self.base.wrapping_add(lo), hi.wrapping_sub(lo)))
            .collect();
        if state.dirty_overflowed() {
            let mut runs: Vec<(usize, usize)> = Vec::new();
            for (page, flags) in self.code_pages.iter_mut().enumerate() {
                if *flags & CODE_PAGE_DIRTY == 0 {
                    continue;
                }
                *flags &= !CODE_PAGE_DIRTY;
                match runs.last_mut() {
                    Some((_, end)) if *end == page => *end = page + 1,
                    _ => runs.push((page, page + 1)),
                }
            }
            ranges.extend(runs.into_iter().map(|(first, end)| {
                let addr = self.base.wrapping_add((first << CODE_PAGE_SHIFT) as u32);
                let len = u32::try_from((end - first) << CODE_PAGE_SHIFT).unwrap_or(u32::MAX);
                (addr, len)
            }));
        }
        state.dirty_count = 0;
        ranges
    }

    fn range_has_code(&self, off: usize, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        let first = off >> CODE_PAGE_SHIFT;
        let last = (off + len - 1) >> CODE_PAGE_SHIFT;
        self.code_pages[first..=last].iter().any(|&p| p != 0)
    }

    /// Mark the pages covering `[addr, addr + len)` as holding code.
    pub fn mark_code(&mut self, addr: u32, len: u32) {
        if let Some(off) = self.offset(addr, len as usize) {
            if len == 0 {
                return;
            }
            let first = off >> CODE_PAGE_SHIFT;
            let last = (off + len as usize - 1) >> CODE_PAGE_SHIFT;
            for page in &mut self.code_pages[first..=last] {
                *page |= CODE_PAGE_CODE;
            }
        }
    }

    /// Clear the code mark of the page containing `addr`.
    pub fn unmark_code_page(&mut self, addr: u32) {
        if let Some(off) = self.offset(addr, 1) {
            self.code_pages[off >> CODE_PAGE_SHIFT] = 0;
        }
    }

    /// Whether the page containing `addr` is marked as code.
    #[must_use]
    pub fn is_code_page(&self, addr: u32) -> bool {
        self.offset(addr, 1)
            .is_some_and(|off| self.code_pages[off >> CODE_PAGE_SHIFT] != 0)
    }

    /// Clear every code mark.
    pub fn clear_code_pages(&mut self) {
        self.code_pages.fill(0);
    }

    /// Replace the whole contents with `data` (zero-filled past its end).
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is larger than guest memory.
    pub fn load_image(&mut self, data: &[u8]) -> Result<(), MemoryError> {
        if data.len() > self.size {
            return Err(MemoryError::OutOfRange {
                addr: self.base,
                len: data.len(),
            });
        }
        let bytes = self.bytes_mut();
        bytes[..data.len()].copy_from_slice(data);
        bytes[data.len()..].fill(0);
        Ok(())
    }

    /// Zero the entire memory region.
    pub fn clear(&mut self) {
        self.bytes_mut().fill(0);
    }
}

impl Drop for GuestMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.region, self.total_size);
        }
    }
}

impl std::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("base", &format_args!("{:#010x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish_non_exhaustive()
    }
}

// GuestMemory is Send but not Sync (contains raw pointer)
unsafe impl Send for GuestMemory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DIRTY_RANGE_SLOTS;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const BASE: u32 = 0x0800_0000;

    fn mem() -> GuestMemory {
        GuestMemory::new(BASE, 64 * 1024).expect("allocation should succeed")
    }

    #[test]
    fn test_guest_memory_geometry() {
        let m = mem();
        assert_eq!(m.size(), 64 * 1024);
        assert_eq!(m.mask(), 0xFFFF);
        assert!(!m.covers_full_space());
        assert!(m.is_valid_code_addr(BASE));
        assert!(!m.is_valid_code_addr(BASE + 2));
        assert!(!m.is_valid_code_addr(BASE + 0x1_0000));
        assert!(!m.is_valid_code_addr(BASE - 4));
    }

    #[test]
    fn test_guest_memory_invalid_geometry() {
        assert!(matches!(GuestMemory::new(0, 0), Err(MemoryError::InvalidSize(0))));
        assert!(matches!(GuestMemory::new(0, 3000), Err(MemoryError::InvalidSize(_))));
        assert!(matches!(
            GuestMemory::new(0x100, 0x1000),
            Err(MemoryError::UnalignedBase { .. })
        ));
    }

    #[test]
    fn test_guest_memory_read_write() {
        let mut m = mem();
        m.write_u32(BASE + 8, 0xDEAD_BEEF).expect("in range");
        assert_eq!(m.read_u32(BASE + 8).expect("in range"), 0xDEAD_BEEF);
        assert_eq!(m.read_u16(BASE + 8).expect("in range"), 0xBEEF);
        assert_eq!(m.read_u8(BASE + 11).expect("in range"), 0xDE);
        assert!(m.read_u32(BASE + 0xFFFE).is_err());
    }

    #[test]
    fn test_guest_access_masks_and_aligns() {
        let mut m = mem();
        let mut state = GuestState::new();
        m.store_u32(&mut state, BASE + 0x10, 0x1122_3344);
        assert_eq!(m.load_u32(BASE + 0x12), 0x1122_3344);
        // Mirrors wrap at the memory size.
        assert_eq!(m.load_u32(BASE + 0x1_0010), 0x1122_3344);
        assert_eq!(m.load_u8(BASE + 0x13), 0x11);
        assert_eq!(m.load_u16(BASE + 0x13), 0x1122);
    }

    #[test]
    fn test_code_page_store_records_dirty_range() {
        let mut m = mem();
        let mut state = GuestState::new();
        m.attach(&mut state);
        m.mark_code(BASE + 0x400, 8);
        assert!(m.is_code_page(BASE + 0x7FC));
        assert!(!m.is_code_page(BASE + 0x800));

        m.store_u32(&mut state, BASE + 0x900, 1);
        assert_eq!(state.stop, 0);

        m.store_u16(&mut state, BASE + 0x404, 2);
        assert_eq!(state.stop, 1);
        m.store_u8(&mut state, BASE + 0x7F0, 3);
        assert_eq!(m.take_dirty_code(&mut state), vec![(BASE + 0x404, 2), (BASE + 0x7F0, 1)]);
        assert!(m.take_dirty_code(&mut state).is_empty());
    }

    #[test]
    fn test_dirty_code_overflow_falls_back_to_pages() {
        let mut m = mem();
        let mut state = GuestState::new();
        m.attach(&mut state);
        m.mark_code(BASE, 0x1000);
        for i in 0..DIRTY_RANGE_SLOTS as u32 {
            m.store_u32(&mut state, BASE + i * 8, 0);
        }
        assert!(!state.dirty_overflowed());
        m.store_u32(&mut state, BASE + 0x800, 0);
        m.store_u32(&mut state, BASE + 0xC10, 0);
        assert!(state.dirty_overflowed());

        let ranges = m.take_dirty_code(&mut state);
        assert_eq!(ranges.len(), DIRTY_RANGE_SLOTS + 1);
        assert_eq!(ranges[0], (BASE, 4));
        assert_eq!(ranges[DIRTY_RANGE_SLOTS], (BASE + 0x800, 2 * CODE_PAGE_SIZE));
        // The dirty flag is gone but the page is still code.
        assert!(m.is_code_page(BASE + 0x800));
        assert!(m.take_dirty_code(&mut state).is_empty());
    }

    #[test]
    fn test_write_bytes_notifies() {
        let mut m = mem();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        m.set_write_hook(move |addr, len| {
            seen2.store(addr + len, Ordering::SeqCst);
        });
        m.mark_code(BASE, 4);
        assert!(m.write_bytes(BASE, &[0, 0, 0, 0]).expect("in range"));
        assert!(!m.write_bytes(BASE + 0x800, &[1]).expect("in range"));
        assert_eq!(seen.load(Ordering::SeqCst), BASE + 0x801);
    }

    #[test]
    fn test_write_opcode_is_silent() {
        let mut m = mem();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        m.set_write_hook(move |_, _| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        m.write_opcode(BASE + 4, 0x6800_0001).expect("aligned");
        assert_eq!(m.read_opcode(BASE + 4).expect("aligned"), 0x6800_0001);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert!(m.write_opcode(BASE + 2, 0).is_err());
    }

    #[test]
    fn test_attach_sets_state_fields() {
        let mut m = mem();
        let mut state = GuestState::new();
        m.attach(&mut state);
        assert_eq!(state.membase, m.as_ptr());
        assert_eq!(state.mem_mask, 0xFFFF);
        assert_eq!(state.mem_base, BASE);
        assert!(!state.code_pages.is_null());
    }

    #[test]
    fn test_load_image_and_clear() {
        let mut m = mem();
        m.load_image(&[1, 2, 3, 4]).expect("fits");
        assert_eq!(m.read_u32(BASE).expect("in range"), 0x0403_0201);
        m.clear();
        assert_eq!(m.read_u32(BASE).expect("in range"), 0);
    }
}
