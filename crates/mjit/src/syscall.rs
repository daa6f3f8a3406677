//! Syscall dispatch between blocks.

use mjit_state::{GuestMemory, GuestState};

/// What the run loop does after a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallAction {
    Continue,
    /// Return [`crate::RunExit::Stopped`] with PC at the return address.
    Stop,
}

/// What a handler may touch while the guest is paused.
///
/// Host writes through [`GuestMemory::write_bytes`] are picked up by the
/// memory write hook; [`SyscallContext::invalidate_icache`] covers code
/// patched with unnotified writes. Both take effect before the next block.
pub struct SyscallContext<'a> {
    pub state: &'a mut GuestState,
    pub mem: &'a mut GuestMemory,
    invalidations: &'a mut Vec<(u32, u32)>,
}

impl<'a> SyscallContext<'a> {
    pub(crate) const fn new(
        state: &'a mut GuestState,
        mem: &'a mut GuestMemory,
        invalidations: &'a mut Vec<(u32, u32)>,
    ) -> Self {
        Self {
            state,
            mem,
            invalidations,
        }
    }

    /// Queue invalidation of translated code in `[addr, addr + len)`.
    pub fn invalidate_icache(&mut self, addr: u32, len: u32) {
        self.invalidations.push((addr, len));
    }

    /// Argument register `$a0 + n`.
    #[must_use]
    pub const fn arg(&self, n: usize) -> u32 {
        self.state.gpr(4 + n)
    }

    /// Set `$v0`.
    pub const fn set_return(&mut self, value: u32) {
        self.state.set_gpr(2, value);
    }
}

/// Host side of guest syscalls.
pub trait SyscallHandler {
    /// Handle syscall `code`. PC already points past the `syscall`.
    fn syscall(&mut self, ctx: &mut SyscallContext<'_>, code: u32) -> SyscallAction;
}

impl<F> SyscallHandler for F
where
    F: FnMut(&mut SyscallContext<'_>, u32) -> SyscallAction,
{
    fn syscall(&mut self, ctx: &mut SyscallContext<'_>, code: u32) -> SyscallAction {
        self(ctx, code)
    }
}
