//! Functions native blocks call back into.

use mjit_ir::IrInst;
use mjit_state::{ExitReason, GuestMemory, GuestState};

use crate::interp::{BlockExit, Step, exec_inst};

/// Run one IR instruction through the interpreter.
///
/// `packed` is [`IrInst::pack`]. Returns nonzero when the block must stop,
/// with the reason already recorded in `state`.
///
/// # Safety
///
/// `state` must point to a live `GuestState` whose `host` field points to
/// the `GuestMemory` it is attached to.
pub unsafe extern "sysv64" fn exec_ir(state: *mut GuestState, packed: u32, constant: u32) -> u32 {
    let state = unsafe { &mut *state };
    let mem = unsafe { &mut *state.host.cast::<GuestMemory>() };
    let Some(inst) = IrInst::unpack(packed, constant) else {
        state.exit_reason = ExitReason::Fault as u32;
        state.exit_arg = constant;
        return 1;
    };
    match exec_inst(&inst, state, mem) {
        Step::Next => 0,
        Step::Exit(exit) => {
            let (reason, arg) = match exit {
                BlockExit::Jump => (ExitReason::None, 0),
                BlockExit::Syscall(code) => (ExitReason::Syscall, code),
                BlockExit::Break(code) => (ExitReason::Break, code),
                BlockExit::Fault(_) => (ExitReason::Fault, constant),
            };
            state.exit_reason = reason as u32;
            state.exit_arg = arg;
            1
        }
    }
}

/// Address of [`exec_ir`] for `mov rax, imm64; call rax`.
#[must_use]
pub fn exec_ir_addr() -> u64 {
    exec_ir as *const () as u64
}

#[cfg(test)]
mod tests {
    use mjit_ir::IrOp;

    use super::*;

    #[test]
    fn test_helper_runs_and_reports_faults() {
        let mut mem = GuestMemory::new(0x0800_0000, 64 * 1024).expect("mmap");
        let mut state = GuestState::new();
        mem.attach(&mut state);
        state.set_gpr(1, 20);
        state.set_gpr(2, 6);

        let div = IrInst::new(IrOp::DivU, 0, 1, 2);
        let ret = unsafe { exec_ir(&mut state, div.pack(), 0) };
        assert_eq!(ret, 0);
        assert_eq!((state.lo(), state.hi()), (3, 2));

        let bad = IrInst::with_const(IrOp::Interpret, 0, 0, 0x6000_0000);
        let ret = unsafe { exec_ir(&mut state, bad.pack(), bad.constant) };
        assert_eq!(ret, 1);
        assert_eq!(state.exit_reason(), ExitReason::Fault);
        assert_eq!(state.exit_arg, 0x6000_0000);
    }
}
