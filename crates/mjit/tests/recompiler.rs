//! End-to-end tests of the recompiler through its public API.

use mjit::{BackendKind, EmitConfig, GuestFault, Jit, JitConfig, RunExit};
use mjit_isa::asm;

const BASE: u32 = 0x0800_0000;

fn backends() -> Vec<BackendKind> {
    [BackendKind::Interpreter, BackendKind::X64]
        .into_iter()
        .filter(|b| b.is_supported())
        .collect()
}

fn config(backend: BackendKind) -> JitConfig {
    JitConfig::new()
        .with_backend(backend)
        .with_memory(BASE, 1 << 20)
        .with_emit(EmitConfig::default().with_max_code_bytes(1 << 20))
}

fn load(config: JitConfig, program: &[u32]) -> Jit {
    let mut jit = Jit::new(config).expect("jit");
    jit.write_memory(BASE, &asm::to_bytes(program)).expect("program fits");
    jit.state_mut().pc = BASE;
    jit
}

#[test]
fn test_jump_register_out_of_memory() {
    let program = [asm::addiu(1, 0, 5), asm::jr(1), asm::addiu(2, 0, 1)];
    for backend in backends() {
        let mut jit = load(config(backend), &program);
        let exit = jit.run(1000).expect("runs");
        assert_eq!(
            exit,
            RunExit::Fault(GuestFault::InvalidJump { pc: 5, from_block: BASE }),
            "{backend:?}"
        );
        assert_eq!(jit.state().gpr(1), 5);
        // The delay slot runs before the jump lands.
        assert_eq!(jit.state().gpr(2), 1, "{backend:?}");
        assert_eq!(jit.state().pc, 5);
    }
}

#[test]
fn test_guest_store_rewrites_called_function() {
    const FUNC: u32 = BASE + 0x40;
    let patched = asm::addiu(2, 0, 2);
    let mut program = vec![
        asm::lui(3, 0x0800),
        asm::jal(FUNC),
        asm::nop(),
        asm::lui(4, (patched >> 16) as u16),
        asm::ori(4, 4, (patched & 0xFFFF) as u16),
        asm::sw(4, 3, 0x40),
        asm::addu(5, 2, 0),
        asm::jal(FUNC),
        asm::nop(),
        asm::syscall(0),
    ];
    program.resize(16, asm::nop());
    program.extend([asm::addiu(2, 0, 1), asm::jr(31), asm::nop()]);

    for backend in backends() {
        let mut jit = load(config(backend), &program);
        assert_eq!(jit.run(1000).expect("runs"), RunExit::Syscall(0), "{backend:?}");
        assert_eq!(jit.state().gpr(5), 1, "first call runs the original code");
        assert_eq!(jit.state().gpr(2), 2, "{backend:?}: second call runs the patched code");
        assert!(jit.stats().invalidations >= 1);
    }
}

#[test]
fn test_recompiling_gives_same_results() {
    let program = [
        asm::addiu(1, 0, 7),
        asm::addiu(2, 0, 0),
        asm::addu(2, 2, 1),
        asm::addiu(1, 1, -1),
        asm::bne(1, 0, -3),
        asm::sll(3, 2, 2),
        asm::syscall(0),
    ];
    for backend in backends() {
        let mut jit = load(config(backend), &program);
        let first = jit.compile_at(BASE).expect("compiles");
        assert_eq!(jit.compile_at(BASE).expect("cached"), first);
        assert_eq!(jit.run(1000).expect("runs"), RunExit::Syscall(0));
        let regs = jit.state().regs;

        jit.clear_all().expect("clears");
        assert!(jit.block_at(BASE).is_none());
        jit.state_mut().reset();
        jit.state_mut().pc = BASE;
        assert_eq!(jit.run(1000).expect("runs"), RunExit::Syscall(0));
        assert_eq!(jit.state().regs, regs, "{backend:?}");
        assert_eq!(jit.state().gpr(3), 28 * 4);
    }
}

#[test]
fn test_long_chain_through_tiny_cache() {
    // Forty one-jump blocks in a row, with room for four at a time.
    let mut program = Vec::new();
    for i in 0..40u32 {
        let next = BASE + (i + 1) * 12;
        program.extend([asm::addiu(2, 2, 1), asm::j(next), asm::nop()]);
    }
    program.push(asm::syscall(0));

    for backend in backends() {
        let mut jit = load(config(backend).with_max_blocks(4), &program);
        assert_eq!(jit.run(10_000).expect("runs"), RunExit::Syscall(0), "{backend:?}");
        assert_eq!(jit.state().gpr(2), 40);
        assert!(jit.stats().allocated <= 4);
    }
}

#[test]
fn test_state_file_resumes_run() {
    let program = [
        asm::addiu(1, 0, 10),
        asm::addiu(2, 2, 3),
        asm::addiu(1, 1, -1),
        asm::bne(1, 0, -3),
        asm::nop(),
        asm::syscall(0),
    ];
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.bin");

    for backend in backends() {
        let mut jit = load(config(backend), &program);
        assert_eq!(jit.run(12).expect("runs"), RunExit::OutOfCycles);
        let partial = jit.state().gpr(2);
        assert!(partial > 0 && partial < 30, "{partial}");
        jit.save_state(&path).expect("saves");

        let mut resumed = Jit::new(config(backend)).expect("jit");
        resumed.load_state(&path).expect("loads");
        assert_eq!(resumed.state().pc, jit.state().pc);
        assert_eq!(resumed.state().gpr(2), partial);
        assert_eq!(resumed.run(10_000).expect("runs"), RunExit::Syscall(0), "{backend:?}");
        assert_eq!(resumed.state().gpr(2), 30);
        assert_eq!(resumed.state().pc, BASE + 24);
    }
}
