//! Compiled code must agree with the single-step reference interpreter.

use mjit::{BackendKind, EmitConfig, Jit, JitConfig, JitDisable, RunExit};
use mjit_ir::reg::{IRREG_HI, IRREG_LO};
use mjit_isa::interp::{self, StepResult};
use mjit_isa::{MemorySource, asm};
use mjit_state::{GuestMemory, GuestState};
use proptest::prelude::*;

const BASE: u32 = 0x0800_0000;
const MEMORY: usize = 1 << 16;
const DATA: u32 = BASE + 0x8000;
const DATA_REG: u8 = 28;

fn dst() -> impl Strategy<Value = u8> {
    1u8..=8
}

fn src() -> impl Strategy<Value = u8> {
    0u8..=8
}

fn three_reg() -> impl Strategy<Value = u32> {
    let ops: [fn(u8, u8, u8) -> u32; 14] = [
        asm::addu,
        asm::subu,
        asm::and,
        asm::or,
        asm::xor,
        asm::nor,
        asm::slt,
        asm::sltu,
        asm::max,
        asm::min,
        asm::movz,
        asm::movn,
        asm::sllv,
        asm::srav,
    ];
    (0..ops.len(), dst(), src(), src()).prop_map(move |(op, d, s, t)| ops[op](d, s, t))
}

fn immediate() -> impl Strategy<Value = u32> {
    prop_oneof![
        (dst(), src(), any::<i16>()).prop_map(|(t, s, imm)| asm::addiu(t, s, imm)),
        (dst(), src(), any::<i16>()).prop_map(|(t, s, imm)| asm::slti(t, s, imm)),
        (dst(), src(), any::<i16>()).prop_map(|(t, s, imm)| asm::sltiu(t, s, imm)),
        (dst(), src(), any::<u16>()).prop_map(|(t, s, imm)| asm::andi(t, s, imm)),
        (dst(), src(), any::<u16>()).prop_map(|(t, s, imm)| asm::ori(t, s, imm)),
        (dst(), src(), any::<u16>()).prop_map(|(t, s, imm)| asm::xori(t, s, imm)),
        (dst(), any::<u16>()).prop_map(|(t, imm)| asm::lui(t, imm)),
    ]
}

fn shift_and_bits() -> impl Strategy<Value = u32> {
    let shifts: [fn(u8, u8, u8) -> u32; 4] = [asm::sll, asm::srl, asm::sra, asm::rotr];
    let unary: [fn(u8, u8) -> u32; 7] = [asm::clz, asm::clo, asm::seb, asm::seh, asm::wsbh, asm::wsbw, asm::bitrev];
    prop_oneof![
        (0..shifts.len(), dst(), src(), 0u8..32).prop_map(move |(op, d, t, sa)| shifts[op](d, t, sa)),
        (0..unary.len(), dst(), src()).prop_map(move |(op, d, s)| unary[op](d, s)),
        (dst(), src(), 0u8..32, 1u8..=32).prop_map(|(t, s, pos, size)| asm::ext(t, s, pos, size.min(32 - pos))),
        (dst(), src(), 0u8..32, 1u8..=32).prop_map(|(t, s, pos, size)| asm::ins(t, s, pos, size.min(32 - pos))),
    ]
}

fn muldiv() -> impl Strategy<Value = u32> {
    let pair: [fn(u8, u8) -> u32; 8] = [
        asm::mult,
        asm::multu,
        asm::div,
        asm::divu,
        asm::madd,
        asm::maddu,
        asm::msub,
        asm::msubu,
    ];
    prop_oneof![
        (0..pair.len(), src(), src()).prop_map(move |(op, s, t)| pair[op](s, t)),
        dst().prop_map(asm::mfhi),
        dst().prop_map(asm::mflo),
        src().prop_map(asm::mthi),
        src().prop_map(asm::mtlo),
    ]
}

fn load_store() -> impl Strategy<Value = u32> {
    prop_oneof![
        (dst(), 0i16..16).prop_map(|(t, off)| asm::lw(t, DATA_REG, off * 4)),
        (src(), 0i16..16).prop_map(|(t, off)| asm::sw(t, DATA_REG, off * 4)),
        (dst(), 0i16..32).prop_map(|(t, off)| asm::lh(t, DATA_REG, off * 2)),
        (dst(), 0i16..32).prop_map(|(t, off)| asm::lhu(t, DATA_REG, off * 2)),
        (src(), 0i16..32).prop_map(|(t, off)| asm::sh(t, DATA_REG, off * 2)),
        (dst(), 0i16..64).prop_map(|(t, off)| asm::lb(t, DATA_REG, off)),
        (dst(), 0i16..64).prop_map(|(t, off)| asm::lbu(t, DATA_REG, off)),
        (src(), 0i16..64).prop_map(|(t, off)| asm::sb(t, DATA_REG, off)),
    ]
}

fn straight() -> impl Strategy<Value = u32> {
    prop_oneof![three_reg(), immediate(), shift_and_bits(), muldiv(), load_store()]
}

/// A forward branch over one instruction, with a delay slot.
fn skip() -> impl Strategy<Value = Vec<u32>> {
    (any::<bool>(), src(), src(), straight(), straight()).prop_map(|(eq, s, t, slot, skipped)| {
        let branch = if eq { asm::beq(s, t, 1) } else { asm::bne(s, t, 1) };
        vec![branch, slot, skipped]
    })
}

fn program() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(prop_oneof![4 => straight().prop_map(|op| vec![op]), 1 => skip()], 1..48).prop_map(|parts| {
        let mut program: Vec<u32> = parts.into_iter().flatten().collect();
        program.push(asm::syscall(0));
        program
    })
}

struct Outcome {
    regs: Vec<u32>,
    pc: u32,
    data: Vec<u8>,
}

fn setup_regs(state: &mut GuestState, init: &[u32; 8]) {
    for (i, &value) in init.iter().enumerate() {
        state.set_gpr(i + 1, value);
    }
    state.set_gpr(usize::from(DATA_REG), DATA);
}

fn outcome(state: &GuestState, mem: &GuestMemory) -> Outcome {
    let mut regs = state.regs[..32].to_vec();
    regs.push(state.regs[usize::from(IRREG_LO)]);
    regs.push(state.regs[usize::from(IRREG_HI)]);
    Outcome {
        regs,
        pc: state.pc,
        data: mem.read_bytes(DATA, 64).expect("data mapped").to_vec(),
    }
}

fn reference(program: &[u32], init: &[u32; 8], data: &[u8]) -> Outcome {
    let mut mem = GuestMemory::new(BASE, MEMORY).expect("allocation should succeed");
    mem.write_bytes(BASE, &asm::to_bytes(program)).expect("fits");
    mem.write_bytes(DATA, data).expect("fits");
    let mut state = GuestState::new();
    mem.attach(&mut state);
    setup_regs(&mut state, init);
    state.pc = BASE;
    let (result, _) = interp::run(&mut state, &mut mem, &MemorySource, 10_000);
    assert_eq!(result, StepResult::Syscall(0));
    outcome(&state, &mem)
}

fn compiled(config: JitConfig, program: &[u32], init: &[u32; 8], data: &[u8]) -> Outcome {
    let mut jit = Jit::new(config.with_memory(BASE, MEMORY)).expect("jit");
    jit.write_memory(BASE, &asm::to_bytes(program)).expect("fits");
    jit.write_memory(DATA, data).expect("fits");
    setup_regs(jit.state_mut(), init);
    jit.state_mut().pc = BASE;
    assert_eq!(jit.run(10_000).expect("runs"), RunExit::Syscall(0));
    outcome(jit.state(), jit.memory())
}

fn configs() -> Vec<(String, JitConfig)> {
    let mut configs = vec![(
        "interp".to_string(),
        JitConfig::new().with_backend(BackendKind::Interpreter),
    )];
    if BackendKind::X64.is_supported() {
        let x64 = JitConfig::new()
            .with_backend(BackendKind::X64)
            .with_emit(EmitConfig::default().with_max_code_bytes(1 << 20));
        configs.push(("x64".to_string(), x64.clone()));
        let no_lookahead = EmitConfig::default()
            .with_max_code_bytes(1 << 20)
            .with_lookahead_window(0);
        configs.push(("x64 no lookahead".to_string(), x64.clone().with_emit(no_lookahead)));
        configs.push((
            "x64 alu+lsu disabled".to_string(),
            x64.with_disable(JitDisable::ALU | JitDisable::LSU),
        ));
    }
    configs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backends_match_interpreter(
        program in program(),
        init in any::<[u32; 8]>(),
        data in prop::collection::vec(any::<u8>(), 64),
    ) {
        let expected = reference(&program, &init, &data);
        for (name, config) in configs() {
            let got = compiled(config, &program, &init, &data);
            prop_assert_eq!(&got.regs, &expected.regs, "{}", name);
            prop_assert_eq!(got.pc, expected.pc, "{}", name);
            prop_assert_eq!(&got.data, &expected.data, "{}", name);
        }
    }
}

#[test]
fn test_register_pressure_matches_interpreter() {
    // Touch every GPR in one block so the host allocator runs out.
    let mut program: Vec<u32> = (1..32u8)
        .filter(|&r| r != DATA_REG)
        .map(|r| asm::addiu(r, 0, i16::from(r) * 3))
        .collect();
    for r in 1..31u8 {
        if r != DATA_REG && r + 1 != DATA_REG {
            program.push(asm::addu(r, r, r + 1));
        }
    }
    program.push(asm::mult(5, 7));
    program.push(asm::mflo(9));
    program.push(asm::syscall(0));

    let init = [0; 8];
    let data = [0u8; 64];
    let expected = reference(&program, &init, &data);
    for (name, config) in configs() {
        let got = compiled(config, &program, &init, &data);
        assert_eq!(got.regs, expected.regs, "{name}");
    }
}
