//! End-to-end tests for single instruction steps.

use groudon_vm::builtin::Bitwise;
use groudon_vm::cpu::Cpu;
use groudon_vm::error::Error;
use groudon_vm::memory::{Memory, Relocatable, Value};
use groudon_vm::trace::{NoopTrace, Trace};
use groudon_vm::CairoVM;
use starknet_types_core::felt::Felt;

/// Builds an instruction word from raw offsets and flag values.
fn encode(dst_offset: i16, op0_offset: i16, op1_offset: i16, flags: u64) -> Value {
    fn biased(offset: i16) -> u64 {
        (offset as i32 + (1 << 15)) as u64
    }

    let word =
        biased(dst_offset) | biased(op0_offset) << 16 | biased(op1_offset) << 32 | flags << 48;
    Value::Scalar(Felt::from(word))
}

fn flags(
    dst_fp: bool,
    op0_fp: bool,
    op1_src: u64,
    res: u64,
    pc: u64,
    ap: u64,
    opcode: u64,
) -> u64 {
    dst_fp as u64
        | (op0_fp as u64) << 1
        | op1_src << 2
        | res << 5
        | pc << 7
        | ap << 10
        | opcode << 12
}

fn scalar(value: u64) -> Value {
    Value::Scalar(Felt::from(value))
}

fn pointer(segment: u32, offset: u32) -> Value {
    Value::Pointer(Relocatable::new(segment, offset))
}

/// Creates a VM with a program segment (0), an execution segment (1), and the
/// provided register offsets into the execution segment.
fn setup(program: &[Value], ap: u32, fp: u32) -> CairoVM {
    let mut memory = Memory::new();
    let code = memory.add_segment();
    let execution = memory.add_segment();

    for (offset, value) in program.iter().enumerate() {
        memory
            .insert(Relocatable::new(code, offset as u32), *value)
            .unwrap();
    }

    let cpu = Cpu::new(
        Relocatable::new(code, 0),
        Relocatable::new(execution, ap),
        Relocatable::new(execution, fp),
    );
    CairoVM::new(cpu, memory)
}

/// A [`Trace`] implementation recording the cells asserted by each step.
#[derive(Debug, Default)]
struct Recorder {
    inserts: Vec<(Relocatable, Value)>,
}

impl Trace for Recorder {
    fn memory_insert(&mut self, addr: Relocatable, value: &Value) {
        self.inserts.push((addr, *value));
    }
}

#[test]
fn call_pushes_frame_and_jumps() {
    // call abs 0:10
    let program = [
        encode(0, 1, 1, flags(false, false, 1, 0, 1, 0, 1)),
        pointer(0, 10),
    ];
    let mut vm = setup(&program, 2, 0);
    let mut recorder = Recorder::default();

    vm.step(&mut recorder).unwrap();

    assert_eq!(
        vm.memory().get(Relocatable::new(1, 2)).unwrap(),
        Some(&pointer(1, 0))
    );
    assert_eq!(
        vm.memory().get(Relocatable::new(1, 3)).unwrap(),
        Some(&pointer(0, 2))
    );
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 10));
    assert_eq!(vm.cpu().ap, Relocatable::new(1, 4));
    assert_eq!(vm.cpu().fp, Relocatable::new(1, 4));

    assert_eq!(
        recorder.inserts,
        vec![
            (Relocatable::new(1, 2), pointer(1, 0)),
            (Relocatable::new(1, 3), pointer(0, 2)),
        ]
    );
}

#[test]
fn call_rejects_clobbered_frame_cell() {
    let program = [
        encode(0, 1, 1, flags(false, false, 1, 0, 1, 0, 1)),
        pointer(0, 10),
    ];
    let mut vm = setup(&program, 2, 0);
    // The cell where `call` saves the frame pointer already holds something
    // else.
    vm.memory_mut()
        .insert(Relocatable::new(1, 2), scalar(77))
        .unwrap();

    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(
        err,
        Error::InconsistentMemory(Relocatable::new(1, 2), scalar(77), pointer(1, 0))
    );
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 0));
}

#[test]
fn assert_eq_deduces_missing_dst() {
    // assert [ap] = [fp] + 4
    let program = [
        encode(0, 0, 1, flags(false, true, 1, 1, 0, 2, 4)),
        scalar(4),
    ];
    let mut vm = setup(&program, 1, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(3))
        .unwrap();

    let mut recorder = Recorder::default();
    vm.step(&mut recorder).unwrap();

    assert_eq!(
        vm.memory().get(Relocatable::new(1, 1)).unwrap(),
        Some(&scalar(7))
    );
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 2));
    assert_eq!(vm.cpu().ap, Relocatable::new(1, 2));
    assert_eq!(vm.cpu().fp, Relocatable::new(1, 0));
    assert_eq!(
        recorder.inserts,
        vec![(Relocatable::new(1, 1), scalar(7))]
    );
}

#[test]
fn assert_eq_rejects_contradiction_and_leaves_state_untouched() {
    let program = [
        encode(0, 0, 1, flags(false, true, 1, 1, 0, 2, 4)),
        scalar(4),
    ];
    let mut vm = setup(&program, 1, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(3))
        .unwrap();
    vm.memory_mut()
        .insert(Relocatable::new(1, 1), scalar(8))
        .unwrap();

    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(
        err,
        Error::InconsistentMemory(Relocatable::new(1, 1), scalar(8), scalar(7))
    );

    // The failed step must have no observable effect.
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 0));
    assert_eq!(vm.cpu().ap, Relocatable::new(1, 1));
    assert_eq!(vm.cpu().fp, Relocatable::new(1, 0));
    assert_eq!(
        vm.memory().get(Relocatable::new(1, 1)).unwrap(),
        Some(&scalar(8))
    );
}

#[test]
fn assert_eq_deduces_op0_by_subtraction() {
    // assert [ap] = [fp] + 4, with [ap] known and [fp] unknown.
    let program = [
        encode(0, 0, 1, flags(false, true, 1, 1, 0, 0, 4)),
        scalar(4),
    ];
    let mut vm = setup(&program, 0, 5);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(10))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();

    assert_eq!(
        vm.memory().get(Relocatable::new(1, 5)).unwrap(),
        Some(&scalar(6))
    );
}

#[test]
fn assert_eq_deduces_op1_by_division() {
    // assert [ap] = [fp] * [fp + 1], with [fp + 1] unknown.
    let program = [encode(0, 0, 1, flags(false, true, 2, 2, 0, 0, 4))];
    let mut vm = setup(&program, 0, 1);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(12))
        .unwrap();
    vm.memory_mut()
        .insert(Relocatable::new(1, 1), scalar(3))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();

    assert_eq!(
        vm.memory().get(Relocatable::new(1, 2)).unwrap(),
        Some(&scalar(4))
    );
}

#[test]
fn conditional_jump_falls_through_on_zero() {
    let program = [
        encode(0, 0, 1, flags(false, false, 1, 0, 4, 0, 0)),
        scalar(5),
    ];
    let mut vm = setup(&program, 0, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(0))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 2));
}

#[test]
fn conditional_jump_is_taken_on_non_zero() {
    let program = [
        encode(0, 0, 1, flags(false, false, 1, 0, 4, 0, 0)),
        scalar(5),
    ];
    let mut vm = setup(&program, 0, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(3))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 5));
}

#[test]
fn relative_jump_moves_backwards() {
    // jmp rel -3, executed from 0:5.
    let mut memory = Memory::new();
    let code = memory.add_segment();
    let execution = memory.add_segment();
    memory
        .insert(
            Relocatable::new(code, 5),
            encode(0, 0, 1, flags(false, false, 1, 0, 2, 0, 0)),
        )
        .unwrap();
    memory
        .insert(Relocatable::new(code, 6), Value::Scalar(Felt::from(-3)))
        .unwrap();
    memory
        .insert(Relocatable::new(execution, 0), scalar(1))
        .unwrap();

    let cpu = Cpu::new(
        Relocatable::new(code, 5),
        Relocatable::new(execution, 0),
        Relocatable::new(execution, 0),
    );
    let mut vm = CairoVM::new(cpu, memory);

    vm.step(&mut NoopTrace).unwrap();
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 2));
}

#[test]
fn ret_restores_frame() {
    let program = [encode(-2, -1, -1, flags(true, true, 2, 0, 1, 0, 2))];
    let mut vm = setup(&program, 2, 2);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), pointer(1, 0))
        .unwrap();
    vm.memory_mut()
        .insert(Relocatable::new(1, 1), pointer(0, 7))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();

    assert_eq!(vm.cpu().pc, Relocatable::new(0, 7));
    assert_eq!(vm.cpu().ap, Relocatable::new(1, 2));
    assert_eq!(vm.cpu().fp, Relocatable::new(1, 0));
}

#[test]
fn add_result_moves_ap_by_res() {
    // [ap] is pre-written so the destination operand resolves.
    let program = [
        encode(0, 0, 1, flags(false, true, 1, 1, 0, 1, 0)),
        scalar(3),
    ];
    let mut vm = setup(&program, 1, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(2))
        .unwrap();
    vm.memory_mut()
        .insert(Relocatable::new(1, 1), scalar(99))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();

    assert_eq!(vm.cpu().ap, Relocatable::new(1, 6));
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 2));
}

#[test]
fn op1_relative_to_op0_dereferences_the_pointer() {
    // assert [ap] = [[fp] + 1]
    let program = [
        encode(0, 0, 1, flags(false, true, 0, 0, 0, 2, 4)),
        scalar(42),
    ];
    let mut vm = setup(&program, 1, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), pointer(0, 0))
        .unwrap();

    vm.step(&mut NoopTrace).unwrap();

    // op1 was read from 0:1, the cell holding the immediate.
    assert_eq!(
        vm.memory().get(Relocatable::new(1, 1)).unwrap(),
        Some(&scalar(42))
    );
}

#[test]
fn op1_relative_to_op0_requires_a_pointer() {
    let program = [encode(0, 0, 0, flags(false, true, 0, 0, 0, 0, 4))];
    let mut vm = setup(&program, 0, 0);
    vm.memory_mut()
        .insert(Relocatable::new(1, 0), scalar(3))
        .unwrap();

    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(err, Error::ExpectedRelocatable(scalar(3)));
    assert_eq!(vm.cpu().pc, Relocatable::new(0, 0));
}

#[test]
fn missing_operand_is_reported() {
    // no-op with nothing written anywhere near the registers.
    let program = [encode(0, 0, 1, flags(false, false, 1, 0, 0, 0, 0)), scalar(1)];
    let mut vm = setup(&program, 0, 0);

    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(err, Error::UndefinedValue(Relocatable::new(1, 0)));
}

#[test]
fn unknown_instruction_cell_is_reported() {
    let mut vm = setup(&[], 0, 0);
    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(err, Error::UndefinedValue(Relocatable::new(0, 0)));
}

#[test]
fn pointer_instruction_cell_is_reported() {
    let program = [pointer(1, 0)];
    let mut vm = setup(&program, 0, 0);
    let err = vm.step(&mut NoopTrace).unwrap_err();
    assert_eq!(err, Error::InstructionError(Relocatable::new(0, 0)));
}

fn bitwise_vm(x: u64, y: u64) -> CairoVM {
    let mut vm = setup(&[], 0, 0);
    let segment = vm.memory_mut().add_segment();
    vm.memory_mut()
        .insert(Relocatable::new(segment, 0), scalar(x))
        .unwrap();
    vm.memory_mut()
        .insert(Relocatable::new(segment, 1), scalar(y))
        .unwrap();
    vm.register_builtin(segment, Box::new(Bitwise));
    vm
}

#[test]
fn bitwise_reads_materialize_output_cells() {
    let mut vm = bitwise_vm(0b1100, 0b1010);

    assert_eq!(vm.read(Relocatable::new(2, 2)).unwrap(), scalar(0b1000));
    assert_eq!(vm.read(Relocatable::new(2, 3)).unwrap(), scalar(0b0110));
    assert_eq!(vm.read(Relocatable::new(2, 4)).unwrap(), scalar(0b1110));

    // The results are memoized through the write-once path: a later direct
    // write must match them.
    assert_eq!(
        vm.memory_mut().insert(Relocatable::new(2, 3), scalar(7)),
        Err(Error::InconsistentMemory(
            Relocatable::new(2, 3),
            scalar(0b0110),
            scalar(7)
        ))
    );
    assert_eq!(vm.read(Relocatable::new(2, 2)).unwrap(), scalar(0b1000));
}

#[test]
fn bitwise_read_with_missing_input_is_reported() {
    let mut vm = setup(&[], 0, 0);
    let segment = vm.memory_mut().add_segment();
    vm.register_builtin(segment, Box::new(Bitwise));

    assert_eq!(
        vm.read(Relocatable::new(segment, 2)),
        Err(Error::UndefinedValue(Relocatable::new(segment, 0)))
    );
}

#[test]
fn step_deduces_operands_through_builtins() {
    // assert [ap] = [fp + 2], where fp points into the bitwise segment and
    // fp + 2 is the AND output cell of the first block.
    let mut memory = Memory::new();
    let code = memory.add_segment();
    let execution = memory.add_segment();
    let bitwise = memory.add_segment();
    memory
        .insert(
            Relocatable::new(code, 0),
            encode(0, 0, 2, flags(false, true, 2, 0, 0, 2, 4)),
        )
        .unwrap();
    memory
        .insert(Relocatable::new(bitwise, 0), scalar(0b1100))
        .unwrap();
    memory
        .insert(Relocatable::new(bitwise, 1), scalar(0b1010))
        .unwrap();

    let cpu = Cpu::new(
        Relocatable::new(code, 0),
        Relocatable::new(execution, 0),
        Relocatable::new(bitwise, 0),
    );
    let mut vm = CairoVM::new(cpu, memory);
    vm.register_builtin(bitwise, Box::new(Bitwise));

    let mut recorder = Recorder::default();
    vm.step(&mut recorder).unwrap();

    assert_eq!(
        vm.memory().get(Relocatable::new(1, 0)).unwrap(),
        Some(&scalar(0b1000))
    );
    assert_eq!(
        vm.memory().get(Relocatable::new(2, 2)).unwrap(),
        Some(&scalar(0b1000))
    );
    assert_eq!(
        recorder.inserts,
        vec![
            (Relocatable::new(1, 0), scalar(0b1000)),
            (Relocatable::new(2, 2), scalar(0b1000)),
        ]
    );
    assert_eq!(vm.cpu().ap, Relocatable::new(1, 1));
}
