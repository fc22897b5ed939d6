use super::*;
use crate::assembler::assemble;

extern crate std;
use std::println;
use std::vec::Vec as StdVec;

const LABEL_CAP: usize = 16;

fn assemble_program(lines: &[&str]) -> CodeSegment {
    let source = lines.join("\n");
    assemble::<LABEL_CAP>(&source).unwrap()
}

fn run_program(lines: &[&str], input: &[Word]) -> Result<ExecutionTrace, RunFailure> {
    let code = assemble_program(lines);
    run(&code, input.iter().copied())
}

fn fault_of(failure: &RunFailure) -> Fault {
    match failure.error {
        ExecutionError::Fault(fault) => fault,
        ExecutionError::ResourceExhausted { .. } => panic!("expected a machine fault"),
    }
}

#[test]
fn validate_opcode_accepts_the_whole_range() -> Result<(), MachineError> {
    assert_eq!(validate_opcode(1)?, Opcode::Lit);
    assert_eq!(validate_opcode(9)?, Opcode::Write);
    assert_eq!(validate_opcode(17)?, Opcode::Odd);
    assert_eq!(validate_opcode(18)?, Opcode::Mod);
    assert_eq!(validate_opcode(24)?, Opcode::Geq);
    for op in Opcode::ALL {
        assert_eq!(validate_opcode(Word::from(op))?, op);
    }
    Ok(())
}

#[test]
fn validate_opcode_rejects_out_of_range() {
    for raw in [0, 25, -1, 256, 257, Word::MIN, Word::MAX] {
        assert_eq!(validate_opcode(raw), Err(MachineError::InvalidOpcode(raw)));
    }
}

#[test]
fn opcode_groups_follow_field_roles() {
    assert_eq!(Opcode::Lod.group(), OpcodeGroup::Transfer);
    assert_eq!(Opcode::Halt.group(), OpcodeGroup::InputOutput);
    assert_eq!(Opcode::Odd.group(), OpcodeGroup::Arithmetic);
    assert_eq!(Opcode::Geq.group(), OpcodeGroup::Comparison);
    assert_eq!(Opcode::from_mnemonic("sio_w"), Some(Opcode::Write));
    assert_eq!(Opcode::from_mnemonic("geq"), Some(Opcode::Geq));
    assert_eq!(Opcode::from_mnemonic("NOP"), None);
}

#[test]
fn fresh_machine_is_reset() {
    let machine = Machine::new();
    assert_eq!(machine.pc(), 0);
    assert_eq!(machine.sp(), 0);
    assert_eq!(machine.bp(), 1);
    assert!(!machine.halted());
    assert_eq!(machine.registers(), &[0; REGISTER_COUNT]);
    assert!(machine.stack_slice().is_empty());
    assert_eq!(machine.active_levels(), 1);
}

#[test]
fn add_and_write_then_halt() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 3",
            "LIT 1 0 4",
            "ADD 2 0 1",
            "WRITE 2 0 1",
            "HALT 0 0 3",
        ],
        &[],
    )?;
    println!("output {:?}", trace.output);
    assert_eq!(trace.output, [7]);
    assert_eq!(trace.termination, Some(Termination::Halted));
    assert_eq!(trace.executed(), 5);
    Ok(())
}

#[test]
fn running_off_the_end_is_clean() -> Result<(), RunFailure> {
    let trace = run_program(&["LIT 0 0 1", "WRITE 0 0 1"], &[])?;
    assert_eq!(trace.output, [1]);
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    Ok(())
}

#[test]
fn empty_code_terminates_immediately() -> Result<(), RunFailure> {
    let trace = run(&CodeSegment::new(), core::iter::empty::<Word>())?;
    assert_eq!(trace.executed(), 0);
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    Ok(())
}

#[test]
fn halt_stops_before_following_code() -> Result<(), RunFailure> {
    let trace = run_program(&["HALT 0 0 3", "LIT 0 0 9", "WRITE 0 0 1"], &[])?;
    assert!(trace.output.is_empty());
    assert_eq!(trace.executed(), 1);
    Ok(())
}

#[test]
fn arithmetic_uses_register_operands() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 17",
            "LIT 1 0 5",
            "SUB 2 0 1",
            "WRITE 2 0 1",
            "MUL 2 0 1",
            "WRITE 2 0 1",
            "DIV 2 0 1",
            "WRITE 2 0 1",
            "MOD 2 0 1",
            "WRITE 2 0 1",
            "NEG 0 0 0",
            "WRITE 0 0 1",
            "MOD 3 0 1",
            "WRITE 3 0 1",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [12, 85, 3, 2, -17, -2]);
    Ok(())
}

#[test]
fn odd_keeps_the_low_bit() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 7",
            "ODD 0 0 0",
            "WRITE 0 0 1",
            "LIT 0 0 10",
            "ODD 0 0 0",
            "WRITE 0 0 1",
            "LIT 0 0 -3",
            "ODD 0 0 0",
            "WRITE 0 0 1",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [1, 0, 1]);
    Ok(())
}

#[test]
fn comparisons_yield_one_or_zero() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 2",
            "LIT 1 0 3",
            "EQL 2 0 1",
            "WRITE 2 0 1",
            "NEQ 2 0 1",
            "WRITE 2 0 1",
            "LSS 2 0 1",
            "WRITE 2 0 1",
            "LEQ 2 0 0",
            "WRITE 2 0 1",
            "GTR 2 0 1",
            "WRITE 2 0 1",
            "GEQ 2 1 0",
            "WRITE 2 0 1",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [0, 1, 1, 1, 0, 1]);
    Ok(())
}

#[test]
fn arithmetic_wraps() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 2147483647",
            "LIT 1 0 1",
            "ADD 2 0 1",
            "WRITE 2 0 1",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [Word::MIN]);
    Ok(())
}

#[test]
fn division_by_zero_leaves_destination() {
    for op in ["DIV", "MOD"] {
        let line = std::format!("{op} 2 0 1");
        let failure = run_program(
            &["LIT 0 0 9", "LIT 1 0 0", "LIT 2 0 42", line.as_str()],
            &[],
        )
        .unwrap_err();
        let fault = fault_of(&failure);
        assert_eq!(fault.kind, MachineError::DivisionByZero);
        assert_eq!(fault.pc, 3);
        let state = failure.trace.final_state.unwrap();
        assert_eq!(state.registers[2], 42);
        assert_eq!(state.pc, 3);
    }
}

#[test]
fn jpc_jumps_when_condition_is_false() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 0",
            "JPC 0 0 skip",
            "LIT 1 0 99",
            "WRITE 1 0 1",
            "skip:",
            "LIT 0 0 1",
            "JPC 0 0 end",
            "LIT 1 0 5",
            "WRITE 1 0 1",
            "end:",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [5]);
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    Ok(())
}

#[test]
fn countdown_loop() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "LIT 0 0 3",
            "LIT 1 0 1",
            "LIT 2 0 0",
            "loop:",
            "GTR 3 0 2",
            "JPC 3 0 done",
            "WRITE 0 0 1",
            "SUB 0 0 1",
            "JMP 0 0 loop",
            "done:",
            "HALT 0 0 3",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [3, 2, 1]);
    Ok(())
}

#[test]
fn read_consumes_input_in_order() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "READ 0 0 2",
            "READ 1 0 2",
            "MUL 2 0 1",
            "WRITE 2 0 1",
            "HALT 0 0 3",
        ],
        &[6, 7, 100],
    )?;
    assert_eq!(trace.output, [42]);
    Ok(())
}

#[test]
fn read_without_input_fails() {
    let failure = run_program(&["READ 0 0 2"], &[]).unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(fault.kind, MachineError::InputExhausted);
    assert_eq!(fault.pc, 0);
    assert_eq!(fault.instruction, Instruction::new(Opcode::Read, 0, 0, 2));
}

#[test]
fn sio_modifiers_are_enforced() {
    let code: CodeSegment = [
        Instruction::new(Opcode::Lit, 0, 0, 1),
        Instruction::new(Opcode::Write, 0, 0, 2),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(
        fault.kind,
        MachineError::InvalidModifier {
            opcode: Opcode::Write,
            expected: 1,
            found: 2,
        }
    );
    assert!(failure.trace.output.is_empty());

    let code: CodeSegment = [Instruction::new(Opcode::Halt, 0, 0, 0)]
        .as_slice()
        .try_into()
        .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert!(matches!(
        fault_of(&failure).kind,
        MachineError::InvalidModifier { opcode: Opcode::Halt, .. }
    ));
    assert!(!failure.trace.final_state.unwrap().halted);

    let code: CodeSegment = [Instruction::new(Opcode::Read, 0, 0, 1)]
        .as_slice()
        .try_into()
        .unwrap();
    let mut input = [5].into_iter();
    let mut machine = Machine::new();
    let mut trace = ExecutionTrace::new();
    let fault = machine.step(&code, &mut input, &mut trace).unwrap_err();
    assert!(matches!(fault.kind, MachineError::InvalidModifier { .. }));
    // The value was not consumed.
    assert_eq!(input.next(), Some(5));
}

#[test]
fn register_operands_are_bounds_checked() {
    let code: CodeSegment = [Instruction::new(Opcode::Lit, 8, 0, 1)]
        .as_slice()
        .try_into()
        .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::RegisterOutOfRange(8));

    let code: CodeSegment = [Instruction::new(Opcode::Add, 0, -1, 1)]
        .as_slice()
        .try_into()
        .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::RegisterOutOfRange(-1));
}

#[test]
fn load_and_store_in_main_record() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "INC 0 0 3",
            "LIT 0 0 11",
            "STO 0 0 2",
            "LOD 5 0 2",
            "WRITE 5 0 1",
            "HALT 0 0 3",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [11]);
    let state = trace.final_state.unwrap();
    assert_eq!(state.live_stack(), &[0, 0, 11]);
    assert_eq!(state.sp, 3);
    Ok(())
}

#[test]
fn load_above_stack_pointer_fails() {
    let failure = run_program(&["INC 0 0 2", "LOD 0 0 2"], &[]).unwrap_err();
    assert_eq!(
        fault_of(&failure).kind,
        MachineError::AddressOutOfRange { index: 2, sp: 2 }
    );

    let failure = run_program(&["INC 0 0 2", "LIT 0 0 1", "STO 0 0 -1"], &[]).unwrap_err();
    assert_eq!(
        fault_of(&failure).kind,
        MachineError::AddressOutOfRange { index: -1, sp: 2 }
    );
}

#[test]
fn inactive_level_cannot_be_resolved() {
    let failure = run_program(&["INC 0 0 2", "LOD 0 1 0"], &[]).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::LevelOutOfRange(1));
}

#[test]
fn call_and_return() -> Result<(), RunFailure> {
    let trace = run_program(
        &[
            "INC 0 0 1",
            "LIT 0 0 4",
            "STO 0 0 0",
            "CAL 0 0 square",
            "LOD 1 0 0",
            "WRITE 1 0 1",
            "HALT 0 0 3",
            "square:",
            "INC 0 0 1",
            "LOD 0 0 0",
            "MUL 0 0 0",
            "STO 0 1 0",
            "LOD 2 1 0",
            "STO 2 0 0",
            "RTN 0 0 0",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [16]);
    let state = trace.final_state.unwrap();
    assert_eq!(state.sp, 1);
    assert_eq!(state.bp, 1);
    assert_eq!(state.active_levels, 1);
    Ok(())
}

#[test]
fn call_pushes_header_with_return_address() {
    let code = assemble_program(&["INC 0 0 2", "CAL 0 0 2", "RTN 0 0 0"]);
    let mut machine = Machine::new();
    let mut trace = ExecutionTrace::new();
    let mut input = core::iter::empty::<Word>();
    machine.step(&code, &mut input, &mut trace).unwrap();
    machine.step(&code, &mut input, &mut trace).unwrap();

    assert_eq!(machine.pc(), 2);
    assert_eq!(machine.bp(), 2);
    assert_eq!(machine.sp(), 3);
    assert_eq!(machine.stack_slice(), &[0, 0, 2]);
    assert_eq!(machine.base_table()[1], 3);
    assert_eq!(machine.active_levels(), 2);
    assert_eq!(machine.call_depth(), 1);
}

#[test]
fn call_return_restores_pointers() {
    let code = assemble_program(&["INC 0 0 5", "CAL 0 0 3", "HALT 0 0 3", "RTN 0 0 0"]);
    let mut machine = Machine::new();
    let mut trace = ExecutionTrace::new();
    let mut input = core::iter::empty::<Word>();
    machine.step(&code, &mut input, &mut trace).unwrap();
    let (sp, bp) = (machine.sp(), machine.bp());

    machine.step(&code, &mut input, &mut trace).unwrap();
    assert_ne!((machine.sp(), machine.bp()), (sp, bp));
    machine.step(&code, &mut input, &mut trace).unwrap();

    assert_eq!((machine.sp(), machine.bp()), (sp, bp));
    assert_eq!(machine.pc(), 2);
    assert_eq!(machine.call_depth(), 0);
}

#[test]
fn record_is_torn_down_by_return() {
    let failure = run_program(
        &[
            "CAL 0 0 proc",
            "LOD 0 0 0",
            "HALT 0 0 3",
            "proc:",
            "LIT 0 0 5",
            "RTN 0 0 0",
        ],
        &[],
    )
    .unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(fault.kind, MachineError::AddressOutOfRange { index: 0, sp: 0 });
    assert_eq!(fault.pc, 1);
    assert_eq!(failure.trace.executed(), 3);
}

#[test]
fn nested_levels_resolve_through_base_table() -> Result<(), RunFailure> {
    // main (level 0) holds x, outer (level 1) holds y, inner (level 2)
    // writes x + y.
    let trace = run_program(
        &[
            "INC 0 0 1",
            "LIT 0 0 30",
            "STO 0 0 0",
            "CAL 0 0 outer",
            "HALT 0 0 3",
            "outer:",
            "INC 0 0 1",
            "LIT 0 0 12",
            "STO 0 1 0",
            "CAL 1 0 inner",
            "RTN 0 0 0",
            "inner:",
            "LOD 0 0 0",
            "LOD 1 1 0",
            "ADD 2 0 1",
            "WRITE 2 0 1",
            "RTN 0 0 0",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [42]);
    Ok(())
}

#[test]
fn recursion_restores_enclosing_record() -> Result<(), RunFailure> {
    // count(n): if n > 0 { write n; count(n - 1) } with n kept in the
    // callee's own record at level 1.
    let trace = run_program(
        &[
            "LIT 0 0 3",
            "CAL 0 0 count",
            "HALT 0 0 3",
            "count:",
            "INC 0 0 1",
            "STO 0 1 0",
            "LIT 1 0 0",
            "GTR 2 0 1",
            "JPC 2 0 out",
            "WRITE 0 0 1",
            "LIT 1 0 1",
            "SUB 0 0 1",
            "CAL 0 0 count",
            "LOD 3 1 0",
            "WRITE 3 0 1",
            "out:",
            "RTN 0 0 0",
        ],
        &[],
    )?;
    assert_eq!(trace.output, [3, 2, 1, 1, 2, 3]);
    let state = trace.final_state.unwrap();
    assert_eq!(state.sp, 0);
    assert_eq!(state.active_levels, 1);
    Ok(())
}

#[test]
fn return_without_call_fails() {
    let failure = run_program(&["RTN 0 0 0"], &[]).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::UnbalancedReturn);
}

#[test]
fn call_level_limits() {
    // Level 3 would need a fifth level.
    let code: CodeSegment = [Instruction::new(Opcode::Cal, 0, 3, 0)]
        .as_slice()
        .try_into()
        .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::LevelOutOfRange(3));

    // Level 1 is not active from the main program.
    let code: CodeSegment = [Instruction::new(Opcode::Cal, 0, 1, 0)]
        .as_slice()
        .try_into()
        .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::LevelOutOfRange(1));
}

#[test]
fn inc_bounds() {
    let failure = run_program(&["INC 0 0 64", "INC 0 0 1"], &[]).unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(fault.kind, MachineError::StackOverflow);
    assert_eq!(fault.pc, 1);
    assert_eq!(failure.trace.final_state.unwrap().sp, 64);

    let failure = run_program(&["INC 0 0 2", "INC 0 0 -3"], &[]).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::StackOverflow);
    assert_eq!(failure.trace.final_state.unwrap().sp, 2);

    let trace = run_program(&["INC 0 0 64", "INC 0 0 -64"], &[]).unwrap();
    assert_eq!(trace.final_state.unwrap().sp, 0);
}

#[test]
fn faulting_inc_mutates_nothing() {
    let failure = run_program(
        &["LIT 3 0 8", "INC 0 0 2", "STO 3 0 1", "INC 0 0 63"],
        &[],
    )
    .unwrap_err();
    let initial = failure.trace.steps.last().unwrap().state;
    let after = failure.trace.final_state.unwrap();
    assert_eq!(initial, after);
    assert_eq!(after.live_stack(), &[0, 8]);
}

#[test]
fn growing_stack_overflows() {
    let failure = run_program(&["INC 0 0 1", "loop:", "INC 0 0 1", "JMP 0 0 loop"], &[])
        .unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::StackOverflow);
    assert_eq!(failure.trace.final_state.unwrap().sp, MAX_STACK_HEIGHT);
}

#[test]
fn nesting_beyond_four_levels_fails() {
    let code: CodeSegment = [
        Instruction::new(Opcode::Cal, 0, 0, 1),
        Instruction::new(Opcode::Cal, 0, 1, 2),
        Instruction::new(Opcode::Cal, 0, 2, 3),
        Instruction::new(Opcode::Cal, 0, 3, 0),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(fault.kind, MachineError::LevelOutOfRange(3));
    assert_eq!(fault.pc, 3);
    assert_eq!(failure.trace.final_state.unwrap().active_levels, 4);
}

#[test]
fn deep_recursion_overflows_stack() {
    // A level 1 procedure that calls itself keeps the level count at 2 and
    // only runs out of stack.
    let failure = run_program(
        &["CAL 0 0 proc", "HALT 0 0 3", "proc:", "CAL 0 0 proc"],
        &[],
    )
    .unwrap_err();
    let fault = fault_of(&failure);
    assert_eq!(fault.kind, MachineError::StackOverflow);
    assert_eq!(failure.trace.final_state.unwrap().sp, MAX_STACK_HEIGHT);
}

#[test]
fn negative_jump_targets_fault() {
    for opcode in [Opcode::Jmp, Opcode::Cal] {
        let code: CodeSegment = [Instruction::new(opcode, 0, 0, -1)]
            .as_slice()
            .try_into()
            .unwrap();
        let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
        assert_eq!(fault_of(&failure).kind, MachineError::InvalidJumpTarget(-1));
        assert_eq!(failure.trace.final_state.map(|state| state.pc), Some(0));
    }

    // A taken JPC checks its target too.
    let code: CodeSegment = [
        Instruction::new(Opcode::Lit, 0, 0, 0),
        Instruction::new(Opcode::Jpc, 0, 0, -4),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let failure = run(&code, core::iter::empty::<Word>()).unwrap_err();
    assert_eq!(fault_of(&failure).kind, MachineError::InvalidJumpTarget(-4));
    assert_eq!(fault_of(&failure).pc, 1);
}

#[test]
fn jumps_past_the_end_stop_cleanly() -> Result<(), RunFailure> {
    let code: CodeSegment = [
        Instruction::new(Opcode::Lit, 0, 0, 7),
        Instruction::new(Opcode::Jmp, 0, 0, 200),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let trace = run(&code, core::iter::empty::<Word>())?;
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    assert_eq!(trace.final_state.map(|state| state.pc), Some(200));
    assert_eq!(trace.final_state.map(|state| state.registers[0]), Some(7));

    let trace = run_program(&["JMP 0 0 2", "WRITE 0 0 1"], &[])?;
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    assert!(trace.output.is_empty());
    Ok(())
}

#[test]
fn untaken_jpc_ignores_its_target() -> Result<(), RunFailure> {
    let code: CodeSegment = [
        Instruction::new(Opcode::Lit, 0, 0, 1),
        Instruction::new(Opcode::Jpc, 0, 0, 200),
        Instruction::new(Opcode::Write, 0, 0, 1),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let trace = run(&code, core::iter::empty::<Word>())?;
    assert_eq!(trace.output, [1]);
    assert_eq!(trace.termination, Some(Termination::EndOfCode));

    // Not taken, so even a negative target is never looked at.
    let code: CodeSegment = [
        Instruction::new(Opcode::Lit, 0, 0, 1),
        Instruction::new(Opcode::Jpc, 0, 0, -5),
    ]
    .as_slice()
    .try_into()
    .unwrap();
    let trace = run(&code, core::iter::empty::<Word>())?;
    assert_eq!(trace.termination, Some(Termination::EndOfCode));
    Ok(())
}

#[test]
fn step_budget_is_separate_from_faults() {
    let code = assemble_program(&["loop:", "JMP 0 0 loop"]);
    let failure = run_with_config(&code, core::iter::empty::<Word>(), &RunConfig::with_step_limit(10))
        .unwrap_err();
    assert_eq!(
        failure.error,
        ExecutionError::ResourceExhausted { limit: 10, pc: 0 }
    );
    assert_eq!(failure.trace.executed(), 10);
}

#[test]
fn budget_that_fits_the_program_succeeds() -> Result<(), RunFailure> {
    let code = assemble_program(&["LIT 0 0 1", "HALT 0 0 3"]);
    let trace = run_with_config(&code, core::iter::empty::<Word>(), &RunConfig::with_step_limit(2))?;
    assert_eq!(trace.termination, Some(Termination::Halted));
    Ok(())
}

#[test]
fn trace_records_every_step() -> Result<(), RunFailure> {
    let trace = run_program(&["LIT 0 0 3", "INC 0 0 1", "STO 0 0 0", "HALT 0 0 3"], &[])?;
    let steps: StdVec<(u64, usize)> = trace.steps.iter().map(|s| (s.step, s.pc)).collect();
    assert_eq!(steps, [(0, 0), (1, 1), (2, 2), (3, 3)]);
    let third = &trace.steps[2];
    assert_eq!(third.instruction, Instruction::new(Opcode::Sto, 0, 0, 0));
    assert_eq!(third.state.live_stack(), &[3]);
    assert_eq!(third.state.pc, 3);
    assert!(trace.steps[3].state.halted);
    assert_eq!(trace.initial.unwrap().bp, 1);
    Ok(())
}

#[test]
fn step_reports_finished() -> Result<(), Fault> {
    let code = assemble_program(&["HALT 0 0 3"]);
    let mut machine = Machine::new();
    let mut trace = ExecutionTrace::new();
    let mut input = core::iter::empty::<Word>();
    assert_eq!(
        machine.step(&code, &mut input, &mut trace)?,
        StepState::Finished(Termination::Halted)
    );
    assert_eq!(
        machine.step(&code, &mut input, &mut trace)?,
        StepState::Finished(Termination::Halted)
    );
    assert_eq!(machine.executed(), 1);

    machine.reset();
    assert!(!machine.halted());
    assert_eq!(machine.executed(), 0);
    Ok(())
}

#[test]
fn fault_display_names_the_instruction() {
    let failure = run_program(&["LIT 0 0 1", "RTN 0 0 0"], &[]).unwrap_err();
    let message = std::format!("{}", failure.error);
    assert_eq!(
        message,
        "return executed with no active call at instruction 1 (RTN 0 0 0)"
    );
}
