use heapless::Vec;
use thiserror_no_std::Error;
use tracing::{debug, trace, warn};

use crate::trace::{ExecutionTrace, InputSource, Snapshot, StepRecord, TraceSink};
use crate::{
    CodeSegment, Instruction, MAX_LEXI_LEVELS, MAX_STACK_HEIGHT, MachineError, Opcode,
    REGISTER_COUNT, Word,
};

/// Why a run stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// HALT was executed.
    Halted,
    /// The program counter ran off the end of the code segment.
    EndOfCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Running,
    Finished(Termination),
}

/// A failed instruction together with where it sat in the program.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} at instruction {pc} ({instruction})")]
pub struct Fault {
    pub kind: MachineError,
    pub pc: usize,
    pub instruction: Instruction,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{0}")]
    Fault(Fault),
    /// The caller's step budget ran out. Not a machine fault.
    #[error("step budget of {limit} instructions exhausted at instruction {pc}")]
    ResourceExhausted { limit: u64, pc: usize },
}

impl From<Fault> for ExecutionError {
    fn from(fault: Fault) -> Self {
        ExecutionError::Fault(fault)
    }
}

/// A run that stopped on an error, with the trace up to that point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct RunFailure {
    pub error: ExecutionError,
    pub trace: ExecutionTrace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Maximum number of instructions to execute, `None` for no limit.
    pub step_limit: Option<u64>,
}

impl RunConfig {
    pub fn with_step_limit(step_limit: u64) -> Self {
        Self {
            step_limit: Some(step_limit),
        }
    }
}

/// Control information for one active call.
///
/// Stack layout of a call made with `sp = h`:
/// `[.. caller cells][h: return address][h+1: callee locals ..]`
/// `bp` points at `h` while the callee runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActivationRecord {
    header: usize,
    return_address: usize,
    caller_base: usize,
    level: usize,
    saved_base: usize,
    saved_levels: usize,
}

/// Registers, stack, activation-record base table and pointers of one
/// PL0 machine. All mutation happens while executing instructions.
#[derive(Debug, Clone)]
pub struct Machine {
    registers: [Word; REGISTER_COUNT],
    stack: [Word; MAX_STACK_HEIGHT],
    base_table: [usize; MAX_LEXI_LEVELS],
    active_levels: usize,
    frames: Vec<ActivationRecord, MAX_STACK_HEIGHT>,
    pc: usize,
    sp: usize,
    bp: usize,
    halted: bool,
    executed: u64,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            stack: [0; MAX_STACK_HEIGHT],
            base_table: [0; MAX_LEXI_LEVELS],
            active_levels: 1,
            frames: Vec::new(),
            pc: 0,
            sp: 0,
            bp: 1,
            halted: false,
            executed: 0,
        }
    }

    /// Back to `pc = 0, sp = 0, bp = 1`, not halted, everything zeroed.
    /// Level 0 (the main program) is active with its record at stack 0.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn registers(&self) -> &[Word; REGISTER_COUNT] {
        &self.registers
    }

    /// The live part of the stack, `[0, sp)`.
    pub fn stack_slice(&self) -> &[Word] {
        self.stack.get(..self.sp).unwrap_or(&self.stack)
    }

    pub fn base_table(&self) -> &[usize; MAX_LEXI_LEVELS] {
        &self.base_table
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Number of lexicographic levels that can currently be addressed.
    pub fn active_levels(&self) -> usize {
        self.active_levels
    }

    /// Number of calls that have not returned yet.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Instructions executed since the last reset.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.pc,
            bp: self.bp,
            sp: self.sp,
            halted: self.halted,
            registers: self.registers,
            base_table: self.base_table,
            active_levels: self.active_levels,
            stack: self.stack,
        }
    }

    /// `Some` once the machine has nothing left to do.
    pub fn termination(&self, code: &CodeSegment) -> Option<Termination> {
        if self.halted {
            Some(Termination::Halted)
        } else if self.pc >= code.len() {
            Some(Termination::EndOfCode)
        } else {
            None
        }
    }

    /// Run until HALT, the end of the code, a fault or the step budget.
    pub fn execute<I, S>(
        &mut self,
        code: &CodeSegment,
        input: &mut I,
        sink: &mut S,
        config: &RunConfig,
    ) -> Result<Termination, ExecutionError>
    where
        I: InputSource + ?Sized,
        S: TraceSink + ?Sized,
    {
        let mut steps: u64 = 0;
        loop {
            if let Some(termination) = self.termination(code) {
                debug!(
                    ?termination,
                    executed = self.executed,
                    pc = self.pc,
                    "machine stopped"
                );
                return Ok(termination);
            }

            if let Some(limit) = config.step_limit {
                if steps >= limit {
                    warn!(limit, pc = self.pc, "step budget exhausted");
                    return Err(ExecutionError::ResourceExhausted { limit, pc: self.pc });
                }
            }

            if let Err(fault) = self.step(code, input, sink) {
                warn!(%fault, "machine fault");
                return Err(fault.into());
            }
            steps = steps.saturating_add(1);
        }
    }

    /// Execute the instruction at `pc`. On failure nothing is changed and
    /// `pc` still points at the faulting instruction.
    pub fn step<I, S>(
        &mut self,
        code: &CodeSegment,
        input: &mut I,
        sink: &mut S,
    ) -> Result<StepState, Fault>
    where
        I: InputSource + ?Sized,
        S: TraceSink + ?Sized,
    {
        if let Some(termination) = self.termination(code) {
            return Ok(StepState::Finished(termination));
        }
        let pc = self.pc;
        let Some(instruction) = code.get(pc).copied() else {
            return Ok(StepState::Finished(Termination::EndOfCode));
        };

        trace!(pc, %instruction, sp = self.sp, bp = self.bp, "step");

        let next_pc = match self.dispatch(instruction, pc, input, sink) {
            Ok(next_pc) => next_pc,
            Err(kind) => {
                return Err(Fault {
                    kind,
                    pc,
                    instruction,
                });
            }
        };

        self.pc = next_pc;
        let record = StepRecord {
            step: self.executed,
            pc,
            instruction,
            state: self.snapshot(),
        };
        self.executed = self.executed.saturating_add(1);
        sink.record_step(&record);

        match self.termination(code) {
            Some(termination) => Ok(StepState::Finished(termination)),
            None => Ok(StepState::Running),
        }
    }

    /// Returns the next program counter. Every check happens before the
    /// first write so a failing instruction leaves the machine untouched.
    fn dispatch<I, S>(
        &mut self,
        instruction: Instruction,
        pc: usize,
        input: &mut I,
        sink: &mut S,
    ) -> Result<usize, MachineError>
    where
        I: InputSource + ?Sized,
        S: TraceSink + ?Sized,
    {
        // Pre-increment; jumps overwrite it.
        let next_pc = pc.checked_add(1).ok_or(MachineError::StackOverflow)?;
        let r = instruction.register();
        let l = instruction.level();
        let m = instruction.modifier();

        match instruction.opcode() {
            Opcode::Lit => {
                *self.register_mut(r)? = m;
            }
            Opcode::Rtn => {
                return self.return_from_call();
            }
            Opcode::Lod => {
                let index = self.resolve(l, m)?;
                let value = *self.stack.get(index).ok_or(MachineError::StackOverflow)?;
                *self.register_mut(r)? = value;
            }
            Opcode::Sto => {
                let value = self.register(r)?;
                let index = self.resolve(l, m)?;
                *self
                    .stack
                    .get_mut(index)
                    .ok_or(MachineError::StackOverflow)? = value;
            }
            Opcode::Cal => {
                let target = jump_target(m)?;
                self.call(l, next_pc)?;
                return Ok(target);
            }
            Opcode::Inc => {
                self.increment(m)?;
            }
            Opcode::Jmp => {
                return jump_target(m);
            }
            Opcode::Jpc => {
                // Comparisons leave 0 for false: jump when the condition failed.
                if self.register(r)? == 0 {
                    return jump_target(m);
                }
            }
            Opcode::Write => {
                check_modifier(instruction)?;
                let value = self.register(r)?;
                sink.write_output(value);
            }
            Opcode::Read => {
                check_modifier(instruction)?;
                let slot = self.register_mut(r)?;
                *slot = input.next_input().ok_or(MachineError::InputExhausted)?;
            }
            Opcode::Halt => {
                check_modifier(instruction)?;
                self.halted = true;
            }
            Opcode::Neg => {
                let slot = self.register_mut(r)?;
                *slot = slot.wrapping_neg();
            }
            Opcode::Odd => {
                let slot = self.register_mut(r)?;
                *slot &= 1;
            }
            Opcode::Add => self.binary(r, l, m, |lhs, rhs| Ok(lhs.wrapping_add(rhs)))?,
            Opcode::Sub => self.binary(r, l, m, |lhs, rhs| Ok(lhs.wrapping_sub(rhs)))?,
            Opcode::Mul => self.binary(r, l, m, |lhs, rhs| Ok(lhs.wrapping_mul(rhs)))?,
            Opcode::Div => self.binary(r, l, m, |lhs, rhs| {
                if rhs == 0 {
                    return Err(MachineError::DivisionByZero);
                }
                Ok(lhs.wrapping_div(rhs))
            })?,
            Opcode::Mod => self.binary(r, l, m, |lhs, rhs| {
                if rhs == 0 {
                    return Err(MachineError::DivisionByZero);
                }
                Ok(lhs.wrapping_rem(rhs))
            })?,
            Opcode::Eql => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs == rhs)))?,
            Opcode::Neq => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs != rhs)))?,
            Opcode::Lss => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs < rhs)))?,
            Opcode::Leq => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs <= rhs)))?,
            Opcode::Gtr => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs > rhs)))?,
            Opcode::Geq => self.binary(r, l, m, |lhs, rhs| Ok(Word::from(lhs >= rhs)))?,
        }

        Ok(next_pc)
    }

    fn register(&self, index: Word) -> Result<Word, MachineError> {
        let slot = usize::try_from(index).map_err(|_| MachineError::RegisterOutOfRange(index))?;
        self.registers
            .get(slot)
            .copied()
            .ok_or(MachineError::RegisterOutOfRange(index))
    }

    fn register_mut(&mut self, index: Word) -> Result<&mut Word, MachineError> {
        let slot = usize::try_from(index).map_err(|_| MachineError::RegisterOutOfRange(index))?;
        self.registers
            .get_mut(slot)
            .ok_or(MachineError::RegisterOutOfRange(index))
    }

    /// `registers[dest] := op(registers[lhs], registers[rhs])`
    fn binary<F>(&mut self, dest: Word, lhs: Word, rhs: Word, op: F) -> Result<(), MachineError>
    where
        F: FnOnce(Word, Word) -> Result<Word, MachineError>,
    {
        let lhs = self.register(lhs)?;
        let rhs = self.register(rhs)?;
        // Validate the destination before computing so a bad divisor and a
        // bad destination report the same way every time.
        self.register(dest)?;
        let value = op(lhs, rhs)?;
        *self.register_mut(dest)? = value;
        Ok(())
    }

    /// Stack index of the variable at `offset` in the record of `level`.
    fn resolve(&self, level: Word, offset: Word) -> Result<usize, MachineError> {
        let level_index =
            usize::try_from(level).map_err(|_| MachineError::LevelOutOfRange(level))?;
        if level_index >= self.active_levels {
            return Err(MachineError::LevelOutOfRange(level));
        }
        let base = *self
            .base_table
            .get(level_index)
            .ok_or(MachineError::LevelOutOfRange(level))?;

        let base = i64::try_from(base).map_err(|_| MachineError::StackOverflow)?;
        let index = base
            .checked_add(i64::from(offset))
            .ok_or(MachineError::StackOverflow)?;
        let out_of_range = MachineError::AddressOutOfRange {
            index,
            sp: self.sp,
        };
        let index = usize::try_from(index).map_err(|_| out_of_range)?;
        if index >= self.sp {
            return Err(out_of_range);
        }
        Ok(index)
    }

    fn call(&mut self, level: Word, return_address: usize) -> Result<(), MachineError> {
        let caller_level =
            usize::try_from(level).map_err(|_| MachineError::LevelOutOfRange(level))?;
        let callee_level = caller_level
            .checked_add(1)
            .ok_or(MachineError::LevelOutOfRange(level))?;
        if callee_level >= MAX_LEXI_LEVELS || caller_level >= self.active_levels {
            return Err(MachineError::LevelOutOfRange(level));
        }
        let saved_base = *self
            .base_table
            .get(callee_level)
            .ok_or(MachineError::LevelOutOfRange(level))?;

        let header = self.sp;
        let locals = header.checked_add(1).ok_or(MachineError::StackOverflow)?;
        if locals > MAX_STACK_HEIGHT {
            return Err(MachineError::StackOverflow);
        }
        let return_word =
            Word::try_from(return_address).map_err(|_| MachineError::StackOverflow)?;

        let record = ActivationRecord {
            header,
            return_address,
            caller_base: self.bp,
            level: callee_level,
            saved_base,
            saved_levels: self.active_levels,
        };
        self.frames
            .push(record)
            .map_err(|_| MachineError::StackOverflow)?;

        if let Some(slot) = self.stack.get_mut(header) {
            *slot = return_word;
        }
        if let Some(entry) = self.base_table.get_mut(callee_level) {
            *entry = locals;
        }
        self.active_levels = callee_level.saturating_add(1);
        self.bp = header;
        self.sp = locals;
        Ok(())
    }

    fn return_from_call(&mut self) -> Result<usize, MachineError> {
        let record = self.frames.pop().ok_or(MachineError::UnbalancedReturn)?;

        if let Some(entry) = self.base_table.get_mut(record.level) {
            *entry = record.saved_base;
        }
        self.active_levels = record.saved_levels;
        self.sp = record.header;
        self.bp = record.caller_base;
        Ok(record.return_address)
    }

    fn increment(&mut self, amount: Word) -> Result<(), MachineError> {
        let sp = i64::try_from(self.sp).map_err(|_| MachineError::StackOverflow)?;
        let new_sp = sp
            .checked_add(i64::from(amount))
            .ok_or(MachineError::StackOverflow)?;
        let new_sp = usize::try_from(new_sp).map_err(|_| MachineError::StackOverflow)?;
        if new_sp > MAX_STACK_HEIGHT {
            return Err(MachineError::StackOverflow);
        }
        // Fresh cells start at zero so traces do not depend on stale data.
        if let Some(fresh) = self.stack.get_mut(self.sp..new_sp) {
            fresh.fill(0);
        }
        self.sp = new_sp;
        Ok(())
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// Targets at or past the end of the code stop the run with `EndOfCode`.
fn jump_target(target: Word) -> Result<usize, MachineError> {
    usize::try_from(target).map_err(|_| MachineError::InvalidJumpTarget(target))
}

fn check_modifier(instruction: Instruction) -> Result<(), MachineError> {
    let opcode = instruction.opcode();
    match opcode.required_modifier() {
        Some(expected) if expected != instruction.modifier() => {
            Err(MachineError::InvalidModifier {
                opcode,
                expected,
                found: instruction.modifier(),
            })
        }
        _ => Ok(()),
    }
}

/// Run `code` on a fresh machine with the default configuration.
pub fn run<I: InputSource>(code: &CodeSegment, input: I) -> Result<ExecutionTrace, RunFailure> {
    run_with_config(code, input, &RunConfig::default())
}

/// Run `code` on a fresh machine. The trace is returned either way; on
/// failure it holds everything up to the faulting instruction.
pub fn run_with_config<I: InputSource>(
    code: &CodeSegment,
    mut input: I,
    config: &RunConfig,
) -> Result<ExecutionTrace, RunFailure> {
    let mut machine = Machine::new();
    let mut trace = ExecutionTrace::new();
    trace.begin(machine.snapshot());

    let result = machine.execute(code, &mut input, &mut trace, config);
    match result {
        Ok(termination) => {
            trace.finish(machine.snapshot(), Some(termination));
            Ok(trace)
        }
        Err(error) => {
            trace.finish(machine.snapshot(), None);
            Err(RunFailure { error, trace })
        }
    }
}
