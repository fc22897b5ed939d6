use alloc::vec::Vec;

use crate::machine::Termination;
use crate::{Instruction, MAX_LEXI_LEVELS, MAX_STACK_HEIGHT, REGISTER_COUNT, Word};

/// Where READ takes its values from. Any iterator of words is a source.
pub trait InputSource {
    fn next_input(&mut self) -> Option<Word>;
}

impl<I: Iterator<Item = Word>> InputSource for I {
    fn next_input(&mut self) -> Option<Word> {
        self.next()
    }
}

/// Receives what the machine does while it runs.
pub trait TraceSink {
    /// Called once for every instruction that completed.
    fn record_step(&mut self, record: &StepRecord);
    /// Called by WRITE.
    fn write_output(&mut self, value: Word);
}

/// Copy of the machine's visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub pc: usize,
    pub bp: usize,
    pub sp: usize,
    pub halted: bool,
    pub registers: [Word; REGISTER_COUNT],
    pub base_table: [usize; MAX_LEXI_LEVELS],
    pub active_levels: usize,
    pub(crate) stack: [Word; MAX_STACK_HEIGHT],
}

impl Snapshot {
    /// Stack cells below the stack pointer.
    pub fn live_stack(&self) -> &[Word] {
        self.stack.get(..self.sp).unwrap_or(&self.stack)
    }
}

/// One executed instruction and the state it left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    /// Zero based count of executed instructions.
    pub step: u64,
    /// Index of the instruction that ran.
    pub pc: usize,
    pub instruction: Instruction,
    pub state: Snapshot,
}

/// Everything one run produced, also kept when the run faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTrace {
    pub steps: Vec<StepRecord>,
    pub output: Vec<Word>,
    pub initial: Option<Snapshot>,
    pub final_state: Option<Snapshot>,
    pub termination: Option<Termination>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            output: Vec::new(),
            initial: None,
            final_state: None,
            termination: None,
        }
    }

    pub fn executed(&self) -> usize {
        self.steps.len()
    }

    pub fn begin(&mut self, state: Snapshot) {
        self.initial = Some(state);
    }

    pub fn finish(&mut self, state: Snapshot, termination: Option<Termination>) {
        self.final_state = Some(state);
        self.termination = termination;
    }
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink for ExecutionTrace {
    fn record_step(&mut self, record: &StepRecord) {
        self.steps.push(*record);
    }

    fn write_output(&mut self, value: Word) {
        self.output.push(value);
    }
}
