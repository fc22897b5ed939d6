#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Virtual machine for the PL0 teaching language.
//!
//! The machine has a fixed amount of hardware:
//! ```text
//! code:      256 instructions
//! registers: 8 signed words
//! stack:     64 signed words
//! levels:    4 lexicographic levels
//! ```
//! Every instruction has the shape `OP R L M`. For the transfer and
//! I/O group `R` is a register, `L` a static level and `M` a literal,
//! jump target or stack offset. For the arithmetic and comparison group
//! all three fields are register indices: `R` is the destination, `L`
//! the left operand and `M` the right operand.
//!
//! Code reaches the machine through the [`codec`] (the flat text format
//! of four integers per instruction, or a postcard binary image), the
//! [`builder`] or the [`assembler`]. The [`machine`] runs it and reports
//! every step to a [`trace::TraceSink`].

extern crate alloc;

use core::fmt;
use core::mem::transmute;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;
use variant_count::VariantCount;

pub mod assembler;
pub mod builder;
pub mod codec;
pub mod machine;
pub mod trace;

pub use machine::{
    run, run_with_config, ExecutionError, Fault, Machine, RunConfig, RunFailure, StepState,
    Termination,
};
pub use trace::{ExecutionTrace, InputSource, Snapshot, StepRecord, TraceSink};


pub type Word = i32;

pub const MAX_CODE_LENGTH: usize = 256;
pub const MAX_LEXI_LEVELS: usize = 4;
pub const REGISTER_COUNT: usize = 8;
pub const MAX_STACK_HEIGHT: usize = 64;

/// Modifiers the three SIO instructions must carry.
pub const WRITE_MODIFIER: Word = 1;
pub const READ_MODIFIER: Word = 2;
pub const HALT_MODIFIER: Word = 3;

#[repr(u8)]
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Lit = 1,
    Rtn,
    Lod,
    Sto,
    Cal,
    Inc,
    Jmp,
    Jpc,
    Write,
    Read,
    Halt,
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Odd,
    Mod,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

const FIRST_OPCODE: Word = Opcode::Lit as Word;
const LAST_OPCODE: Word = Opcode::Geq as Word;

const _: () =
    assert!(Opcode::VARIANT_COUNT == (Opcode::Geq as usize) - (Opcode::Lit as usize) + 1);

/// How an opcode reads its `R L M` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeGroup {
    /// `R` register, `L` level, `M` literal / target / offset.
    Transfer,
    /// SIO: `R` register, `M` fixed modifier.
    InputOutput,
    /// `R` destination, `L` and `M` operand registers.
    Arithmetic,
    /// Like arithmetic, result is 1 or 0.
    Comparison,
}

impl Opcode {
    pub const ALL: [Opcode; Opcode::VARIANT_COUNT] = [
        Opcode::Lit,
        Opcode::Rtn,
        Opcode::Lod,
        Opcode::Sto,
        Opcode::Cal,
        Opcode::Inc,
        Opcode::Jmp,
        Opcode::Jpc,
        Opcode::Write,
        Opcode::Read,
        Opcode::Halt,
        Opcode::Neg,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Odd,
        Opcode::Mod,
        Opcode::Eql,
        Opcode::Neq,
        Opcode::Lss,
        Opcode::Leq,
        Opcode::Gtr,
        Opcode::Geq,
    ];

    pub fn group(self) -> OpcodeGroup {
        match self {
            Opcode::Lit
            | Opcode::Rtn
            | Opcode::Lod
            | Opcode::Sto
            | Opcode::Cal
            | Opcode::Inc
            | Opcode::Jmp
            | Opcode::Jpc => OpcodeGroup::Transfer,
            Opcode::Write | Opcode::Read | Opcode::Halt => OpcodeGroup::InputOutput,
            Opcode::Neg
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Odd
            | Opcode::Mod => OpcodeGroup::Arithmetic,
            Opcode::Eql
            | Opcode::Neq
            | Opcode::Lss
            | Opcode::Leq
            | Opcode::Gtr
            | Opcode::Geq => OpcodeGroup::Comparison,
        }
    }

    /// The modifier an SIO instruction must carry, if any.
    pub fn required_modifier(self) -> Option<Word> {
        match self {
            Opcode::Write => Some(WRITE_MODIFIER),
            Opcode::Read => Some(READ_MODIFIER),
            Opcode::Halt => Some(HALT_MODIFIER),
            _ => None,
        }
    }

    /// True for opcodes whose `M` field is an index into the code segment.
    pub fn has_code_target(self) -> bool {
        matches!(self, Opcode::Cal | Opcode::Jmp | Opcode::Jpc)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Lit => "LIT",
            Opcode::Rtn => "RTN",
            Opcode::Lod => "LOD",
            Opcode::Sto => "STO",
            Opcode::Cal => "CAL",
            Opcode::Inc => "INC",
            Opcode::Jmp => "JMP",
            Opcode::Jpc => "JPC",
            Opcode::Write => "WRITE",
            Opcode::Read => "READ",
            Opcode::Halt => "HALT",
            Opcode::Neg => "NEG",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Odd => "ODD",
            Opcode::Mod => "MOD",
            Opcode::Eql => "EQL",
            Opcode::Neq => "NEQ",
            Opcode::Lss => "LSS",
            Opcode::Leq => "LEQ",
            Opcode::Gtr => "GTR",
            Opcode::Geq => "GEQ",
        }
    }

    /// Case-insensitive mnemonic lookup. The SIO spellings `SIO_W`,
    /// `SIO_R` and `SIO_H` are accepted for WRITE, READ and HALT.
    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        let alias = match text {
            t if t.eq_ignore_ascii_case("SIO_W") => Some(Opcode::Write),
            t if t.eq_ignore_ascii_case("SIO_R") => Some(Opcode::Read),
            t if t.eq_ignore_ascii_case("SIO_H") => Some(Opcode::Halt),
            _ => None,
        };
        alias.or_else(|| {
            Opcode::ALL
                .iter()
                .copied()
                .find(|op| op.mnemonic().eq_ignore_ascii_case(text))
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl From<Opcode> for Word {
    fn from(op: Opcode) -> Word {
        op as Word
    }
}

impl TryFrom<Word> for Opcode {
    type Error = MachineError;
    fn try_from(value: Word) -> Result<Self, Self::Error> {
        validate_opcode(value)
    }
}

/// Turn a raw integer into an opcode. Values outside the contiguous
/// `LIT..=GEQ` range are rejected, never coerced.
pub fn validate_opcode(raw: Word) -> Result<Opcode, MachineError> {
    if !(FIRST_OPCODE..=LAST_OPCODE).contains(&raw) {
        return Err(MachineError::InvalidOpcode(raw));
    }
    let Ok(byte) = u8::try_from(raw) else {
        return Err(MachineError::InvalidOpcode(raw));
    };

    // SAFETY: `Opcode` is `repr(u8)` with contiguous discriminants from
    // `Lit` to `Geq` (checked by the const assertion) and `byte` was just
    // range checked against them.
    let op = unsafe { transmute::<u8, Opcode>(byte) };
    Ok(op)
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("the value {0} is an invalid opcode")]
    InvalidOpcode(Word),
    #[error("{opcode} requires modifier {expected} but got {found}")]
    InvalidModifier {
        opcode: Opcode,
        expected: Word,
        found: Word,
    },
    #[error("stack address {index} is outside the live stack [0, {sp})")]
    AddressOutOfRange { index: i64, sp: usize },
    #[error("lexicographic level {0} is not active")]
    LevelOutOfRange(Word),
    #[error("stack pointer would leave [0, {}]", MAX_STACK_HEIGHT)]
    StackOverflow,
    #[error("return executed with no active call")]
    UnbalancedReturn,
    #[error("division by zero")]
    DivisionByZero,
    #[error("read executed with no input remaining")]
    InputExhausted,
    #[error("register {0} does not exist")]
    RegisterOutOfRange(Word),
    #[error("jump target {0} is negative")]
    InvalidJumpTarget(Word),
}

#[derive(Serialize, Deserialize)]
struct RawInstruction([Word; 4]);

/// One decoded `OP R L M` instruction. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInstruction", into = "RawInstruction")]
pub struct Instruction {
    opcode: Opcode,
    register: Word,
    level: Word,
    modifier: Word,
}

impl Instruction {
    pub const fn new(opcode: Opcode, register: Word, level: Word, modifier: Word) -> Self {
        Self {
            opcode,
            register,
            level,
            modifier,
        }
    }

    /// Build from the four integers of the bytecode format, validating
    /// only the opcode. Field ranges are checked when the instruction runs.
    pub fn from_words(words: [Word; 4]) -> Result<Self, MachineError> {
        let [opcode, register, level, modifier] = words;
        Ok(Self::new(validate_opcode(opcode)?, register, level, modifier))
    }

    pub fn to_words(&self) -> [Word; 4] {
        [
            Word::from(self.opcode),
            self.register,
            self.level,
            self.modifier,
        ]
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn register(&self) -> Word {
        self.register
    }

    pub fn level(&self) -> Word {
        self.level
    }

    pub fn modifier(&self) -> Word {
        self.modifier
    }

    pub(crate) fn with_modifier(self, modifier: Word) -> Self {
        Self { modifier, ..self }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.opcode, self.register, self.level, self.modifier
        )
    }
}

impl TryFrom<RawInstruction> for Instruction {
    type Error = MachineError;
    fn try_from(raw: RawInstruction) -> Result<Self, Self::Error> {
        Instruction::from_words(raw.0)
    }
}

impl From<Instruction> for RawInstruction {
    fn from(instruction: Instruction) -> Self {
        RawInstruction(instruction.to_words())
    }
}

/// The loaded program. Append-only while loading, read-only while running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSegment {
    instructions: Vec<Instruction, MAX_CODE_LENGTH>,
}

impl CodeSegment {
    pub const fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    /// Append an instruction, handing it back when the segment is full.
    pub fn push(&mut self, instruction: Instruction) -> Result<(), Instruction> {
        self.instructions.push(instruction)
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.instructions.is_full()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn as_slice(&self) -> &[Instruction] {
        self.instructions.as_slice()
    }
}

impl TryFrom<&[Instruction]> for CodeSegment {
    type Error = Instruction;
    fn try_from(instructions: &[Instruction]) -> Result<Self, Self::Error> {
        let mut code = CodeSegment::new();
        for instruction in instructions {
            code.push(*instruction)?;
        }
        Ok(code)
    }
}

impl<'a> IntoIterator for &'a CodeSegment {
    type Item = &'a Instruction;
    type IntoIter = core::slice::Iter<'a, Instruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod test;
