use heapless::Vec;
use thiserror_no_std::Error;

use crate::{
    CodeSegment, Instruction, MAX_CODE_LENGTH, MAX_LEXI_LEVELS, Opcode, OpcodeGroup,
    REGISTER_COUNT, Word,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("the code segment is full")]
    CodeFull,
    #[error("register {0} does not exist")]
    RegisterOutOfRange(Word),
    #[error("level {0} is outside the lexicographic levels")]
    LevelOutOfRange(Word),
    #[error("{opcode} must carry modifier {expected}, not {found}")]
    InvalidModifier {
        opcode: Opcode,
        expected: Word,
        found: Word,
    },
    #[error("{0} does not take three register operands")]
    NotRegisterForm(Opcode),
    #[error("instruction {0} has not been emitted")]
    UnknownInstruction(usize),
    #[error("instruction {0} has no code target")]
    NotAJump(usize),
    #[error("instruction {at} targets {target}, which is negative")]
    NegativeTarget { at: usize, target: Word },
}

/// Index of an emitted instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeIndex(usize);

impl CodeIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn to_usize(&self) -> usize {
        self.0
    }

    pub fn to_word(&self) -> Word {
        // MAX_CODE_LENGTH keeps indices far below Word::MAX.
        Word::try_from(self.0).unwrap_or(Word::MAX)
    }
}

/// Typed form of every instruction, with the operands named by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Lit { register: Word, value: Word },
    Rtn,
    Lod { register: Word, level: Word, offset: Word },
    Sto { register: Word, level: Word, offset: Word },
    Cal { level: Word, target: Word },
    Inc { amount: Word },
    Jmp { target: Word },
    Jpc { register: Word, target: Word },
    Write { register: Word },
    Read { register: Word },
    Halt,
    Neg { register: Word },
    Odd { register: Word },
    /// ADD SUB MUL DIV MOD and the comparisons: `dest := lhs op rhs`.
    Registers {
        opcode: Opcode,
        dest: Word,
        lhs: Word,
        rhs: Word,
    },
}

impl Op {
    pub fn instruction(&self) -> Instruction {
        match *self {
            Op::Lit { register, value } => Instruction::new(Opcode::Lit, register, 0, value),
            Op::Rtn => Instruction::new(Opcode::Rtn, 0, 0, 0),
            Op::Lod {
                register,
                level,
                offset,
            } => Instruction::new(Opcode::Lod, register, level, offset),
            Op::Sto {
                register,
                level,
                offset,
            } => Instruction::new(Opcode::Sto, register, level, offset),
            Op::Cal { level, target } => Instruction::new(Opcode::Cal, 0, level, target),
            Op::Inc { amount } => Instruction::new(Opcode::Inc, 0, 0, amount),
            Op::Jmp { target } => Instruction::new(Opcode::Jmp, 0, 0, target),
            Op::Jpc { register, target } => Instruction::new(Opcode::Jpc, register, 0, target),
            Op::Write { register } => {
                Instruction::new(Opcode::Write, register, 0, crate::WRITE_MODIFIER)
            }
            Op::Read { register } => {
                Instruction::new(Opcode::Read, register, 0, crate::READ_MODIFIER)
            }
            Op::Halt => Instruction::new(Opcode::Halt, 0, 0, crate::HALT_MODIFIER),
            Op::Neg { register } => Instruction::new(Opcode::Neg, register, 0, 0),
            Op::Odd { register } => Instruction::new(Opcode::Odd, register, 0, 0),
            Op::Registers {
                opcode,
                dest,
                lhs,
                rhs,
            } => Instruction::new(opcode, dest, lhs, rhs),
        }
    }
}

/// Emits instructions for a code segment, the way a code generator would.
///
/// Forward jumps are emitted with a placeholder target and fixed later
/// with [`CodeBuilder::patch_target`].
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instruction, MAX_CODE_LENGTH>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    /// Where the next instruction will land.
    pub fn next_index(&self) -> CodeIndex {
        CodeIndex(self.instructions.len())
    }

    pub fn add_op(&mut self, op: Op) -> Result<CodeIndex, BuildError> {
        if let Op::Registers { opcode, .. } = op {
            if matches!(opcode, Opcode::Neg | Opcode::Odd)
                || !matches!(
                    opcode.group(),
                    OpcodeGroup::Arithmetic | OpcodeGroup::Comparison
                )
            {
                return Err(BuildError::NotRegisterForm(opcode));
            }
        }
        self.add_instruction(op.instruction())
    }

    /// Emit an already formed instruction after checking its operands.
    pub fn add_instruction(&mut self, instruction: Instruction) -> Result<CodeIndex, BuildError> {
        check_operands(&instruction)?;
        let index = self.next_index();
        self.instructions
            .push(instruction)
            .map_err(|_| BuildError::CodeFull)?;
        Ok(index)
    }

    /// Point the CAL, JMP or JPC at `at` to `target`.
    pub fn patch_target(&mut self, at: CodeIndex, target: CodeIndex) -> Result<(), BuildError> {
        let Some(slot) = self.instructions.get_mut(at.0) else {
            return Err(BuildError::UnknownInstruction(at.0));
        };
        if !slot.opcode().has_code_target() {
            return Err(BuildError::NotAJump(at.0));
        }
        *slot = slot.with_modifier(target.to_word());
        Ok(())
    }

    /// Check every code target and hand over the finished segment. Targets
    /// past the end are allowed; jumping there ends the run.
    pub fn finish(self) -> Result<CodeSegment, BuildError> {
        let mut code = CodeSegment::new();
        for (at, instruction) in self.instructions.iter().enumerate() {
            if instruction.opcode().has_code_target() && instruction.modifier() < 0 {
                return Err(BuildError::NegativeTarget {
                    at,
                    target: instruction.modifier(),
                });
            }
            code.push(*instruction).map_err(|_| BuildError::CodeFull)?;
        }
        Ok(code)
    }
}

fn check_register(register: Word) -> Result<(), BuildError> {
    match usize::try_from(register) {
        Ok(index) if index < REGISTER_COUNT => Ok(()),
        _ => Err(BuildError::RegisterOutOfRange(register)),
    }
}

fn check_level(level: Word, limit: usize) -> Result<(), BuildError> {
    match usize::try_from(level) {
        Ok(index) if index < limit => Ok(()),
        _ => Err(BuildError::LevelOutOfRange(level)),
    }
}

fn check_operands(instruction: &Instruction) -> Result<(), BuildError> {
    let opcode = instruction.opcode();
    let register = instruction.register();
    let level = instruction.level();
    let modifier = instruction.modifier();

    if let Some(expected) = opcode.required_modifier() {
        if expected != modifier {
            return Err(BuildError::InvalidModifier {
                opcode,
                expected,
                found: modifier,
            });
        }
    }

    match opcode {
        Opcode::Lit | Opcode::Jpc | Opcode::Write | Opcode::Read | Opcode::Neg | Opcode::Odd => {
            check_register(register)
        }
        Opcode::Lod | Opcode::Sto => {
            check_register(register)?;
            check_level(level, MAX_LEXI_LEVELS)
        }
        // The callee runs one level below `level`.
        Opcode::Cal => check_level(level, MAX_LEXI_LEVELS.saturating_sub(1)),
        Opcode::Rtn | Opcode::Inc | Opcode::Jmp | Opcode::Halt => Ok(()),
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Eql
        | Opcode::Neq
        | Opcode::Lss
        | Opcode::Leq
        | Opcode::Gtr
        | Opcode::Geq => {
            check_register(register)?;
            check_register(level)?;
            check_register(modifier)
        }
    }
}
