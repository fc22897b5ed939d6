// Line oriented assembler for the mnemonic form of PL0 code:
//
//     ; comment
//     loop:
//     LIT  0 0 3
//     JPC  1 0 done
//
// Every instruction line is exactly `MNEMONIC R L M`. Labels sit alone on
// their line and may stand in for `M` in CAL, JMP and JPC.

use core::fmt;
use heapless::{String, Vec};
use thiserror_no_std::Error;

use crate::builder::{BuildError, CodeBuilder, CodeIndex};
use crate::{CodeSegment, Instruction, Opcode, Word};

const MAX_TOKENS: usize = 4;
const NAME_CAP: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("{0}")]
    Kind(AssemblerErrorKind),
    #[error("line {line}: {kind}")]
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerErrorKind {
    #[error("too many tokens")]
    TooManyTokens,
    #[error("expected `MNEMONIC R L M`")]
    WrongOperandCount,
    #[error("unknown mnemonic")]
    InvalidInstruction,
    #[error("invalid number")]
    InvalidNumber,
    #[error("name too long")]
    NameTooLong,
    #[error("label defined twice")]
    DuplicateLabel,
    #[error("too many labels")]
    MaxLabelsExceeded,
    #[error("unknown label")]
    UnknownLabel,
    #[error("a label can only stand in for a CAL, JMP or JPC target")]
    LabelNotAllowed,
    #[error("line number overflow")]
    LineNumberOverflow,
    #[error("{0}")]
    Builder(BuildError),
}

impl From<BuildError> for AssemblerError {
    fn from(err: BuildError) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Builder(err))
    }
}

#[derive(Clone)]
struct Label {
    name: String<NAME_CAP>,
    offset: CodeIndex,
}

struct Fixup {
    name: String<NAME_CAP>,
    at: CodeIndex,
    line: u32,
}

pub struct Assembler<const LABEL_CAP: usize> {
    builder: CodeBuilder,
    labels: Vec<Label, LABEL_CAP>,
    fixups: Vec<Fixup, LABEL_CAP>,
    line_number: u32,
}

impl<const LABEL_CAP: usize> Assembler<LABEL_CAP> {
    pub fn new() -> Self {
        Self {
            builder: CodeBuilder::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            line_number: 0,
        }
    }

    pub fn add_line(&mut self, line: &str) -> Result<(), AssemblerError> {
        self.line_number = self
            .line_number
            .checked_add(1)
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::LineNumberOverflow))?;
        let line_number = self.line_number;
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }

        let mut tokens: Vec<&str, MAX_TOKENS> = Vec::new();
        for token in line.split_whitespace() {
            tokens.push(token).map_err(|_| {
                AssemblerError::Kind(AssemblerErrorKind::TooManyTokens).with_line(line_number)
            })?;
        }

        if let [label] = tokens.as_slice() {
            if let Some(name) = label.strip_suffix(':') {
                return self.add_label(name).map_err(|err| err.with_line(line_number));
            }
        }

        self.handle_instruction(&tokens, line_number)
            .map_err(|err| err.with_line(line_number))
    }

    /// Resolve forward references and return the code.
    pub fn finish(mut self) -> Result<CodeSegment, AssemblerError> {
        while let Some(fixup) = self.fixups.pop() {
            let label = self
                .labels
                .iter()
                .find(|label| label.name == fixup.name)
                .ok_or(
                    AssemblerError::Kind(AssemblerErrorKind::UnknownLabel).with_line(fixup.line),
                )?;
            self.builder
                .patch_target(fixup.at, label.offset)
                .map_err(|err| AssemblerError::from(err).with_line(fixup.line))?;
        }
        Ok(self.builder.finish()?)
    }

    fn add_label(&mut self, name: &str) -> Result<(), AssemblerError> {
        let name = to_name(name)?;
        if self.labels.iter().any(|label| label.name == name) {
            return Err(AssemblerError::Kind(AssemblerErrorKind::DuplicateLabel));
        }
        let offset = self.builder.next_index();
        self.labels
            .push(Label { name, offset })
            .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::MaxLabelsExceeded))?;
        Ok(())
    }

    fn handle_instruction(&mut self, tokens: &[&str], line: u32) -> Result<(), AssemblerError> {
        let [mnemonic, register, level, modifier] = tokens else {
            return Err(AssemblerError::Kind(AssemblerErrorKind::WrongOperandCount));
        };
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::InvalidInstruction))?;
        let register = parse_word(register)?;
        let level = parse_word(level)?;

        let modifier = match parse_word(modifier) {
            Ok(value) => value,
            Err(_) if opcode.has_code_target() => self.resolve_target(modifier, line)?,
            Err(_) if is_name(modifier) => {
                return Err(AssemblerError::Kind(AssemblerErrorKind::LabelNotAllowed));
            }
            Err(err) => return Err(err),
        };

        self.builder
            .add_instruction(Instruction::new(opcode, register, level, modifier))?;
        Ok(())
    }

    /// Target of a label already seen, or a placeholder patched by `finish`.
    fn resolve_target(&mut self, token: &str, line: u32) -> Result<Word, AssemblerError> {
        let name = to_name(token)?;
        if let Some(label) = self.labels.iter().find(|label| label.name == name) {
            return Ok(label.offset.to_word());
        }
        let at = self.builder.next_index();
        self.fixups
            .push(Fixup { name, at, line })
            .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::MaxLabelsExceeded))?;
        Ok(0)
    }
}

impl<const LABEL_CAP: usize> Default for Assembler<LABEL_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble a whole source text.
pub fn assemble<const LABEL_CAP: usize>(source: &str) -> Result<CodeSegment, AssemblerError> {
    let mut asm: Assembler<LABEL_CAP> = Assembler::new();
    for line in source.lines() {
        asm.add_line(line)?;
    }
    asm.finish()
}

/// Numbered mnemonic listing of `code`. The output assembles back to the
/// same code since the index sits in a comment.
pub fn write_listing<W: fmt::Write>(code: &CodeSegment, out: &mut W) -> fmt::Result {
    for (index, instruction) in code.iter().enumerate() {
        writeln!(
            out,
            "{:<5} {:>3} {:>3} {:>5}    ; {:>3}",
            instruction.opcode().mnemonic(),
            instruction.register(),
            instruction.level(),
            instruction.modifier(),
            index
        )?;
    }
    Ok(())
}

fn parse_word(token: &str) -> Result<Word, AssemblerError> {
    let invalid = || AssemblerError::Kind(AssemblerErrorKind::InvalidNumber);
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let Some(hex) = digits.strip_prefix("0x") else {
        // Decimal keeps its sign so i32::MIN parses.
        return token.parse::<Word>().map_err(|_| invalid());
    };
    if !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(hex, 16).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    Word::try_from(value).map_err(|_| invalid())
}

fn strip_comment(line: &str) -> &str {
    match line.split(';').next() {
        Some(part) => part,
        None => line,
    }
}

fn is_name(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn to_name(name: &str) -> Result<String<NAME_CAP>, AssemblerError> {
    let mut out: String<NAME_CAP> = String::new();
    out.push_str(name)
        .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::NameTooLong))?;
    Ok(out)
}
