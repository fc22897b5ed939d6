//! Persisted forms of a [`CodeSegment`].
//!
//! The text form is whitespace separated decimal integers, four per
//! instruction in the order opcode, register, level, modifier. There is no
//! header: the instruction count is the number of integers divided by four.
//!
//! The binary form is a postcard image of the same four integers per
//! instruction. Opcodes are validated again when an image is loaded.

use alloc::vec::Vec;
use core::fmt;
use thiserror_no_std::Error;
use tracing::debug;

use crate::{CodeSegment, Instruction, MAX_CODE_LENGTH, MachineError, Word};

const FIELDS: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("stream ends inside instruction {index} ({fields} of 4 fields present)")]
    TruncatedStream { index: usize, fields: usize },
    #[error("more than {} instructions supplied", MAX_CODE_LENGTH)]
    CapacityExceeded,
    #[error("instruction {index}: {error}")]
    InvalidInstruction { index: usize, error: MachineError },
    #[error("token {position} is not a decimal integer")]
    InvalidNumber { position: usize },
    #[error("binary image: {0}")]
    Binary(#[from] postcard::Error),
}

/// Build a code segment from a flat stream of integers.
///
/// Either the whole stream loads or nothing does.
pub fn decode<I>(words: I) -> Result<CodeSegment, CodecError>
where
    I: IntoIterator<Item = Word>,
{
    decode_fallible(words.into_iter().map(Ok))
}

/// Parse the text form.
pub fn parse_text(text: &str) -> Result<CodeSegment, CodecError> {
    let tokens = text
        .split_whitespace()
        .enumerate()
        .map(|(position, token)| {
            token
                .parse::<Word>()
                .map_err(|_| CodecError::InvalidNumber { position })
        });
    decode_fallible(tokens)
}

fn decode_fallible<I>(words: I) -> Result<CodeSegment, CodecError>
where
    I: Iterator<Item = Result<Word, CodecError>>,
{
    let mut code = CodeSegment::new();
    let mut group: [Word; FIELDS] = [0; FIELDS];
    let mut fields = 0usize;

    for word in words {
        let word = word?;
        if code.is_full() {
            return Err(CodecError::CapacityExceeded);
        }
        if let Some(slot) = group.get_mut(fields) {
            *slot = word;
        }
        fields = fields.saturating_add(1);
        if fields < FIELDS {
            continue;
        }

        let index = code.len();
        let instruction = Instruction::from_words(group)
            .map_err(|error| CodecError::InvalidInstruction { index, error })?;
        code.push(instruction)
            .map_err(|_| CodecError::CapacityExceeded)?;
        fields = 0;
    }

    if fields != 0 {
        return Err(CodecError::TruncatedStream {
            index: code.len(),
            fields,
        });
    }

    debug!(instructions = code.len(), "decoded code segment");
    Ok(code)
}

/// The flat integer stream for `code`, exactly four words per instruction.
pub fn encode(code: &CodeSegment) -> impl Iterator<Item = Word> + '_ {
    code.iter().flat_map(|instruction| instruction.to_words())
}

/// Write the text form, one instruction per line.
pub fn write_text<W: fmt::Write>(code: &CodeSegment, out: &mut W) -> fmt::Result {
    for instruction in code {
        let [opcode, register, level, modifier] = instruction.to_words();
        writeln!(out, "{opcode} {register} {level} {modifier}")?;
    }
    Ok(())
}

/// Serialize into `buffer`, returning the used part.
pub fn to_binary<'a>(code: &CodeSegment, buffer: &'a mut [u8]) -> Result<&'a mut [u8], CodecError> {
    Ok(postcard::to_slice(code, buffer)?)
}

pub fn to_binary_vec(code: &CodeSegment) -> Result<Vec<u8>, CodecError> {
    Ok(postcard::to_allocvec(code)?)
}

pub fn from_binary(bytes: &[u8]) -> Result<CodeSegment, CodecError> {
    let code: CodeSegment = postcard::from_bytes(bytes)?;
    debug!(instructions = code.len(), "loaded binary code segment");
    Ok(code)
}
