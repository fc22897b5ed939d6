use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use pl0_machine::{CodeSegment, Word, codec};
use tracing::{debug, warn};

pub const EXTENSION_PL0: &str = ".PL0";
pub const EXTENSION_SYM: &str = ".PL0_SYM";
pub const EXTENSION_VM: &str = ".PL0_VM";
pub const EXTENSION_BIN: &str = ".PL0_BIN";
pub const EXTENSION_TXT: &str = ".txt";

/// What an input file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// PL0 program text.
    Source,
    /// Lexeme list produced by the tokenizer.
    Symbols,
    /// Bytecode text, four integers per instruction.
    Bytecode,
    /// Postcard image written with `-b`.
    Binary,
}

impl InputKind {
    pub fn extension(self) -> &'static str {
        match self {
            InputKind::Source => EXTENSION_PL0,
            InputKind::Symbols => EXTENSION_SYM,
            InputKind::Bytecode => EXTENSION_VM,
            InputKind::Binary => EXTENSION_BIN,
        }
    }

    /// Exact, case-sensitive match on a dotted extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            EXTENSION_PL0 => Some(InputKind::Source),
            EXTENSION_SYM => Some(InputKind::Symbols),
            EXTENSION_VM => Some(InputKind::Bytecode),
            EXTENSION_BIN => Some(InputKind::Binary),
            _ => None,
        }
    }

    /// Value parser for `-i`. The leading dot may be left out.
    pub fn from_extension_arg(arg: &str) -> Result<Self, String> {
        let dotted = if arg.starts_with('.') {
            arg.to_string()
        } else {
            format!(".{arg}")
        };
        InputKind::from_extension(&dotted).ok_or_else(|| {
            format!(
                "expected one of {EXTENSION_PL0}, {EXTENSION_SYM}, {EXTENSION_VM}, {EXTENSION_BIN}"
            )
        })
    }

    /// Decide how to read `path`. The real extension wins for the dedicated
    /// PL0 extensions; `.txt` and unknown extensions take `interpret`, and a
    /// `.txt` without it is PL0 source.
    pub fn sniff(path: &Path, interpret: Option<InputKind>) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"));

        if let Some(kind) = extension.as_deref().and_then(InputKind::from_extension) {
            if let Some(forced) = interpret.filter(|forced| *forced != kind) {
                warn!(
                    path = %path.display(),
                    ignored = forced.extension(),
                    "-i only applies to {EXTENSION_TXT} inputs"
                );
            }
            return Ok(kind);
        }

        match (extension.as_deref(), interpret) {
            (_, Some(kind)) => Ok(kind),
            (Some(EXTENSION_TXT), None) => Ok(InputKind::Source),
            (Some(other), None) => bail!(
                "unrecognized extension `{other}` on {}, use -i to say how to read it",
                path.display()
            ),
            (None, None) => bail!(
                "{} has no extension, use -i to say how to read it",
                path.display()
            ),
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Read `path` as `kind` into a code segment.
pub fn load(path: &Path, kind: InputKind) -> Result<CodeSegment> {
    debug!(path = %path.display(), %kind, "loading input");
    match kind {
        InputKind::Bytecode => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            codec::parse_text(&text)
                .map_err(|err| anyhow!("failed to decode bytecode in {}: {err}", path.display()))
        }
        InputKind::Binary => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            codec::from_binary(&bytes)
                .map_err(|err| anyhow!("failed to load binary image {}: {err}", path.display()))
        }
        InputKind::Source | InputKind::Symbols => bail!(
            "{} is {kind} input, which needs the PL0 compiler front end; \
             only {EXTENSION_VM} and {EXTENSION_BIN} code can be run",
            path.display()
        ),
    }
}

/// Values for READ, taken a line at a time from a reader. The first token
/// that is not an integer ends the input, so the READ that would take it
/// fails with `InputExhausted`.
pub struct InputWords<R> {
    reader: R,
    pending: VecDeque<Word>,
    line: String,
    ended: bool,
}

impl<R: BufRead> InputWords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            line: String::new(),
            ended: false,
        }
    }
}

impl<R: BufRead> Iterator for InputWords<R> {
    type Item = Word;

    fn next(&mut self) -> Option<Word> {
        loop {
            if let Some(word) = self.pending.pop_front() {
                return Some(word);
            }
            if self.ended {
                return None;
            }
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.ended = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "failed to read program input");
                    return None;
                }
            }
            for token in self.line.split_whitespace() {
                match token.parse::<Word>() {
                    Ok(word) => self.pending.push_back(word),
                    Err(_) => {
                        warn!(token, "program input is not an integer, no more input");
                        self.ended = true;
                        break;
                    }
                }
            }
        }
    }
}
