//! Command line surface.
//!
//! ```text
//! pl0 <FILE> [-a [file] | -A] [-l [file] | -L] [-v [file] | -V]
//!            [-b [file]] [-i <.ext> | -interpret <.ext>] [-s <steps>]
//! ```
//!
//! Every flag needs its own dash: `-aV` is rejected instead of being read
//! as `-a -V`.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::input::InputKind;

pub const DEFAULT_ASSEMBLY_FILE: &str = "PL0_assembly.txt";
pub const DEFAULT_LEXEME_FILE: &str = "PL0_lexemes.txt";
pub const DEFAULT_TRACE_FILE: &str = "PL0_execution.txt";
pub const DEFAULT_BINARY_FILE: &str = "PL0_bytecode.bin";
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "pl0")]
#[command(about = "Load and run PL0 virtual machine code")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Input file: .PL0, .PL0_SYM, .PL0_VM, .PL0_BIN or .txt
    pub input: PathBuf,

    /// Write the assembly listing to a file
    #[arg(short = 'a', num_args = 0..=1, value_name = "FILE",
          default_missing_value = DEFAULT_ASSEMBLY_FILE)]
    pub assembly: Option<PathBuf>,

    /// Write the assembly listing to standard output
    #[arg(short = 'A')]
    pub assembly_stdout: bool,

    /// Write the lexeme listing to a file
    #[arg(short = 'l', num_args = 0..=1, value_name = "FILE",
          default_missing_value = DEFAULT_LEXEME_FILE)]
    pub lexemes: Option<PathBuf>,

    /// Write the lexeme listing to standard output
    #[arg(short = 'L')]
    pub lexemes_stdout: bool,

    /// Write the execution trace to a file
    #[arg(short = 'v', num_args = 0..=1, value_name = "FILE",
          default_missing_value = DEFAULT_TRACE_FILE)]
    pub trace: Option<PathBuf>,

    /// Write the execution trace to standard output
    #[arg(short = 'V')]
    pub trace_stdout: bool,

    /// Write the loaded code as a binary image
    #[arg(short = 'b', num_args = 0..=1, value_name = "FILE",
          default_missing_value = DEFAULT_BINARY_FILE)]
    pub binary: Option<PathBuf>,

    /// Read a .txt input as the given kind (.PL0, .PL0_SYM, .PL0_VM, .PL0_BIN)
    #[arg(short = 'i', long = "interpret", value_name = "EXT",
          value_parser = InputKind::from_extension_arg)]
    pub interpret: Option<InputKind>,

    /// Maximum number of instructions to execute, 0 for no limit
    #[arg(short = 's', long = "steps", value_name = "STEPS",
          default_value_t = DEFAULT_STEP_LIMIT)]
    pub steps: u64,
}

impl Cli {
    /// Parse the process arguments. Usage, help and clap's own errors
    /// exit the process the usual clap way.
    pub fn from_env() -> Result<Self> {
        Self::parse_args(std::env::args_os()).map_err(|err| match err.downcast::<clap::Error>() {
            Ok(clap_err) => clap_err.exit(),
            Err(err) => err,
        })
    }

    pub fn parse_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args = normalize(args)?;
        Ok(Self::try_parse_from(args)?)
    }

    pub fn step_limit(&self) -> Option<u64> {
        (self.steps != 0).then_some(self.steps)
    }
}

/// Rewrite `-interpret` to `--interpret` and refuse clustered short
/// flags. The program name is passed through untouched.
pub fn normalize<I, T>(args: I) -> Result<Vec<OsString>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    for (position, arg) in args.into_iter().map(Into::into).enumerate() {
        if position == 0 {
            out.push(arg);
            continue;
        }
        let Some(text) = arg.to_str() else {
            out.push(arg);
            continue;
        };
        if text == "-interpret" {
            out.push(OsString::from("--interpret"));
            continue;
        }
        let is_short = text.starts_with('-') && !text.starts_with("--");
        if is_short && text.len() > 2 && !is_negative_number(text) {
            bail!("flags cannot be combined or given inline values: `{text}`, pass each with its own `-`");
        }
        out.push(arg);
    }
    Ok(out)
}

fn is_negative_number(text: &str) -> bool {
    text.strip_prefix('-')
        .is_some_and(|digits| digits.chars().all(|c| c.is_ascii_digit()))
}
