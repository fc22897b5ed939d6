//! Listings and execution traces written for `-a/-A` and `-v/-V`.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use pl0_machine::assembler::write_listing;
use pl0_machine::{
    CodeSegment, ExecutionError, ExecutionTrace, Snapshot, StepRecord, Termination, TraceSink,
    Word,
};
use tracing::{debug, warn};

/// Where a report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// Destinations selected by a `-x [file]` / `-X` flag pair.
    pub fn from_flags(file: Option<&PathBuf>, stdout: bool) -> Vec<Destination> {
        let mut out = Vec::new();
        if let Some(path) = file {
            out.push(Destination::File(path.clone()));
        }
        if stdout {
            out.push(Destination::Stdout);
        }
        out
    }
}

pub fn emit(destinations: &[Destination], text: &str) -> Result<()> {
    for destination in destinations {
        match destination {
            Destination::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|()| stdout.flush())
                    .context("failed to write to standard output")?;
            }
            Destination::File(path) => {
                fs::write(path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                debug!(path = %path.display(), "report written");
            }
        }
    }
    Ok(())
}

pub fn assembly_listing(code: &CodeSegment) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_listing(code, &mut out);
    out
}

/// How the run ended, for the last line of the trace.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Finished(Termination),
    Failed(&'a ExecutionError),
}

pub fn execution_trace(trace: &ExecutionTrace, outcome: Outcome<'_>) -> String {
    let mut out = String::new();
    let _ = write_trace(&mut out, trace, outcome);
    out
}

pub fn write_trace<W: fmt::Write>(
    out: &mut W,
    trace: &ExecutionTrace,
    outcome: Outcome<'_>,
) -> fmt::Result {
    writeln!(
        out,
        "{:>5} {:>4}  {:<18} | {:>3} {:>3} {:>3} | registers | stack",
        "step", "pc", "instruction", "pc", "bp", "sp"
    )?;
    if let Some(initial) = &trace.initial {
        write!(out, "{:>5} {:>4}  {:<18} ", "", "", "initial")?;
        write_state(out, initial)?;
    }
    for record in &trace.steps {
        write_step(out, record)?;
    }

    write!(out, "output:")?;
    for value in &trace.output {
        write!(out, " {value}")?;
    }
    writeln!(out)?;

    match outcome {
        Outcome::Finished(Termination::Halted) => writeln!(out, "halted"),
        Outcome::Finished(Termination::EndOfCode) => writeln!(out, "end of code"),
        Outcome::Failed(error) => writeln!(out, "error: {error}"),
    }
}

fn write_step<W: fmt::Write>(out: &mut W, record: &StepRecord) -> fmt::Result {
    let instruction = record.instruction;
    write!(
        out,
        "{:>5} {:>4}  {:<5} {:>3} {:>3} {:>5} ",
        record.step,
        record.pc,
        instruction.opcode().mnemonic(),
        instruction.register(),
        instruction.level(),
        instruction.modifier()
    )?;
    write_state(out, &record.state)
}

fn write_state<W: fmt::Write>(out: &mut W, state: &Snapshot) -> fmt::Result {
    write!(out, "| {:>3} {:>3} {:>3} |", state.pc, state.bp, state.sp)?;
    for register in state.registers {
        write!(out, " {register}")?;
    }
    write!(out, " |")?;
    for value in state.live_stack() {
        write!(out, " {value}")?;
    }
    writeln!(out)
}

/// Records the run and echoes WRITE output as it happens. Step records are
/// kept only when `record_steps` is set; output is always kept.
pub struct EchoSink<W: Write> {
    pub trace: ExecutionTrace,
    out: W,
    record_steps: bool,
}

impl<W: Write> EchoSink<W> {
    pub fn new(out: W, record_steps: bool) -> Self {
        Self {
            trace: ExecutionTrace::new(),
            out,
            record_steps,
        }
    }

    pub fn into_inner(self) -> (ExecutionTrace, W) {
        (self.trace, self.out)
    }
}

impl<W: Write> TraceSink for EchoSink<W> {
    fn record_step(&mut self, record: &StepRecord) {
        if self.record_steps {
            self.trace.record_step(record);
        }
    }

    fn write_output(&mut self, value: Word) {
        self.trace.write_output(value);
        if let Err(err) = writeln!(self.out, "{value}").and_then(|()| self.out.flush()) {
            warn!(%err, value, "failed to echo program output");
        }
    }
}
