//! `pl0`: load PL0 virtual machine code and run it.
//!
//! Logging goes to standard error and is configured with `RUST_LOG`
//! (default `warn`). Standard output carries program output and the
//! listings selected with `-A`, `-L` and `-V`.

mod args;
mod input;
mod report;

use std::fs;
use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use pl0_machine::{Machine, RunConfig, codec};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::args::Cli;
use crate::input::{InputKind, InputWords};
use crate::report::{Destination, EchoSink, Outcome};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    let cli = match Cli::from_env() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let kind = InputKind::sniff(&cli.input, cli.interpret)?;
    let code = input::load(&cli.input, kind)?;
    info!(path = %cli.input.display(), instructions = code.len(), "code loaded");

    let lexemes = Destination::from_flags(cli.lexemes.as_ref(), cli.lexemes_stdout);
    if !lexemes.is_empty() {
        warn!("{kind} input has no lexeme list, -l/-L ignored");
    }

    let assembly = Destination::from_flags(cli.assembly.as_ref(), cli.assembly_stdout);
    if !assembly.is_empty() {
        report::emit(&assembly, &report::assembly_listing(&code))?;
    }

    if let Some(path) = &cli.binary {
        let image =
            codec::to_binary_vec(&code).map_err(|err| anyhow!("failed to encode code: {err}"))?;
        fs::write(path, image).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "binary image written");
    }

    let config = RunConfig {
        step_limit: cli.step_limit(),
    };
    let traces = Destination::from_flags(cli.trace.as_ref(), cli.trace_stdout);
    let mut machine = Machine::new();
    let mut sink = EchoSink::new(io::stdout(), !traces.is_empty());
    let mut words = InputWords::new(io::stdin().lock());

    sink.trace.begin(machine.snapshot());
    let result = machine.execute(&code, &mut words, &mut sink, &config);
    let (mut trace, _) = sink.into_inner();
    trace.finish(machine.snapshot(), result.as_ref().ok().copied());

    let outcome = match &result {
        Ok(termination) => Outcome::Finished(*termination),
        Err(err) => Outcome::Failed(err),
    };
    if !traces.is_empty() {
        report::emit(&traces, &report::execution_trace(&trace, outcome))?;
    }

    match result {
        Ok(termination) => {
            info!(?termination, executed = machine.executed(), "run finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            debug!(executed = machine.executed(), "run failed");
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
