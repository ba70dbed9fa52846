//! CLI entrypoint for the segalloc driver scenarios.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use segalloc_abi::with_global;
use segalloc_harness::scenarios::OVERSIZE_REQUEST;
use segalloc_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogEntry, LogLevel, Outcome, StreamKind, validate_log_file,
};
use segalloc_harness::{ChurnConfig, HarnessError, MisuseKind};

/// Driver scenarios for segalloc.
#[derive(Debug, Parser)]
#[command(name = "segalloc-harness")]
#[command(about = "Driver scenarios for the segalloc allocator")]
struct Cli {
    /// Write a JSONL log of the run to this path.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Write an artifact index with SHA-256 digests to this path.
    #[arg(long, global = true)]
    artifact_index: Option<PathBuf>,
    /// Run identifier used in trace ids.
    #[arg(long, global = true, default_value = "local")]
    run_id: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interleaved allocate/release cycles over random small sizes.
    Churn {
        #[arg(long, default_value_t = 1_500_000)]
        cycles: usize,
        /// Sizes are drawn from 1..=max-size.
        #[arg(long, default_value_t = 200)]
        max_size: u64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Read a file into an allocated buffer and check it as a C string.
    ReadFile {
        #[arg(long, default_value = "output")]
        path: PathBuf,
        /// Skip the final dealloc.
        #[arg(long)]
        leak: bool,
    },
    /// Release memory wrongly. The process is expected to abort.
    Crash {
        #[arg(long, value_enum)]
        kind: MisuseKind,
    },
    /// Request more than the maximum allocation and expect null.
    Oversize {
        #[arg(long, default_value_t = OVERSIZE_REQUEST)]
        size: u64,
    },
    /// Validate a JSONL log written by an earlier run.
    ValidateLog {
        #[arg(long)]
        input: PathBuf,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Churn { .. } => "churn",
            Self::ReadFile { .. } => "read-file",
            Self::Crash { .. } => "crash",
            Self::Oversize { .. } => "oversize",
            Self::ValidateLog { .. } => "validate-log",
        }
    }
}

fn run_scenario(command: &Command) -> Result<serde_json::Value, HarnessError> {
    match command {
        Command::Churn {
            cycles,
            max_size,
            seed,
        } => {
            let report = segalloc_harness::run_churn(&ChurnConfig {
                cycles: *cycles,
                max_size: *max_size,
                seed: *seed,
            })?;
            println!("Null allocs: {}", report.nulls);
            println!("Non-null allocs: {}", report.non_nulls);
            Ok(serde_json::to_value(report)?)
        }
        Command::ReadFile { path, leak } => {
            let report = segalloc_harness::read_file_round_trip(path, *leak)?;
            println!("success");
            Ok(serde_json::to_value(report)?)
        }
        Command::Crash { kind } => Err(segalloc_harness::provoke_misuse(*kind)),
        Command::Oversize { size } => {
            let report = segalloc_harness::probe_oversize(*size);
            if !report.null {
                return Err(HarnessError::OversizeAccepted { size: *size });
            }
            println!("alloc({size}) returned null");
            Ok(serde_json::to_value(report)?)
        }
        Command::ValidateLog { input } => validate(input),
    }
}

fn validate(input: &Path) -> Result<serde_json::Value, HarnessError> {
    let (lines, errors) = validate_log_file(input)?;
    for err in &errors {
        eprintln!("{err}");
    }
    if !errors.is_empty() {
        return Err(HarnessError::InvalidLog {
            path: input.to_path_buf(),
            lines,
            errors: errors.len(),
        });
    }
    println!("{lines} valid line(s)");
    Ok(serde_json::json!({ "lines": lines }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let scenario = cli.command.name();

    let mut emitter = match &cli.log {
        Some(path) => Some(LogEmitter::to_file(path, scenario, &cli.run_id)?),
        None => None,
    };
    if let Some(emitter) = emitter.as_mut() {
        emitter.emit(LogLevel::Info, "scenario_start")?;
        // A crash scenario never reaches the final flush.
        emitter.flush()?;
    }

    let started = Instant::now();
    let result = run_scenario(&cli.command);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Some(emitter) = emitter.as_mut() {
        let (records, stats) = with_global(|a| (a.drain_lifecycle_logs(), a.stats()));
        emitter.emit_lifecycle(&records)?;
        let (level, outcome, details) = match &result {
            Ok(details) => (LogLevel::Info, Outcome::Pass, details.clone()),
            Err(err) => (
                LogLevel::Error,
                Outcome::Fail,
                serde_json::json!({ "error": err.to_string() }),
            ),
        };
        emitter.emit_entry(
            LogEntry::new("", level, "scenario_end")
                .with_stream(StreamKind::Scenario)
                .with_outcome(outcome)
                .with_duration_ms(elapsed_ms)
                .with_counters(stats)
                .with_details(details),
        )?;
        emitter.flush()?;
    }

    if let Some(index_path) = &cli.artifact_index {
        let mut index = ArtifactIndex::new(&cli.run_id, scenario);
        if let Some(log) = &cli.log {
            index.add_file(log, "log")?;
        }
        if let Command::ReadFile { path, .. } = &cli.command {
            index.add_file(path, "input")?;
        }
        std::fs::write(index_path, index.to_json()?)?;
    }

    result.map_err(|err| err.to_string())?;
    Ok(())
}
