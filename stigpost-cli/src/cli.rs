//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use stigpost_core::types::SourceType;

/// Stigpost -- scan result ingestion and finding deconfliction.
///
/// Use `stigpost <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "stigpost", version, about, long_about = None)]
pub struct Cli {
    /// Path to the stigpost.toml configuration file.
    #[arg(short, long, global = true, default_value = "stigpost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one scan file into an assessment context (the worker).
    Parse(ParseArgs),

    /// Print the detected source type of each file.
    Classify(ClassifyArgs),

    /// List job rows of an assessment context.
    Jobs(JobsArgs),

    /// Ask a running worker to stop.
    Cancel(CancelArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- parse ----

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Scan file to ingest.
    #[arg(short, long)]
    pub file: PathBuf,

    /// Assessment context id.
    #[arg(long = "context")]
    pub context_id: i64,

    /// Skip classification and parse as this type (nessus, scc, ckl, nmap-xml, ...).
    #[arg(long, value_parser = parse_source)]
    pub source: Option<SourceType>,

    /// Asset name forced onto single-host files.
    #[arg(long)]
    pub target_name: Option<String>,

    /// Verbose logging; the file is not moved afterwards.
    #[arg(long)]
    pub debug: bool,

    /// Job row prepared by the orchestrator.
    #[arg(long, hide = true)]
    pub job_id: Option<i64>,
}

fn parse_source(s: &str) -> Result<SourceType, String> {
    match SourceType::from_str_loose(s) {
        Some(SourceType::Unsupported) | None => Err(format!(
            "unknown source type '{s}' (expected one of: {})",
            SourceType::SUPPORTED
                .iter()
                .map(SourceType::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Some(source) => Ok(source),
    }
}

// ---- classify ----

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Files to classify.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

// ---- jobs ----

#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Assessment context id.
    #[arg(long = "context")]
    pub context_id: i64,

    /// Only jobs that are still queued or running.
    #[arg(long)]
    pub active: bool,
}

// ---- cancel ----

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Assessment context id.
    #[arg(long = "context")]
    pub context_id: i64,

    /// File name of the job, as recorded in the job table.
    #[arg(long)]
    pub file: String,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file.
    Validate,

    /// Show the effective configuration.
    Show {
        /// Only this section (general, store, orchestrator, ingest, deconfliction).
        #[arg(long)]
        section: Option<String>,
    },
}
