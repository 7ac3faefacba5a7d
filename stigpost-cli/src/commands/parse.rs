//! `stigpost parse` -- the worker.
//!
//! Ingests exactly one file. The job row carries the result; the exit code
//! only distinguishes "the worker did its job" from "the file failed".

use std::io::Write;

use serde::Serialize;
use tracing::info;

use stigpost_core::config::StigpostConfig;
use stigpost_core::types::JobState;
use stigpost_ingest::{WorkerOutcome, WorkerRequest, worker};

use crate::cli::ParseArgs;
use crate::commands::open_store;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `parse` command.
///
/// `COMPLETE` and `TERMINATED` exit 0; an `ERROR` job exits 1 after the
/// report has been written.
pub async fn execute(
    args: ParseArgs,
    config: StigpostConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let store = open_store(&config)?;
    let request = WorkerRequest {
        context_id: args.context_id,
        path: args.file,
        source: args.source,
        job_id: args.job_id,
        target_name: args.target_name,
        debug: args.debug,
    };
    info!(file = %request.path.display(), context_id = request.context_id, "parse requested");

    let outcome = tokio::task::spawn_blocking(move || worker::run(&store, &config, &request))
        .await
        .map_err(|e| CliError::Command(format!("worker task failed: {e}")))??;

    let report = ParseReport::from(outcome);
    writer.render(&report)?;

    match report.state {
        JobState::Error => Err(CliError::Command(format!(
            "job {} failed: {}",
            report.job_id, report.message
        ))),
        _ => Ok(()),
    }
}

/// Result of one worker run.
#[derive(Debug, Serialize)]
pub struct ParseReport {
    pub job_id: i64,
    pub scan_id: Option<i64>,
    pub source: String,
    pub state: JobState,
    pub message: String,
    pub hosts: u64,
    pub hosts_skipped: u64,
    pub findings: u64,
    pub pdis_created: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocated: Option<String>,
}

impl From<WorkerOutcome> for ParseReport {
    fn from(o: WorkerOutcome) -> Self {
        Self {
            job_id: o.job_id,
            scan_id: o.scan_id,
            source: o.source.as_str().to_owned(),
            state: o.state,
            message: o.message,
            hosts: o.stats.hosts,
            hosts_skipped: o.stats.hosts_skipped,
            findings: o.stats.findings,
            pdis_created: o.stats.pdis_created,
            relocated: o.relocated.map(|p| p.display().to_string()),
        }
    }
}

impl Render for ParseReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let state = match self.state {
            JobState::Complete => self.state.as_str().green().bold(),
            JobState::Terminated => self.state.as_str().yellow().bold(),
            _ => self.state.as_str().red().bold(),
        };
        writeln!(w, "Job {} ({}): {}", self.job_id, self.source, state)?;
        if let Some(scan_id) = self.scan_id {
            writeln!(w, "  Scan:      {scan_id}")?;
        }
        writeln!(
            w,
            "  Hosts:     {} ({} skipped)",
            self.hosts, self.hosts_skipped
        )?;
        writeln!(w, "  Findings:  {}", self.findings)?;
        writeln!(w, "  New PDIs:  {}", self.pdis_created)?;
        if let Some(path) = &self.relocated {
            writeln!(w, "  Moved to:  {path}")?;
        }
        if !self.message.is_empty() {
            writeln!(w, "  Message:   {}", self.message)?;
        }
        Ok(())
    }
}
