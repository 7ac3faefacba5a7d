//! `stigpost cancel` -- request termination of a queued or running job.
//!
//! Only the job row changes; the worker notices at its next cancellation
//! check, flags partial findings and moves the file to `terminated/`.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use stigpost_store::Store;

use crate::cli::CancelArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `cancel` command. A file with no running job is a command error.
pub fn execute(args: CancelArgs, store: &Store, writer: &OutputWriter) -> Result<(), CliError> {
    let report = cancel(store, args.context_id, &args.file)?;
    writer.render(&report)?;
    if !report.cancelled {
        return Err(CliError::Command(format!(
            "no queued or running job for {} in context {}",
            args.file, args.context_id
        )));
    }
    Ok(())
}

pub fn cancel(store: &Store, context_id: i64, file: &str) -> Result<CancelReport, CliError> {
    let cancelled = store.cancel_job(context_id, file)?;
    let job = store.latest_job(context_id, file)?;
    info!(context_id, file, cancelled, "cancel requested");
    Ok(CancelReport {
        context_id,
        file: file.to_owned(),
        cancelled,
        job_id: job.as_ref().map(|j| j.id),
        pid: job.and_then(|j| j.pid),
    })
}

#[derive(Debug, Serialize)]
pub struct CancelReport {
    pub context_id: i64,
    pub file: String,
    pub cancelled: bool,
    pub job_id: Option<i64>,
    pub pid: Option<u32>,
}

impl Render for CancelReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.cancelled {
            write!(w, "{} {}", "TERMINATED".yellow().bold(), self.file)?;
            if let Some(pid) = self.pid {
                write!(w, " (pid {pid})")?;
            }
            writeln!(w)
        } else {
            writeln!(w, "{} {} has no active job", "SKIPPED".dimmed(), self.file)
        }
    }
}
