//! `stigpost jobs` -- job table of one assessment context.

use std::io::Write;

use serde::Serialize;

use stigpost_core::types::JobState;
use stigpost_store::{JobRecord, Store};

use crate::cli::JobsArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `jobs` command.
pub fn execute(args: JobsArgs, store: &Store, writer: &OutputWriter) -> Result<(), CliError> {
    let report = collect(store, args.context_id, args.active)?;
    writer.render(&report)
}

pub fn collect(store: &Store, context_id: i64, active_only: bool) -> Result<JobsReport, CliError> {
    let jobs = if active_only {
        store.active_jobs(context_id)?
    } else {
        store.list_jobs(context_id)?
    };
    Ok(JobsReport {
        context_id,
        total: jobs.len(),
        jobs,
    })
}

#[derive(Debug, Serialize)]
pub struct JobsReport {
    pub context_id: i64,
    pub total: usize,
    pub jobs: Vec<JobRecord>,
}

impl Render for JobsReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Jobs for context {} ({} total)",
            self.context_id,
            self.total.to_string().bold()
        )?;
        if self.jobs.is_empty() {
            return Ok(());
        }
        writeln!(
            w,
            "{:<6} {:<32} {:<11} {:<10} {:>4}  {}",
            "ID", "FILE", "SOURCE", "STATUS", "%", "MESSAGE"
        )?;
        for job in &self.jobs {
            let status = match job.status {
                JobState::Complete => job.status.as_str().green(),
                JobState::Running | JobState::Queued => job.status.as_str().cyan(),
                JobState::Terminated => job.status.as_str().yellow(),
                JobState::Error => job.status.as_str().red(),
            };
            writeln!(
                w,
                "{:<6} {:<32} {:<11} {:<10} {:>4}  {}",
                job.id, job.file_name, job.source_type, status, job.percent, job.message
            )?;
        }
        Ok(())
    }
}
