//! Batch orchestration -- classification, throttled worker launch, drain, cleanup.
//!
//! The [`Orchestrator`] is single-threaded and cooperative. It shares no memory
//! with workers: coordination happens only through the job table in the store.
//!
//! # Batch Flow
//!
//! 1. Create the holding layout under the working directory
//! 2. Classify each pending file; quarantine unsupported files
//! 3. Skip files whose latest job row is still `RUNNING`. Rows left active by a
//!    worker of an earlier invocation whose pid no longer exists are marked
//!    `ERROR` first, so they neither hold a slot nor block the drain
//! 4. For each remaining file: wait until `active < max_results`, create a
//!    `QUEUED` row, launch the worker, mark the row `RUNNING` with its pid
//! 5. Poll until no job of the context is active, reaping dead workers
//! 6. Remove the batch descriptor (kept in debug mode)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use stigpost_core::config::StigpostConfig;
use stigpost_core::metrics as m;
use stigpost_core::types::{JobState, SourceType};
use stigpost_ingest::{Holding, HoldingLayout, classify_path};
use stigpost_store::Store;

use crate::descriptor::JobDescriptor;
use crate::launcher::{WorkerJob, WorkerLauncher, WorkerProcess, is_process_alive};

/// Message recorded for workers that exit while their job row is still active.
pub const REAPED_MESSAGE: &str = "worker exited without reporting completion";

/// Outcome counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub context_id: i64,
    pub launched: usize,
    pub skipped_running: usize,
    pub unsupported: usize,
    pub launch_failed: usize,
    pub complete: usize,
    pub error: usize,
    pub terminated: usize,
    pub reaped: usize,
}

struct LaunchedWorker {
    job_id: i64,
    file_name: String,
    process: Box<dyn WorkerProcess>,
}

/// The batch orchestrator.
pub struct Orchestrator<L: WorkerLauncher> {
    config: StigpostConfig,
    store: Arc<Store>,
    launcher: L,
    descriptor: JobDescriptor,
    /// Descriptor file, removed after the batch unless debugging.
    descriptor_path: Option<PathBuf>,
    debug: bool,
    workers: Vec<LaunchedWorker>,
    job_ids: Vec<i64>,
    /// Rows of earlier invocations reaped during this batch.
    stale_reaped: usize,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(
        config: StigpostConfig,
        store: Arc<Store>,
        launcher: L,
        descriptor: JobDescriptor,
    ) -> Self {
        let debug = descriptor.debug;
        Self {
            config,
            store,
            launcher,
            descriptor,
            descriptor_path: None,
            debug,
            workers: Vec::new(),
            job_ids: Vec::new(),
            stale_reaped: 0,
        }
    }

    /// Descriptor file to delete once the batch is drained.
    pub fn with_descriptor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor_path = Some(path.into());
        self
    }

    /// Debug mode: nothing is moved or deleted (also settable from the descriptor).
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = self.debug || debug;
        self
    }

    fn context_id(&self) -> i64 {
        self.descriptor.context_id
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.orchestrator.poll_interval_ms)
    }

    /// Run the whole batch and wait for every worker to finish.
    pub async fn run(&mut self) -> Result<BatchSummary> {
        let context_id = self.context_id();
        let mut summary = BatchSummary {
            context_id,
            ..BatchSummary::default()
        };
        let layout = HoldingLayout::new(&self.descriptor.working_dir);
        layout
            .ensure()
            .context("failed to prepare holding directories")?;

        let files = layout
            .pending_files()
            .context("failed to list working directory")?;
        tracing::info!(
            context_id,
            files = files.len(),
            max_results = self.config.orchestrator.max_results,
            "batch started"
        );
        self.reap()?;

        for path in files {
            if self.is_descriptor(&path) {
                continue;
            }
            let Some(source) = classify_path(&path) else {
                continue;
            };
            let file_name = file_name(&path);

            if source == SourceType::Unsupported {
                summary.unsupported += 1;
                metrics::counter!(m::ORCHESTRATOR_FILES_UNSUPPORTED_TOTAL).increment(1);
                if self.debug {
                    tracing::info!(file = %file_name, "unsupported file left in place (debug)");
                } else {
                    layout.relocate(&path, Holding::Unsupported)?;
                    tracing::warn!(file = %file_name, "unsupported file quarantined");
                }
                continue;
            }

            if let Some(job) = self.store.latest_job(context_id, &file_name)? {
                if job.status == JobState::Running {
                    tracing::info!(file = %file_name, job_id = job.id, pid = ?job.pid, "file already running, skipped");
                    summary.skipped_running += 1;
                    continue;
                }
            }

            self.wait_for_slot().await?;
            if self.launch(&path, &file_name, source)? {
                summary.launched += 1;
            } else {
                summary.launch_failed += 1;
            }
        }

        self.drain().await?;
        summary.reaped = self.tally(&mut summary)? + self.stale_reaped;
        self.cleanup();

        tracing::info!(
            context_id,
            launched = summary.launched,
            complete = summary.complete,
            error = summary.error,
            terminated = summary.terminated,
            unsupported = summary.unsupported,
            skipped_running = summary.skipped_running,
            "batch finished"
        );
        Ok(summary)
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        self.descriptor_path.as_deref().is_some_and(|d| {
            d == path
                || matches!(
                    (d.canonicalize(), path.canonicalize()),
                    (Ok(a), Ok(b)) if a == b
                )
        })
    }

    /// Create the job row, start the worker and record its pid.
    fn launch(&mut self, path: &Path, file_name: &str, source: SourceType) -> Result<bool> {
        let context_id = self.context_id();
        let job_id = self.store.create_job(context_id, file_name, source.as_str())?;
        self.job_ids.push(job_id);
        let job = WorkerJob {
            job_id,
            context_id,
            path: path.to_path_buf(),
            source,
            target_name: self.descriptor.target_name.clone(),
            debug: self.debug,
        };

        let process = match self.launcher.launch(&job) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(file = %file_name, job_id, error = %e, "worker launch failed");
                self.store
                    .finish_job(job_id, JobState::Error, &format!("launch failed: {e}"))?;
                return Ok(false);
            }
        };

        let pid = process.pid();
        // 워커가 먼저 RUNNING으로 바꿨을 수도 있음
        if !self.store.mark_running(job_id, pid)? {
            self.store.set_job_pid(job_id, pid)?;
        }
        metrics::counter!(m::ORCHESTRATOR_WORKERS_LAUNCHED_TOTAL).increment(1);
        tracing::info!(file = %file_name, job_id, pid, source = %source, "worker launched");

        self.workers.push(LaunchedWorker {
            job_id,
            file_name: file_name.to_owned(),
            process,
        });
        Ok(true)
    }

    /// Block until the context has fewer than `max_results` active jobs.
    async fn wait_for_slot(&mut self) -> Result<()> {
        let max = self.config.orchestrator.max_results;
        loop {
            self.reap()?;
            let active = self.store.active_count(self.context_id())?;
            metrics::gauge!(m::ORCHESTRATOR_ACTIVE_JOBS).set(active as f64);
            if active < max {
                return Ok(());
            }
            tracing::trace!(active, max, "concurrency ceiling reached, waiting");
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Block until no job of the context is active.
    async fn drain(&mut self) -> Result<()> {
        loop {
            self.reap()?;
            let active = self.store.active_count(self.context_id())?;
            metrics::gauge!(m::ORCHESTRATOR_ACTIVE_JOBS).set(active as f64);
            if active == 0 {
                return Ok(());
            }
            tracing::debug!(active, "waiting for workers to finish");
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Forget exited workers; mark their job ERROR if they never reported.
    fn reap(&mut self) -> Result<()> {
        let reap_dead = self.config.orchestrator.reap_dead_workers;
        let mut still_running = Vec::with_capacity(self.workers.len());
        for mut worker in std::mem::take(&mut self.workers) {
            let exited = match worker.process.try_wait() {
                Ok(exited) => exited,
                Err(e) => {
                    tracing::warn!(job_id = worker.job_id, error = %e, "cannot poll worker");
                    None
                }
            };
            let Some(success) = exited else {
                still_running.push(worker);
                continue;
            };
            let status = self.store.job_status(worker.job_id)?;
            if status.is_terminal() {
                tracing::debug!(job_id = worker.job_id, file = %worker.file_name, status = %status, success, "worker exited");
                continue;
            }
            if reap_dead
                && self
                    .store
                    .finish_job(worker.job_id, JobState::Error, REAPED_MESSAGE)?
            {
                metrics::counter!(m::ORCHESTRATOR_WORKERS_REAPED_TOTAL).increment(1);
                tracing::error!(
                    job_id = worker.job_id,
                    file = %worker.file_name,
                    pid = worker.process.pid(),
                    success,
                    "worker exited without reporting completion, job marked error"
                );
            }
        }
        self.workers = still_running;
        self.reap_stale()
    }

    /// Mark active rows of this context that no worker of this batch owns and
    /// whose recorded pid is gone.
    fn reap_stale(&mut self) -> Result<()> {
        if !self.config.orchestrator.reap_dead_workers {
            return Ok(());
        }
        for job in self.store.active_jobs(self.context_id())? {
            if self.workers.iter().any(|w| w.job_id == job.id) {
                continue;
            }
            let Some(pid) = job.pid else {
                continue;
            };
            if is_process_alive(pid) {
                continue;
            }
            if self.store.finish_job(job.id, JobState::Error, REAPED_MESSAGE)? {
                self.stale_reaped += 1;
                metrics::counter!(m::ORCHESTRATOR_WORKERS_REAPED_TOTAL).increment(1);
                tracing::warn!(
                    job_id = job.id,
                    file = %job.file_name,
                    pid,
                    "stale job from an earlier run has no live worker, marked error"
                );
            }
        }
        Ok(())
    }

    /// Final state of every job launched in this batch. Returns the reaped count.
    fn tally(&self, summary: &mut BatchSummary) -> Result<usize> {
        let mut reaped = 0;
        for &job_id in &self.job_ids {
            let job = self.store.get_job(job_id)?;
            match job.status {
                JobState::Complete => summary.complete += 1,
                JobState::Terminated => summary.terminated += 1,
                JobState::Error => {
                    summary.error += 1;
                    if job.message == REAPED_MESSAGE {
                        reaped += 1;
                    }
                }
                JobState::Queued | JobState::Running => {}
            }
        }
        Ok(reaped)
    }

    fn cleanup(&self) {
        let Some(path) = &self.descriptor_path else {
            return;
        };
        if self.debug {
            tracing::debug!(path = %path.display(), "debug mode, descriptor kept");
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!(path = %path.display(), "job descriptor removed"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove job descriptor"),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
