//! Worker process launching.
//!
//! The orchestrator never parses files itself; every file gets its own
//! `stigpost parse` process. [`WorkerLauncher`] is the seam that lets tests
//! substitute in-process fakes for real processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use stigpost_core::types::SourceType;
use tokio::process::{Child, Command};

/// Everything a worker needs to ingest one file.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerJob {
    pub job_id: i64,
    pub context_id: i64,
    pub path: PathBuf,
    pub source: SourceType,
    pub target_name: Option<String>,
    pub debug: bool,
}

/// A launched worker.
pub trait WorkerProcess: Send {
    /// OS process id recorded in the job row.
    fn pid(&self) -> u32;

    /// Non-blocking exit check: `Some(success)` once the process has exited.
    fn try_wait(&mut self) -> Result<Option<bool>>;
}

/// Starts worker processes.
pub trait WorkerLauncher: Send {
    fn launch(&mut self, job: &WorkerJob) -> Result<Box<dyn WorkerProcess>>;
}

/// Launches `stigpost parse` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    worker_bin: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(worker_bin: impl Into<PathBuf>, config_path: Option<PathBuf>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            config_path,
        }
    }

    /// Worker binary from `orchestrator.worker_bin`, or `stigpost` next to the current executable.
    pub fn resolve_worker_bin(configured: &str) -> Result<PathBuf> {
        if !configured.trim().is_empty() {
            return Ok(PathBuf::from(configured));
        }
        let exe = std::env::current_exe().context("cannot locate current executable")?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(format!("stigpost{}", std::env::consts::EXE_SUFFIX)))
    }

    pub fn worker_bin(&self) -> &Path {
        &self.worker_bin
    }

    /// Command-line arguments for one job.
    pub fn args(&self, job: &WorkerJob) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config_path {
            args.push("--config".to_owned());
            args.push(config.display().to_string());
        }
        args.extend([
            "parse".to_owned(),
            "--file".to_owned(),
            job.path.display().to_string(),
            "--context".to_owned(),
            job.context_id.to_string(),
            "--source".to_owned(),
            job.source.as_str().to_owned(),
            "--job-id".to_owned(),
            job.job_id.to_string(),
        ]);
        if let Some(name) = &job.target_name {
            args.push("--target-name".to_owned());
            args.push(name.clone());
        }
        if job.debug {
            args.push("--debug".to_owned());
        }
        args
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&mut self, job: &WorkerJob) -> Result<Box<dyn WorkerProcess>> {
        let child = Command::new(&self.worker_bin)
            .args(self.args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn worker {} for {}",
                    self.worker_bin.display(),
                    job.path.display()
                )
            })?;
        let pid = child
            .id()
            .with_context(|| format!("worker for {} exited before reporting a pid", job.path.display()))?;
        tracing::debug!(pid, job_id = job.job_id, file = %job.path.display(), "worker spawned");
        Ok(Box::new(ChildProcess { child, pid }))
    }
}

struct ChildProcess {
    child: Child,
    pid: u32,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<bool>> {
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("cannot poll worker pid {}", self.pid))?;
        Ok(status.map(|s| s.success()))
    }
}

/// Whether a process with the given pid still exists.
///
/// Used for job rows whose worker was launched by an earlier invocation.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 only checks that the target exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // 존재하지만 시그널 권한이 없는 경우
    std::io::Error::last_os_error().kind() == std::io::ErrorKind::PermissionDenied
}

/// No liveness check on this platform: stale rows are left to their owner.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> WorkerJob {
        WorkerJob {
            job_id: 42,
            context_id: 3,
            path: PathBuf::from("/srv/in/web01.ckl"),
            source: SourceType::StigViewer,
            target_name: None,
            debug: false,
        }
    }

    #[test]
    fn args_for_plain_job() {
        let launcher = ProcessLauncher::new("/usr/bin/stigpost", None);
        assert_eq!(
            launcher.args(&job()),
            vec![
                "parse", "--file", "/srv/in/web01.ckl", "--context", "3", "--source", "ckl",
                "--job-id", "42"
            ]
        );
    }

    #[test]
    fn args_carry_config_target_and_debug() {
        let launcher =
            ProcessLauncher::new("/usr/bin/stigpost", Some(PathBuf::from("/etc/stigpost.toml")));
        let job = WorkerJob {
            target_name: Some("WEB01".to_owned()),
            debug: true,
            ..job()
        };
        let args = launcher.args(&job);
        assert_eq!(&args[..2], ["--config", "/etc/stigpost.toml"]);
        assert!(args.windows(2).any(|w| w == ["--target-name", "WEB01"]));
        assert_eq!(args.last().map(String::as_str), Some("--debug"));
    }

    #[test]
    fn configured_worker_bin_is_used() {
        assert_eq!(
            ProcessLauncher::resolve_worker_bin("/opt/stigpost/bin/stigpost").unwrap(),
            PathBuf::from("/opt/stigpost/bin/stigpost")
        );
        let default = ProcessLauncher::resolve_worker_bin("").unwrap();
        assert!(default.file_name().unwrap().to_string_lossy().starts_with("stigpost"));
    }

    #[cfg(unix)]
    #[test]
    fn liveness_of_own_and_unused_pids() {
        assert!(is_process_alive(std::process::id()));
        // pid_max is at most 2^22 on Linux
        assert!(!is_process_alive(i32::MAX as u32));
        assert!(!is_process_alive(u32::MAX));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_launch() {
        let mut launcher = ProcessLauncher::new("/nonexistent/stigpost-worker", None);
        let err = launcher.launch(&job()).err().unwrap();
        assert!(err.to_string().contains("failed to spawn worker"));
    }
}
