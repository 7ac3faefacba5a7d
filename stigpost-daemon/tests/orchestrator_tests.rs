//! Orchestrator integration tests.
//!
//! Tests the batch flow with in-process fake workers: classify -> throttle ->
//! launch -> drain -> reap -> cleanup.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stigpost_core::config::StigpostConfig;
use stigpost_core::types::{JobState, SourceType};
use stigpost_daemon::orchestrator::REAPED_MESSAGE;
use stigpost_daemon::{JobDescriptor, Orchestrator, WorkerJob, WorkerLauncher, WorkerProcess};
use stigpost_store::Store;

const CONTEXT: i64 = 4;

/// How a fake worker behaves, chosen from its file name.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Complete,
    Fail,
    Crash,
    WaitForCancel,
}

fn behaviour_for(path: &Path) -> Behaviour {
    let name = path.file_name().unwrap().to_string_lossy();
    if name.starts_with("fail") {
        Behaviour::Fail
    } else if name.starts_with("crash") {
        Behaviour::Crash
    } else if name.starts_with("slow") {
        Behaviour::WaitForCancel
    } else {
        Behaviour::Complete
    }
}

#[derive(Clone, Default)]
struct Observed {
    max_running: Arc<AtomicUsize>,
    launched: Arc<Mutex<Vec<WorkerJob>>>,
}

struct FakeLauncher {
    store: Arc<Store>,
    next_pid: AtomicU32,
    observed: Observed,
}

impl FakeLauncher {
    fn new(store: Arc<Store>, observed: Observed) -> Self {
        Self {
            store,
            next_pid: AtomicU32::new(40_000),
            observed,
        }
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&mut self, job: &WorkerJob) -> anyhow::Result<Box<dyn WorkerProcess>> {
        if job.path.to_string_lossy().contains("broken") {
            anyhow::bail!("no such worker binary");
        }
        self.observed.launched.lock().unwrap().push(job.clone());
        Ok(Box::new(FakeProcess {
            store: Arc::clone(&self.store),
            job_id: job.job_id,
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            polls_left: 2,
            behaviour: behaviour_for(&job.path),
            observed: self.observed.clone(),
        }))
    }
}

struct FakeProcess {
    store: Arc<Store>,
    job_id: i64,
    pid: u32,
    polls_left: u32,
    behaviour: Behaviour,
    observed: Observed,
}

impl WorkerProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> anyhow::Result<Option<bool>> {
        let running = self.store.running_count(CONTEXT)?;
        self.observed.max_running.fetch_max(running, Ordering::SeqCst);

        if self.behaviour == Behaviour::WaitForCancel {
            let exited = self.store.job_status(self.job_id)? == JobState::Terminated;
            return Ok(exited.then_some(true));
        }
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(None);
        }
        match self.behaviour {
            Behaviour::Complete => {
                self.store.finish_job(self.job_id, JobState::Complete, "")?;
                Ok(Some(true))
            }
            Behaviour::Fail => {
                self.store
                    .finish_job(self.job_id, JobState::Error, "format error: missing header")?;
                Ok(Some(false))
            }
            Behaviour::Crash | Behaviour::WaitForCancel => Ok(Some(false)),
        }
    }
}

fn test_config(max_results: usize) -> StigpostConfig {
    let mut config = StigpostConfig::default();
    config.orchestrator.max_results = max_results;
    config.orchestrator.poll_interval_ms = 10;
    config
}

fn descriptor(dir: &Path) -> JobDescriptor {
    JobDescriptor {
        context_id: CONTEXT,
        working_dir: dir.to_path_buf(),
        target_name: None,
        debug: false,
    }
}

fn write_scan(dir: &Path, name: &str) {
    std::fs::write(
        dir.join(name),
        "<?xml version=\"1.0\" ?>\n<NessusClientData_v2></NessusClientData_v2>\n",
    )
    .unwrap();
}

#[tokio::test]
async fn test_ten_files_never_exceed_ceiling_of_three() {
    // Given: 10 scan files and MAX_RESULTS = 3
    let dir = tempfile::tempdir().unwrap();
    for i in 0..9 {
        write_scan(dir.path(), &format!("scan{i:02}.nessus"));
    }
    write_scan(dir.path(), "fail10.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let observed = Observed::default();
    let launcher = FakeLauncher::new(Arc::clone(&store), observed.clone());

    // When: Running the batch
    let mut orchestrator =
        Orchestrator::new(test_config(3), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();

    // Then: All 10 launched, at most 3 running at any poll, all terminal
    assert_eq!(summary.launched, 10);
    assert!(observed.max_running.load(Ordering::SeqCst) <= 3);
    assert!(observed.max_running.load(Ordering::SeqCst) >= 1);
    assert_eq!(summary.complete, 9);
    assert_eq!(summary.error, 1);
    assert_eq!(store.active_count(CONTEXT).unwrap(), 0);
    for job in store.list_jobs(CONTEXT).unwrap() {
        assert!(job.status.is_terminal(), "{} is {}", job.file_name, job.status);
        assert!(job.pid.is_some());
    }
}

#[tokio::test]
async fn test_worker_arguments_come_from_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "web01.nessus");
    std::fs::write(dir.path().join("web01.ckl"), "<CHECKLIST></CHECKLIST>").unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let observed = Observed::default();
    let launcher = FakeLauncher::new(Arc::clone(&store), observed.clone());
    let mut desc = descriptor(dir.path());
    desc.target_name = Some("WEB01".to_owned());

    let mut orchestrator = Orchestrator::new(test_config(5), Arc::clone(&store), launcher, desc)
        .with_debug(true);
    orchestrator.run().await.unwrap();

    let launched = observed.launched.lock().unwrap().clone();
    assert_eq!(launched.len(), 2);
    let ckl = launched.iter().find(|j| j.source == SourceType::StigViewer).unwrap();
    assert_eq!(ckl.context_id, CONTEXT);
    assert_eq!(ckl.target_name.as_deref(), Some("WEB01"));
    assert!(ckl.debug);
    assert_eq!(store.get_job(ckl.job_id).unwrap().source_type, "ckl");
}

#[tokio::test]
async fn test_unsupported_files_are_quarantined_without_jobs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.docx"), "PK\u{3}\u{4} not a scan").unwrap();
    write_scan(dir.path(), "web01.nessus");
    std::fs::create_dir(dir.path().join("archive")).unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.unsupported, 1);
    assert_eq!(summary.launched, 1);
    assert!(dir.path().join("unsupported").join("notes.docx").exists());
    assert!(!dir.path().join("notes.docx").exists());
    assert!(store.latest_job(CONTEXT, "notes.docx").unwrap().is_none());
    // 보관 디렉토리가 모두 생성됨
    for holding in ["nessus", "scc", "stig_viewer", "nmap", "echecklist", "mbsa", "mssql", "terminated"] {
        assert!(dir.path().join(holding).is_dir(), "{holding}");
    }
}

#[tokio::test]
async fn test_debug_mode_keeps_unsupported_files_and_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.docx"), "not a scan").unwrap();
    let batch = dir.path().join("batch.toml");
    std::fs::write(&batch, "context_id = 4\n").unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()))
            .with_descriptor_path(&batch)
            .with_debug(true);
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.unsupported, 1);
    assert!(dir.path().join("notes.docx").exists());
    assert!(batch.exists());
}

#[tokio::test]
async fn test_descriptor_is_removed_and_never_classified() {
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "web01.nessus");
    let batch = dir.path().join("batch.toml");
    std::fs::write(&batch, "context_id = 4\n").unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()))
            .with_descriptor_path(&batch);
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.unsupported, 0);
    assert_eq!(summary.complete, 1);
    assert!(!batch.exists());
    assert!(!dir.path().join("unsupported").join("batch.toml").exists());
}

#[tokio::test]
async fn test_file_already_running_is_skipped() {
    // Given: A file whose job from a prior invocation is still RUNNING
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "busy.nessus");
    write_scan(dir.path(), "fresh.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let stale = store.create_job(CONTEXT, "busy.nessus", "nessus").unwrap();
    // 살아 있는 pid여야 이전 실행의 워커로 취급됨
    assert!(store.mark_running(stale, std::process::id()).unwrap());

    // 이전 실행의 워커는 잠시 후 스스로 끝남
    let finisher = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.finish_job(stale, JobState::Complete, "").unwrap();
        })
    };

    let observed = Observed::default();
    let launcher = FakeLauncher::new(Arc::clone(&store), observed.clone());
    let mut orchestrator =
        Orchestrator::new(test_config(3), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();
    finisher.await.unwrap();

    // Then: Only the fresh file got a worker; the drain waited for the stale one
    assert_eq!(summary.skipped_running, 1);
    assert_eq!(summary.launched, 1);
    let launched = observed.launched.lock().unwrap().clone();
    assert!(launched[0].path.ends_with("fresh.nessus"));
    assert_eq!(store.get_job(stale).unwrap().status, JobState::Complete);
}

#[tokio::test]
async fn test_stale_running_row_with_dead_pid_is_reaped() {
    // Given: A RUNNING row from an earlier invocation whose worker is gone
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "busy.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let stale = store.create_job(CONTEXT, "busy.nessus", "nessus").unwrap();
    assert!(store.mark_running(stale, i32::MAX as u32).unwrap());

    let observed = Observed::default();
    let launcher = FakeLauncher::new(Arc::clone(&store), observed.clone());
    let mut orchestrator =
        Orchestrator::new(test_config(1), Arc::clone(&store), launcher, descriptor(dir.path()));

    // When: Running the batch with a single slot
    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("batch must not wait on a dead worker")
        .unwrap();

    // Then: The stale row is marked error and the file is ingested again
    let stale_job = store.get_job(stale).unwrap();
    assert_eq!(stale_job.status, JobState::Error);
    assert_eq!(stale_job.message, REAPED_MESSAGE);
    assert_eq!(summary.skipped_running, 0);
    assert_eq!(summary.launched, 1);
    assert_eq!(summary.complete, 1);
    assert_eq!(summary.reaped, 1);
    assert_eq!(store.active_count(CONTEXT).unwrap(), 0);
}

#[tokio::test]
async fn test_stale_row_is_kept_when_reaping_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let stale = store.create_job(CONTEXT, "gone.nessus", "nessus").unwrap();
    assert!(store.mark_running(stale, i32::MAX as u32).unwrap());

    let finisher = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.finish_job(stale, JobState::Terminated, "").unwrap();
        })
    };

    let mut config = test_config(2);
    config.orchestrator.reap_dead_workers = false;
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());
    let mut orchestrator =
        Orchestrator::new(config, Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();
    finisher.await.unwrap();

    assert_eq!(summary.reaped, 0);
    assert_eq!(store.get_job(stale).unwrap().status, JobState::Terminated);
}

#[tokio::test]
async fn test_dead_worker_is_reaped() {
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "crash.nessus");
    write_scan(dir.path(), "ok.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.reaped, 1);
    assert_eq!(summary.error, 1);
    assert_eq!(summary.complete, 1);
    let job = store.latest_job(CONTEXT, "crash.nessus").unwrap().unwrap();
    assert_eq!(job.status, JobState::Error);
    assert_eq!(job.message, REAPED_MESSAGE);
    assert!(!job.complete);
}

#[tokio::test]
async fn test_launch_failure_marks_job_error_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "broken.nessus");
    write_scan(dir.path(), "good.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.launch_failed, 1);
    assert_eq!(summary.launched, 1);
    assert_eq!(summary.complete, 1);
    let job = store.latest_job(CONTEXT, "broken.nessus").unwrap().unwrap();
    assert_eq!(job.status, JobState::Error);
    assert!(job.message.starts_with("launch failed"));
}

#[tokio::test]
async fn test_operator_cancel_terminates_running_job() {
    // Given: A worker that only stops when its job is cancelled
    let dir = tempfile::tempdir().unwrap();
    write_scan(dir.path(), "slow.nessus");
    write_scan(dir.path(), "quick.nessus");
    let store = Arc::new(Store::open_in_memory().unwrap());
    let launcher = FakeLauncher::new(Arc::clone(&store), Observed::default());

    // When: The operator cancels it once it is RUNNING
    let canceller = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                if let Some(job) = store.latest_job(CONTEXT, "slow.nessus").unwrap() {
                    if job.status == JobState::Running {
                        assert!(store.cancel_job(CONTEXT, "slow.nessus").unwrap());
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut orchestrator =
        Orchestrator::new(test_config(2), Arc::clone(&store), launcher, descriptor(dir.path()));
    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .expect("batch should drain after cancellation")
        .unwrap();
    canceller.await.unwrap();

    // Then: The job is TERMINATED, never COMPLETE, and not reaped
    assert_eq!(summary.terminated, 1);
    assert_eq!(summary.complete, 1);
    assert_eq!(summary.reaped, 0);
    let job = store.latest_job(CONTEXT, "slow.nessus").unwrap().unwrap();
    assert_eq!(job.status, JobState::Terminated);
    assert!(!job.complete);
}
