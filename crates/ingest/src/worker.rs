//! 워커 -- 파일 하나의 수집 수명주기
//!
//! 오케스트레이터가 띄운 프로세스(또는 CLI `stigpost parse`)가 [`run`]을 한 번 호출합니다.
//!
//! ```text
//! 작업 행 확보 (QUEUED) -> RUNNING(pid)
//!   -> 분류 / 크기 확인 -> 스캔 시작 -> 파서 실행
//!        ├─ 정상      -> host_list, COMPLETE, 형식별 보관 디렉토리로 이동
//!        ├─ 외부 취소 -> partial 표시, terminated/로 이동 (COMPLETE 아님)
//!        └─ 실패      -> ERROR(메시지), 파일은 제자리
//! ```
//!
//! 파일 단위 실패는 작업 행에 기록되고 [`WorkerOutcome`]으로 반환됩니다.
//! `Err`는 작업 행 자체를 기록할 수 없을 때만 반환합니다.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use stigpost_core::config::StigpostConfig;
use stigpost_core::metrics as m;
use stigpost_core::types::{JobState, SourceType};
use stigpost_store::Store;
use tracing::{error, info, warn};

use crate::classifier::classify_path;
use crate::context::{IngestContext, IngestStats};
use crate::deconflict::{DeconflictPolicy, Deconflictor};
use crate::error::IngestError;
use crate::layout::{Holding, HoldingLayout};
use crate::parser::parser_for;

/// 워커 실행 요청
#[derive(Debug, Clone, Default)]
pub struct WorkerRequest {
    pub context_id: i64,
    pub path: PathBuf,
    /// 지정하면 분류를 건너뜁니다.
    pub source: Option<SourceType>,
    /// 오케스트레이터가 미리 만든 작업 행. 없으면 새로 만듭니다.
    pub job_id: Option<i64>,
    pub target_name: Option<String>,
    /// 디버그 모드에서는 처리한 파일을 옮기지 않습니다.
    pub debug: bool,
}

/// 워커 결과
#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutcome {
    pub job_id: i64,
    pub scan_id: Option<i64>,
    pub source: SourceType,
    pub state: JobState,
    pub message: String,
    pub stats: IngestStats,
    pub relocated: Option<PathBuf>,
}

/// 파일 하나를 처리합니다.
pub fn run(
    store: &Store,
    config: &StigpostConfig,
    req: &WorkerRequest,
) -> Result<WorkerOutcome, IngestError> {
    let started = Instant::now();
    let file_name = file_name(&req.path);
    let layout = HoldingLayout::new(req.path.parent().unwrap_or(Path::new(".")));
    let source = match req.source {
        Some(source) => source,
        None => classify_path(&req.path).unwrap_or(SourceType::Unsupported),
    };

    let job_id = match req.job_id {
        Some(id) => id,
        None => store.create_job(req.context_id, &file_name, source.as_str())?,
    };
    let mut outcome = WorkerOutcome {
        job_id,
        scan_id: None,
        source,
        state: JobState::Running,
        message: String::new(),
        stats: IngestStats::default(),
        relocated: None,
    };

    let pid = std::process::id();
    if !store.mark_running(job_id, pid)? && !store.set_job_pid(job_id, pid)? {
        // 시작 전에 취소되었거나 이미 종료된 작업
        let state = store.job_status(job_id)?;
        warn!(job_id, file = %file_name, state = %state, "job is no longer active, not starting");
        if state == JobState::Terminated && !req.debug {
            outcome.relocated = Some(layout.relocate(&req.path, Holding::Terminated)?);
        }
        outcome.state = state;
        return Ok(outcome);
    }
    info!(job_id, file = %file_name, source = %source, pid, "worker started");

    let mut result = ingest(store, config, req, &file_name, source, job_id, &mut outcome);
    if result.is_ok() && !store.finish_job(job_id, JobState::Complete, "")? {
        // 마지막 취소 확인과 완료 기록 사이에 행이 바뀜
        let state = store.job_status(job_id)?;
        warn!(job_id, file = %file_name, state = %state, "job left RUNNING before completion was recorded");
        if state != JobState::Terminated {
            outcome.state = state;
            return Ok(outcome);
        }
        result = Err(IngestError::Cancelled { job_id });
    }
    let result_label = match result {
        Ok(()) => {
            outcome.state = JobState::Complete;
            if !req.debug {
                outcome.relocated = Some(layout.relocate(&req.path, Holding::Parsed(source))?);
            }
            info!(
                job_id,
                file = %file_name,
                hosts = outcome.stats.hosts,
                findings = outcome.stats.findings,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "worker complete"
            );
            "complete"
        }
        Err(e) if e.is_cancelled() => {
            if let Some(scan_id) = outcome.scan_id {
                let flagged = store.flag_partial(scan_id)?;
                store.set_scan_status(scan_id, JobState::Terminated)?;
                warn!(job_id, scan_id, flagged, "findings from terminated scan flagged partial");
            }
            outcome.state = JobState::Terminated;
            outcome.message = "cancelled by operator".to_owned();
            if !req.debug {
                outcome.relocated = Some(layout.relocate(&req.path, Holding::Terminated)?);
            }
            "terminated"
        }
        Err(IngestError::UnsupportedSource { path }) => {
            outcome.message = format!("unsupported source: {path}");
            store.finish_job(job_id, JobState::Error, &outcome.message)?;
            outcome.state = JobState::Error;
            if !req.debug {
                outcome.relocated = Some(layout.relocate(&req.path, Holding::Unsupported)?);
            }
            "unsupported"
        }
        Err(e) => {
            error!(job_id, file = %file_name, error = %e, "worker failed");
            if let Some(scan_id) = outcome.scan_id {
                store.set_scan_status(scan_id, JobState::Error)?;
            }
            outcome.message = e.to_string();
            store.finish_job(job_id, JobState::Error, &outcome.message)?;
            outcome.state = JobState::Error;
            "error"
        }
    };

    metrics::counter!(
        m::INGEST_FILES_TOTAL,
        m::LABEL_FORMAT => source.as_str(),
        m::LABEL_RESULT => result_label
    )
    .increment(1);
    metrics::histogram!(m::INGEST_FILE_DURATION_SECONDS, m::LABEL_FORMAT => source.as_str())
        .record(started.elapsed().as_secs_f64());
    Ok(outcome)
}

fn ingest(
    store: &Store,
    config: &StigpostConfig,
    req: &WorkerRequest,
    file_name: &str,
    source: SourceType,
    job_id: i64,
    outcome: &mut WorkerOutcome,
) -> Result<(), IngestError> {
    let display = req.path.display().to_string();
    let Some(parser) = parser_for(source) else {
        return Err(IngestError::UnsupportedSource { path: display });
    };

    let size = std::fs::metadata(&req.path)
        .map_err(|source| IngestError::Io {
            path: display.clone(),
            source,
        })?
        .len();
    let max = config.ingest.max_file_size;
    if max > 0 && size > max {
        return Err(IngestError::FileTooBig {
            path: display,
            size,
            max,
        });
    }

    let scan_id = store.begin_scan(req.context_id, source, file_name)?;
    outcome.scan_id = Some(scan_id);

    let deconflictor = Deconflictor::new(
        DeconflictPolicy::from_config(&config.deconfliction),
        parser.note_order(),
    );
    let mut ctx = IngestContext::new(
        store,
        req.context_id,
        scan_id,
        Some(job_id),
        source,
        deconflictor,
        req.target_name.clone(),
        config.ingest.clone(),
    );
    ctx.set_total_bytes(size);

    let parsed = parser
        .parse(&req.path, &mut ctx)
        .and_then(|()| ctx.finish_hosts());
    outcome.stats = ctx.stats();
    parsed?;

    // 마지막 레코드 이후의 취소도 반영
    ctx.checkpoint()?;
    store.set_host_list(scan_id, ctx.host_counts())?;
    store.set_scan_status(scan_id, JobState::Complete)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
