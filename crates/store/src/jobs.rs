//! 작업 상태 테이블 -- 프로세스 간 조정의 기본 단위
//!
//! 상태 머신: `QUEUED -> RUNNING -> {COMPLETE | ERROR | TERMINATED}`.
//! 모든 전이는 SQL `WHERE` 절로 보호되어 종료 상태의 행은 다시 바뀌지 않습니다.
//! 같은 파일을 다시 실행하면 새 행이 생기며, 파일의 "현재" 작업은 가장 최근 행입니다.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use stigpost_core::types::JobState;

use crate::error::StoreError;
use crate::{Store, now_rfc3339};

/// 작업 상태 행
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub context_id: i64,
    pub file_name: String,
    pub source_type: String,
    pub pid: Option<u32>,
    pub status: JobState,
    pub percent: u8,
    pub last_host: String,
    pub complete: bool,
    pub message: String,
    pub updated_at: String,
}

const SELECT_JOB: &str = "SELECT id, context_id, file_name, source_type, pid, status, percent, last_host, complete, message, updated_at
     FROM job";

const ACTIVE: &str = "status IN ('QUEUED', 'RUNNING')";

impl Store {
    /// QUEUED 상태의 새 작업 행을 만듭니다.
    pub fn create_job(
        &self,
        context_id: i64,
        file_name: &str,
        source_type: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job (context_id, file_name, source_type, status, updated_at)
             VALUES (?1, ?2, ?3, 'QUEUED', ?4)",
            params![context_id, file_name, source_type, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 작업을 조회합니다.
    pub fn get_job(&self, id: i64) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(&format!("{SELECT_JOB} WHERE id = ?1"), params![id], raw_from_row)
            .optional()?;
        raw.ok_or_else(|| StoreError::NotFound {
            what: "job",
            key: id.to_string(),
        })?
        .into_record()
    }

    /// 파일의 가장 최근 작업 행
    pub fn latest_job(
        &self,
        context_id: i64,
        file_name: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "{SELECT_JOB} WHERE context_id = ?1 AND file_name = ?2 ORDER BY id DESC LIMIT 1"
                ),
                params![context_id, file_name],
                raw_from_row,
            )
            .optional()?;
        raw.map(RawJob::into_record).transpose()
    }

    /// 취소 확인용으로 작업 상태만 읽습니다.
    pub fn job_status(&self, id: i64) -> Result<JobState, StoreError> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row("SELECT status FROM job WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let status = status.ok_or_else(|| StoreError::NotFound {
            what: "job",
            key: id.to_string(),
        })?;
        JobState::from_str_loose(&status).ok_or(StoreError::Corrupt {
            column: "job.status",
            value: status,
        })
    }

    /// QUEUED → RUNNING 전이. 전이가 일어났는지 반환합니다.
    pub fn mark_running(&self, id: i64, pid: u32) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE job SET status = 'RUNNING', pid = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'QUEUED'",
            params![id, pid, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// 활성 작업의 pid를 기록합니다 (오케스트레이터가 실행 직후 호출).
    pub fn set_job_pid(&self, id: i64, pid: u32) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            &format!("UPDATE job SET pid = ?2, updated_at = ?3 WHERE id = ?1 AND {ACTIVE}"),
            params![id, pid, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// 진행률과 현재 호스트를 게시합니다. 종료된 작업은 바뀌지 않습니다.
    pub fn update_progress(
        &self,
        id: i64,
        percent: u8,
        last_host: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            &format!(
                "UPDATE job SET percent = ?2, last_host = ?3, updated_at = ?4 WHERE id = ?1 AND {ACTIVE}"
            ),
            params![id, percent.min(100), last_host, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// 작업을 종료 상태로 전이합니다. 이미 종료된 작업이면 `false`를 반환합니다.
    ///
    /// COMPLETE는 `complete = 1`과 `percent = 100`을 함께 기록합니다.
    pub fn finish_job(&self, id: i64, state: JobState, message: &str) -> Result<bool, StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::Corrupt {
                column: "job.status",
                value: format!("non-terminal finish state {state}"),
            });
        }
        let complete = state == JobState::Complete;
        let conn = self.conn()?;
        let n = conn.execute(
            &format!(
                "UPDATE job SET status = ?2, complete = ?3,
                    percent = CASE WHEN ?3 THEN 100 ELSE percent END,
                    message = ?4, updated_at = ?5
                 WHERE id = ?1 AND {ACTIVE}"
            ),
            params![id, state.as_str(), complete, message, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// 운영자 취소: 파일의 활성 작업을 TERMINATED로 표시합니다.
    pub fn cancel_job(&self, context_id: i64, file_name: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            &format!(
                "UPDATE job SET status = 'TERMINATED', message = 'cancelled by operator', updated_at = ?3
                 WHERE context_id = ?1 AND file_name = ?2 AND {ACTIVE}"
            ),
            params![context_id, file_name, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// 컨텍스트의 RUNNING 작업 수
    pub fn running_count(&self, context_id: i64) -> Result<usize, StoreError> {
        self.count_where(context_id, "status = 'RUNNING'")
    }

    /// 컨텍스트의 QUEUED + RUNNING 작업 수 (동시성 상한 비교 대상)
    pub fn active_count(&self, context_id: i64) -> Result<usize, StoreError> {
        self.count_where(context_id, ACTIVE)
    }

    /// 컨텍스트의 활성 작업 목록
    pub fn active_jobs(&self, context_id: i64) -> Result<Vec<JobRecord>, StoreError> {
        self.jobs_where(context_id, ACTIVE)
    }

    /// 컨텍스트의 모든 작업 (오래된 순)
    pub fn list_jobs(&self, context_id: i64) -> Result<Vec<JobRecord>, StoreError> {
        self.jobs_where(context_id, "1 = 1")
    }

    fn count_where(&self, context_id: i64, filter: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM job WHERE context_id = ?1 AND {filter}"),
            params![context_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    fn jobs_where(&self, context_id: i64, filter: &str) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_JOB} WHERE context_id = ?1 AND {filter} ORDER BY id"
        ))?;
        let raw = stmt
            .query_map(params![context_id], raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawJob::into_record).collect()
    }
}

struct RawJob {
    id: i64,
    context_id: i64,
    file_name: String,
    source_type: String,
    pid: Option<i64>,
    status: String,
    percent: i64,
    last_host: String,
    complete: bool,
    message: String,
    updated_at: String,
}

impl RawJob {
    fn into_record(self) -> Result<JobRecord, StoreError> {
        let status = JobState::from_str_loose(&self.status).ok_or(StoreError::Corrupt {
            column: "job.status",
            value: self.status.clone(),
        })?;
        Ok(JobRecord {
            id: self.id,
            context_id: self.context_id,
            file_name: self.file_name,
            source_type: self.source_type,
            pid: self.pid.and_then(|p| u32::try_from(p).ok()),
            status,
            percent: u8::try_from(self.percent.clamp(0, 100)).unwrap_or(100),
            last_host: self.last_host,
            complete: self.complete,
            message: self.message,
            updated_at: self.updated_at,
        })
    }
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        context_id: row.get(1)?,
        file_name: row.get(2)?,
        source_type: row.get(3)?,
        pid: row.get(4)?,
        status: row.get(5)?,
        percent: row.get(6)?,
        last_host: row.get(7)?,
        complete: row.get(8)?,
        message: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_queued_running_complete() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(1, "a.ckl", "ckl").unwrap();
        assert_eq!(store.job_status(id).unwrap(), JobState::Queued);
        assert_eq!(store.active_count(1).unwrap(), 1);
        assert_eq!(store.running_count(1).unwrap(), 0);

        assert!(store.mark_running(id, 4242).unwrap());
        assert!(!store.mark_running(id, 4243).unwrap());
        assert_eq!(store.running_count(1).unwrap(), 1);

        assert!(store.update_progress(id, 40, "web01").unwrap());
        assert!(store.finish_job(id, JobState::Complete, "").unwrap());

        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobState::Complete);
        assert_eq!(job.pid, Some(4242));
        assert_eq!(job.percent, 100);
        assert_eq!(job.last_host, "web01");
        assert!(job.complete);
        assert_eq!(store.active_count(1).unwrap(), 0);
    }

    #[test]
    fn terminal_rows_never_change() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(1, "a.nessus", "nessus").unwrap();
        store.mark_running(id, 1).unwrap();
        assert!(store.cancel_job(1, "a.nessus").unwrap());

        assert!(!store.finish_job(id, JobState::Complete, "").unwrap());
        assert!(!store.update_progress(id, 99, "late").unwrap());
        assert!(!store.set_job_pid(id, 2).unwrap());
        assert!(!store.cancel_job(1, "a.nessus").unwrap());

        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobState::Terminated);
        assert!(!job.complete);
        assert_eq!(job.last_host, "");
    }

    #[test]
    fn finish_rejects_non_terminal_state() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_job(1, "a.nessus", "nessus").unwrap();
        assert!(store.finish_job(id, JobState::Running, "").is_err());
    }

    #[test]
    fn latest_job_is_most_recent_row() {
        let store = Store::open_in_memory().unwrap();
        let first = store.create_job(3, "x.gnmap", "nmap-grep").unwrap();
        store.finish_job(first, JobState::Error, "boom").unwrap();
        let second = store.create_job(3, "x.gnmap", "nmap-grep").unwrap();

        let latest = store.latest_job(3, "x.gnmap").unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.status, JobState::Queued);
        assert_eq!(store.list_jobs(3).unwrap().len(), 2);
        assert_eq!(store.active_jobs(3).unwrap().len(), 1);
        assert!(store.latest_job(3, "missing").unwrap().is_none());
    }

    #[test]
    fn counts_are_per_context() {
        let store = Store::open_in_memory().unwrap();
        store.create_job(1, "a", "ckl").unwrap();
        store.create_job(2, "b", "ckl").unwrap();
        assert_eq!(store.active_count(1).unwrap(), 1);
        assert_eq!(store.active_count(2).unwrap(), 1);
    }
}
