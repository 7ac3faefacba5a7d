//! 스캔 레코드
//!
//! `(context_id, file_name)`이 유일하므로 같은 파일을 다시 수집하면 기존 스캔을 재사용합니다.
//! `host_list`는 호스트 이름 → 발견 항목 수 JSON 맵입니다.

use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use stigpost_core::types::{JobState, SourceType};

use crate::Store;
use crate::error::StoreError;

/// 저장된 스캔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub context_id: i64,
    pub source_type: String,
    pub file_name: String,
    pub file_date: Option<String>,
    pub status: JobState,
    pub host_list: BTreeMap<String, u64>,
}

impl Store {
    /// 스캔을 찾거나 만들고 상태를 RUNNING으로 되돌립니다.
    ///
    /// 재실행 시 이전 `host_list`는 비워지고 새로 집계됩니다.
    pub fn begin_scan(
        &self,
        context_id: i64,
        source: SourceType,
        file_name: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scan (context_id, source_type, file_name, status, host_list)
             VALUES (?1, ?2, ?3, 'RUNNING', '{}')
             ON CONFLICT (context_id, file_name) DO UPDATE SET
                source_type = excluded.source_type,
                status = 'RUNNING',
                host_list = '{}'",
            params![context_id, source.as_str(), file_name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM scan WHERE context_id = ?1 AND file_name = ?2",
            params![context_id, file_name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 스캔 파일 날짜를 설정합니다 (비어 있을 때만).
    pub fn set_scan_file_date(&self, scan_id: i64, file_date: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scan SET file_date = ?2 WHERE id = ?1 AND file_date IS NULL",
            params![scan_id, file_date.trim()],
        )?;
        Ok(())
    }

    /// 스캔 상태를 설정합니다.
    pub fn set_scan_status(&self, scan_id: i64, status: JobState) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scan SET status = ?2 WHERE id = ?1",
            params![scan_id, status.as_str()],
        )?;
        Ok(())
    }

    /// 호스트별 발견 수 맵을 기록합니다.
    pub fn set_host_list(
        &self,
        scan_id: i64,
        host_list: &BTreeMap<String, u64>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(host_list)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scan SET host_list = ?2 WHERE id = ?1",
            params![scan_id, json],
        )?;
        Ok(())
    }

    /// 스캔을 조회합니다.
    pub fn get_scan(&self, scan_id: i64) -> Result<Scan, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, context_id, source_type, file_name, file_date, status, host_list
                 FROM scan WHERE id = ?1",
                params![scan_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let (id, context_id, source_type, file_name, file_date, status, host_list) = row
            .ok_or_else(|| StoreError::NotFound {
                what: "scan",
                key: scan_id.to_string(),
            })?;

        let status = JobState::from_str_loose(&status).ok_or(StoreError::Corrupt {
            column: "scan.status",
            value: status.clone(),
        })?;
        Ok(Scan {
            id,
            context_id,
            source_type,
            file_name,
            file_date,
            status,
            host_list: serde_json::from_str(&host_list)?,
        })
    }

    /// 파일 이름으로 스캔 id를 찾습니다.
    pub fn find_scan(&self, context_id: i64, file_name: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM scan WHERE context_id = ?1 AND file_name = ?2",
                params![context_id, file_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
