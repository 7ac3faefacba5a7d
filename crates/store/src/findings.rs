//! 발견 항목(Finding)
//!
//! 기본 키 `(target_id, pdi_id)`로 쌍당 최대 하나의 행만 존재합니다.
//! 병합 정책은 호출자가 클로저로 넘기며, 읽기-병합-쓰기는 하나의 IMMEDIATE
//! 트랜잭션 안에서 수행되어 동시에 실행되는 워커 프로세스끼리 경합하지 않습니다.

use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use stigpost_core::types::{Category, FindingStatus};

use crate::Store;
use crate::error::StoreError;

/// 저장된 발견 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRow {
    pub target_id: i64,
    pub pdi_id: i64,
    pub status: FindingStatus,
    pub cat_override: Option<Category>,
    pub notes: String,
    pub iteration: i64,
    pub scan_id: i64,
    pub source: String,
    pub partial: bool,
}

const SELECT_FINDING: &str = "SELECT target_id, pdi_id, status, cat_override, notes, iteration, scan_id, source, partial
     FROM finding";

impl Store {
    /// 발견 항목을 조회합니다.
    pub fn get_finding(
        &self,
        target_id: i64,
        pdi_id: i64,
    ) -> Result<Option<FindingRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{SELECT_FINDING} WHERE target_id = ?1 AND pdi_id = ?2"),
                params![target_id, pdi_id],
                raw_from_row,
            )
            .optional()?;
        row.map(RawFinding::into_finding).transpose()
    }

    /// 기존 행(없으면 `None`)에 병합 함수를 적용하고 결과를 저장합니다.
    ///
    /// 저장된 행은 항상 `partial = 0`으로 기록됩니다.
    pub fn merge_finding<F>(
        &self,
        target_id: i64,
        pdi_id: i64,
        merge: F,
    ) -> Result<FindingRow, StoreError>
    where
        F: FnOnce(Option<FindingRow>) -> FindingRow,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!("{SELECT_FINDING} WHERE target_id = ?1 AND pdi_id = ?2"),
                params![target_id, pdi_id],
                raw_from_row,
            )
            .optional()?
            .map(RawFinding::into_finding)
            .transpose()?;

        let mut merged = merge(existing);
        merged.target_id = target_id;
        merged.pdi_id = pdi_id;
        merged.partial = false;

        tx.execute(
            "INSERT INTO finding (target_id, pdi_id, status, cat_override, notes, iteration, scan_id, source, partial)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
             ON CONFLICT (target_id, pdi_id) DO UPDATE SET
                status = excluded.status,
                cat_override = excluded.cat_override,
                notes = excluded.notes,
                iteration = excluded.iteration,
                scan_id = excluded.scan_id,
                source = excluded.source,
                partial = 0",
            params![
                merged.target_id,
                merged.pdi_id,
                merged.status.as_str(),
                merged.cat_override.map(|c| c.as_i64()),
                merged.notes,
                merged.iteration,
                merged.scan_id,
                merged.source,
            ],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    /// 해당 스캔이 마지막으로 기여한 모든 발견 항목을 부분 병합으로 표시합니다.
    pub fn flag_partial(&self, scan_id: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE finding SET partial = 1 WHERE scan_id = ?1",
            params![scan_id],
        )?;
        Ok(n)
    }

    /// 자산의 발견 항목 목록
    pub fn findings_for_asset(&self, target_id: i64) -> Result<Vec<FindingRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_FINDING} WHERE target_id = ?1 ORDER BY pdi_id"))?;
        let raw = stmt
            .query_map(params![target_id], raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawFinding::into_finding).collect()
    }

    /// 컨텍스트의 모든 발견 항목
    pub fn findings_for_context(&self, context_id: i64) -> Result<Vec<FindingRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT f.target_id, f.pdi_id, f.status, f.cat_override, f.notes, f.iteration,
                    f.scan_id, f.source, f.partial
             FROM finding f JOIN target t ON t.id = f.target_id
             WHERE t.context_id = ?1 ORDER BY f.target_id, f.pdi_id",
        )?;
        let raw = stmt
            .query_map(params![context_id], raw_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawFinding::into_finding).collect()
    }

    /// 스캔에 귀속된 발견 항목 수
    pub fn count_findings_for_scan(&self, scan_id: i64) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM finding WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

struct RawFinding {
    target_id: i64,
    pdi_id: i64,
    status: String,
    cat_override: Option<i64>,
    notes: String,
    iteration: i64,
    scan_id: i64,
    source: String,
    partial: bool,
}

impl RawFinding {
    fn into_finding(self) -> Result<FindingRow, StoreError> {
        let status = FindingStatus::from_str_loose(&self.status).ok_or(StoreError::Corrupt {
            column: "finding.status",
            value: self.status.clone(),
        })?;
        Ok(FindingRow {
            target_id: self.target_id,
            pdi_id: self.pdi_id,
            status,
            cat_override: self.cat_override.and_then(Category::from_i64),
            notes: self.notes,
            iteration: self.iteration,
            scan_id: self.scan_id,
            source: self.source,
            partial: self.partial,
        })
    }
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawFinding> {
    Ok(RawFinding {
        target_id: row.get(0)?,
        pdi_id: row.get(1)?,
        status: row.get(2)?,
        cat_override: row.get(3)?,
        notes: row.get(4)?,
        iteration: row.get(5)?,
        scan_id: row.get(6)?,
        source: row.get(7)?,
        partial: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PdiDraft;
    use stigpost_core::types::SourceType;

    fn seed(store: &Store) -> (i64, i64, i64) {
        let target = store.insert_asset(1, "web01").unwrap();
        let pdi = store.insert_pdi(&PdiDraft::default()).unwrap();
        let scan = store.begin_scan(1, SourceType::Nessus, "a.nessus").unwrap();
        (target, pdi, scan)
    }

    fn row(status: FindingStatus, scan_id: i64, iteration: i64) -> FindingRow {
        FindingRow {
            target_id: 0,
            pdi_id: 0,
            status,
            cat_override: None,
            notes: String::new(),
            iteration,
            scan_id,
            source: "Nessus".to_owned(),
            partial: false,
        }
    }

    #[test]
    fn merge_creates_then_updates_single_row() {
        let store = Store::open_in_memory().unwrap();
        let (target, pdi, scan) = seed(&store);

        let first = store
            .merge_finding(target, pdi, |existing| {
                assert!(existing.is_none());
                row(FindingStatus::Open, scan, 1)
            })
            .unwrap();
        assert_eq!(first.target_id, target);

        store
            .merge_finding(target, pdi, |existing| {
                let existing = existing.unwrap();
                assert_eq!(existing.status, FindingStatus::Open);
                row(FindingStatus::NotAFinding, scan, existing.iteration + 1)
            })
            .unwrap();

        let all = store.findings_for_asset(target).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, FindingStatus::NotAFinding);
        assert_eq!(all[0].iteration, 2);
    }

    #[test]
    fn partial_flag_set_and_cleared() {
        let store = Store::open_in_memory().unwrap();
        let (target, pdi, scan) = seed(&store);
        store
            .merge_finding(target, pdi, |_| row(FindingStatus::Open, scan, 1))
            .unwrap();

        assert_eq!(store.flag_partial(scan).unwrap(), 1);
        assert!(store.get_finding(target, pdi).unwrap().unwrap().partial);

        store
            .merge_finding(target, pdi, |e| e.unwrap())
            .unwrap();
        assert!(!store.get_finding(target, pdi).unwrap().unwrap().partial);
        assert_eq!(store.count_findings_for_scan(scan).unwrap(), 1);
        assert_eq!(store.findings_for_context(1).unwrap().len(), 1);
        assert!(store.findings_for_context(2).unwrap().is_empty());
    }
}
