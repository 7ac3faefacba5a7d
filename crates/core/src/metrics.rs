//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `stigpost_`
//! - 모듈명: `ingest_`, `orchestrator_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(stigpost_core::metrics::INGEST_FILES_TOTAL, "format" => "nessus").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 형식 레이블 키 (nessus, scc, ckl, ...)
pub const LABEL_FORMAT: &str = "format";

/// 결과 레이블 키 (complete, error, terminated)
pub const LABEL_RESULT: &str = "result";

// ─── Ingest 메트릭 ─────────────────────────────────────────────────

/// Ingest: 처리 완료된 파일 수 (counter, labels: format, result)
pub const INGEST_FILES_TOTAL: &str = "stigpost_ingest_files_total";

/// Ingest: 병합된 발견 항목 수 (counter, label: format)
pub const INGEST_FINDINGS_TOTAL: &str = "stigpost_ingest_findings_total";

/// Ingest: 새로 생성된 자산 수 (counter)
pub const INGEST_ASSETS_CREATED_TOTAL: &str = "stigpost_ingest_assets_created_total";

/// Ingest: 파일 하나를 처리하는 데 걸린 시간 (histogram, 초)
pub const INGEST_FILE_DURATION_SECONDS: &str = "stigpost_ingest_file_duration_seconds";

// ─── Orchestrator 메트릭 ───────────────────────────────────────────

/// Orchestrator: 실행된 워커 수 (counter)
pub const ORCHESTRATOR_WORKERS_LAUNCHED_TOTAL: &str =
    "stigpost_orchestrator_workers_launched_total";

/// Orchestrator: 격리된 미지원 파일 수 (counter)
pub const ORCHESTRATOR_FILES_UNSUPPORTED_TOTAL: &str =
    "stigpost_orchestrator_files_unsupported_total";

/// Orchestrator: 완료 보고 없이 종료되어 정리된 워커 수 (counter)
pub const ORCHESTRATOR_WORKERS_REAPED_TOTAL: &str = "stigpost_orchestrator_workers_reaped_total";

/// Orchestrator: 현재 활성 작업 수 (gauge)
pub const ORCHESTRATOR_ACTIVE_JOBS: &str = "stigpost_orchestrator_active_jobs";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 파일 처리 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 600s 범위 (대형 스캐너 결과 파일 포함)
pub const FILE_DURATION_BUCKETS: [f64; 9] = [0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 600.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 레코더가 설치되지 않았으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Ingest
    describe_counter!(
        INGEST_FILES_TOTAL,
        "Total number of scan files processed by workers, by format and result"
    );
    describe_counter!(
        INGEST_FINDINGS_TOTAL,
        "Total number of findings merged into the store"
    );
    describe_counter!(
        INGEST_ASSETS_CREATED_TOTAL,
        "Total number of assets created by identity resolution"
    );
    describe_histogram!(
        INGEST_FILE_DURATION_SECONDS,
        "Time to ingest a single scan file in seconds"
    );

    // Orchestrator
    describe_counter!(
        ORCHESTRATOR_WORKERS_LAUNCHED_TOTAL,
        "Total number of worker processes launched"
    );
    describe_counter!(
        ORCHESTRATOR_FILES_UNSUPPORTED_TOTAL,
        "Total number of files quarantined as unsupported"
    );
    describe_counter!(
        ORCHESTRATOR_WORKERS_REAPED_TOTAL,
        "Total number of workers that exited without reporting completion"
    );
    describe_gauge!(
        ORCHESTRATOR_ACTIVE_JOBS,
        "Current number of queued or running jobs in the batch context"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        INGEST_FILES_TOTAL,
        INGEST_FINDINGS_TOTAL,
        INGEST_ASSETS_CREATED_TOTAL,
        INGEST_FILE_DURATION_SECONDS,
        ORCHESTRATOR_WORKERS_LAUNCHED_TOTAL,
        ORCHESTRATOR_FILES_UNSUPPORTED_TOTAL,
        ORCHESTRATOR_WORKERS_REAPED_TOTAL,
        ORCHESTRATOR_ACTIVE_JOBS,
    ];

    #[test]
    fn all_metrics_start_with_stigpost_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("stigpost_"),
                "Metric '{}' does not start with 'stigpost_' prefix",
                name
            );
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_FORMAT, LABEL_RESULT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn file_duration_buckets_are_sorted() {
        let buckets = FILE_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(
                buckets[i] > buckets[i - 1],
                "Bucket values must be in ascending order"
            );
        }
    }
}
