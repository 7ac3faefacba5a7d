//! 여러 연결이 같은 데이터베이스 파일을 공유하는 시나리오
//!
//! 워커 프로세스마다 별도 연결을 여는 상황을 스레드로 재현합니다.

use std::sync::Arc;
use std::thread;

use stigpost_core::types::{FindingStatus, JobState, SourceType};
use stigpost_store::{FindingRow, PdiDraft, Store};

fn open(path: &std::path::Path) -> Store {
    Store::open(path, 10_000).expect("store should open")
}

#[test]
fn concurrent_merges_keep_one_finding_per_pair() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let seed = open(&path);
    let target = seed.insert_asset(1, "web01").unwrap();
    let pdi = seed.insert_pdi(&PdiDraft::default()).unwrap();
    let scan = seed.begin_scan(1, SourceType::Nessus, "a.nessus").unwrap();

    let path = Arc::new(path);
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let store = open(&path);
                for _ in 0..25 {
                    store
                        .merge_finding(target, pdi, |existing| match existing {
                            Some(mut row) => {
                                row.iteration += 1;
                                row
                            }
                            None => FindingRow {
                                target_id: target,
                                pdi_id: pdi,
                                status: FindingStatus::Open,
                                cat_override: None,
                                notes: format!("worker {worker}"),
                                iteration: 1,
                                scan_id: scan,
                                source: "Nessus".to_owned(),
                                partial: false,
                            },
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = seed.findings_for_asset(target).unwrap();
    assert_eq!(rows.len(), 1);
    // 모든 병합이 직렬화되었다면 갱신이 하나도 유실되지 않음
    assert_eq!(rows[0].iteration, 100);
}

#[test]
fn job_written_by_one_handle_is_cancelled_through_another() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let orchestrator = open(&path);
    let worker = open(&path);

    let job = orchestrator.create_job(9, "big.nessus", "nessus").unwrap();
    assert!(worker.mark_running(job, 777).unwrap());
    assert_eq!(orchestrator.running_count(9).unwrap(), 1);

    assert!(orchestrator.cancel_job(9, "big.nessus").unwrap());
    assert_eq!(worker.job_status(job).unwrap(), JobState::Terminated);
    assert!(!worker.finish_job(job, JobState::Complete, "").unwrap());
}
