//! 수집 경로 벤치마크
//!
//! 파일 형식 분류, 발견 항목 병합, 노트 누적의 처리량을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use stigpost_core::types::FindingStatus;
use stigpost_ingest::deconflict::{accumulate_notes, merge};
use stigpost_ingest::{DeconflictPolicy, MergeInput, NoteOrder, classify_bytes};
use stigpost_store::FindingRow;

const NESSUS_HEAD: &[u8] = br#"<?xml version="1.0" ?>
<NessusClientData_v2 xmlns:cm="http://www.nessus.org/cm">
<Report name="weekly"><ReportHost name="10.0.0.5"><HostProperties>"#;

const XCCDF_HEAD: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<cdf:Benchmark xmlns:cdf="http://checklists.nist.gov/xccdf/1.2" id="xccdf_mil.disa.stig_benchmark_Windows_10_STIG">
<cdf:status>accepted</cdf:status><cdf:title>Microsoft Windows 10 Security Technical Implementation Guide</cdf:title>"#;

const GNMAP_HEAD: &[u8] = b"# Nmap 7.94 scan initiated Tue Jan 16 10:00:00 2024 as: nmap -oG sweep.gnmap 10.0.0.0/24\n\
Host: 10.0.0.5 (web01.corp.example)\tStatus: Up\n\
Host: 10.0.0.5 (web01.corp.example)\tPorts: 80/open/tcp//http///, 443/open/tcp//https///\n";

const ECHECKLIST_HEAD: &[u8] = b"STIG ID,VMS ID,CAT,IA Controls,Short Title,WEB01,Notes\n\
WN10-00-000005,V-220697,II,ECSC-1,Domain-joined systems must use Windows 10 Enterprise,NF,\n";

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    // 확장자로 바로 결정
    group.bench_function("by_extension", |b| {
        b.iter(|| classify_bytes(black_box("web01.nessus"), black_box(NESSUS_HEAD)))
    });

    // 내용 판별
    for (name, head) in [
        ("nessus", NESSUS_HEAD),
        ("xccdf", XCCDF_HEAD),
        ("nmap_grep", GNMAP_HEAD),
        ("echecklist", ECHECKLIST_HEAD),
    ] {
        group.bench_with_input(BenchmarkId::new("sniff", name), &head, |b, head| {
            b.iter(|| classify_bytes(black_box("upload.dat"), black_box(head)))
        });
    }

    group.finish();
}

fn input(status: FindingStatus, note: &str) -> MergeInput {
    MergeInput {
        status,
        cat_override: None,
        note: Some(note.to_owned()),
        scan_id: 7,
        source: "Nessus".to_owned(),
    }
}

fn existing(status: FindingStatus, notes: &str) -> FindingRow {
    FindingRow {
        target_id: 1,
        pdi_id: 1,
        status,
        cat_override: None,
        notes: notes.to_owned(),
        iteration: 1,
        scan_id: 3,
        source: "SCC".to_owned(),
        partial: false,
    }
}

fn bench_merge(c: &mut Criterion) {
    let policy = DeconflictPolicy::default();
    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(1));

    group.bench_function("new_finding", |b| {
        let incoming = input(FindingStatus::Open, "FAILED: Windows 10 Pro");
        b.iter(|| merge(None, black_box(&incoming), &policy, NoteOrder::Append))
    });

    // flagged 기존 상태 + resolved 새 보고
    group.bench_function("flagged_over_resolved", |b| {
        let incoming = input(FindingStatus::NotAFinding, "PASSED: Windows 10 Enterprise");
        let prev = existing(FindingStatus::Open, "[SCC] result: fail");
        b.iter(|| {
            merge(
                Some(black_box(prev.clone())),
                black_box(&incoming),
                &policy,
                NoteOrder::Append,
            )
        })
    });

    group.finish();
}

fn bench_notes(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate_notes");

    // 노트 이력이 길어질수록 중복 검사 비용 증가
    for entries in [1usize, 10, 100] {
        let history = (0..entries)
            .map(|i| format!("[Nessus] FAILED: run {i}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &history, |b, history| {
            b.iter(|| {
                accumulate_notes(
                    black_box(history),
                    black_box("[SCC] result: pass"),
                    NoteOrder::Append,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify, bench_merge, bench_notes);
criterion_main!(benches);
