#![no_main]

// 임의 내용의 파일을 각 형식으로 끝까지 수집해 봅니다.
// 형식 에러는 허용되지만 패닉은 허용되지 않습니다.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stigpost_core::config::StigpostConfig;
use stigpost_core::types::SourceType;
use stigpost_ingest::{WorkerRequest, worker};
use stigpost_store::Store;

#[derive(Arbitrary, Debug)]
struct Input {
    format: u8,
    content: Vec<u8>,
}

const NAMES: [&str; 8] = [
    "host.nessus",
    "host_xccdf.xml",
    "host.ckl",
    "sweep.xml",
    "sweep.nmap",
    "sweep.gnmap",
    "checklist.csv",
    "host_mbsa.xml",
];

fuzz_target!(|input: Input| {
    let index = usize::from(input.format) % SourceType::SUPPORTED.len();
    let Ok(dir) = tempfile::tempdir() else { return };
    let path = dir.path().join(NAMES[index]);
    if std::fs::write(&path, &input.content).is_err() {
        return;
    }
    let Ok(store) = Store::open_in_memory() else { return };

    let request = WorkerRequest {
        context_id: 1,
        path,
        source: Some(SourceType::SUPPORTED[index]),
        debug: true,
        ..WorkerRequest::default()
    };
    let _ = worker::run(&store, &StigpostConfig::default(), &request);
});
