//! 파일 분류기
//!
//! 확장자를 먼저 확인하고, 확장자로 결정되지 않으면 파일 앞부분의 표식과
//! 줄 패턴으로 형식을 판별합니다. 판별할 수 없는 파일은 [`SourceType::Unsupported`]가 되며
//! 에러를 내지 않습니다. 디렉토리는 분류하지 않습니다 (`None`).
//!
//! 분류는 부수 효과가 없으며 같은 내용에 대해 항상 같은 결과를 냅니다.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use stigpost_core::types::SourceType;
use tracing::{debug, warn};

/// 내용 확인에 읽는 최대 바이트 수
pub const SNIFF_BYTES: usize = 64 * 1024;

/// 경로를 분류합니다. 디렉토리면 `None`.
///
/// 읽을 수 없는 파일은 `Unsupported`로 분류됩니다.
pub fn classify_path(path: &Path) -> Option<SourceType> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "cannot stat file, treating as unsupported");
            return Some(SourceType::Unsupported);
        }
    };
    if meta.is_dir() {
        return None;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let head = match read_head(path) {
        Ok(head) => head,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "cannot read file, treating as unsupported");
            return Some(SourceType::Unsupported);
        }
    };

    let source = classify_bytes(&name, &head);
    debug!(file = %path.display(), source = %source, "classified");
    Some(source)
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// 파일 이름과 앞부분 바이트로 형식을 판별합니다 (순수 함수).
pub fn classify_bytes(file_name: &str, head: &[u8]) -> SourceType {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let text = String::from_utf8_lossy(head);

    match ext.as_str() {
        "nessus" => return SourceType::Nessus,
        "ckl" => return SourceType::StigViewer,
        "nmap" => return SourceType::NmapText,
        "gnmap" => return SourceType::NmapGrep,
        "csv" => {
            return if looks_like_echecklist(&text) {
                SourceType::EChecklist
            } else {
                SourceType::Unsupported
            };
        }
        "xlsx" | "xls" | "xlsm" => return SourceType::Unsupported,
        _ => {}
    }

    sniff(&text)
}

/// 내용만으로 형식을 판별합니다.
fn sniff(text: &str) -> SourceType {
    if text.contains("<NessusClientData_v2") {
        return SourceType::Nessus;
    }
    if text.contains("<CHECKLIST") {
        return SourceType::StigViewer;
    }
    if text.contains("<nmaprun") {
        return SourceType::NmapXml;
    }
    if text.contains("<SecScan") {
        return SourceType::Mbsa;
    }
    if looks_like_xccdf(text) {
        return SourceType::SccXccdf;
    }
    // greppable과 일반 텍스트는 모두 "# Nmap ... scan initiated" 머리말을 가지므로 줄 패턴으로 구분
    if looks_like_nmap_grep(text) {
        return SourceType::NmapGrep;
    }
    if text.contains("Nmap scan report for") {
        return SourceType::NmapText;
    }
    if looks_like_echecklist(text) {
        return SourceType::EChecklist;
    }
    SourceType::Unsupported
}

fn looks_like_xccdf(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("xccdf") && (text.contains("Benchmark") || text.contains("TestResult"))
}

fn looks_like_nmap_grep(text: &str) -> bool {
    text.lines().any(|line| {
        line.starts_with("Host: ") && (line.contains("Ports: ") || line.contains("Status: "))
    })
}

/// 헤더 행을 찾을 때 확인하는 앞쪽 줄 수 (제목 행 허용)
const ECHECKLIST_HEADER_LINES: usize = 10;

fn looks_like_echecklist(text: &str) -> bool {
    text.trim_start_matches('\u{feff}')
        .lines()
        .take(ECHECKLIST_HEADER_LINES)
        .any(|line| {
            let first = line.split(',').next().unwrap_or_default();
            first.trim().trim_matches('"').eq_ignore_ascii_case("STIG ID")
                && line.contains("Short Title")
        })
}
