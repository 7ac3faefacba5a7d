//! 작업 디렉토리 보관 구조
//!
//! ```text
//! <working_dir>/            수집 대기 파일
//!   echecklist/ nessus/ nmap/ scc/ stig_viewer/ mbsa/ mssql/
//!   unsupported/            분류 불가 파일
//!   terminated/             취소된 작업의 입력 파일
//! ```

use std::path::{Path, PathBuf};

use stigpost_core::types::SourceType;
use tracing::{debug, info};

use crate::error::IngestError;

/// 형식별 보관 디렉토리 (`mssql/`은 외부 적재용으로만 생성)
pub const HOLDING_DIRS: &[&str] = &[
    "echecklist",
    "nessus",
    "nmap",
    "scc",
    "stig_viewer",
    "mbsa",
    "mssql",
];

pub const UNSUPPORTED_DIR: &str = "unsupported";
pub const TERMINATED_DIR: &str = "terminated";

/// 파일의 최종 보관 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holding {
    Parsed(SourceType),
    Unsupported,
    Terminated,
}

impl Holding {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Parsed(source) => source.holding_dir().unwrap_or(UNSUPPORTED_DIR),
            Self::Unsupported => UNSUPPORTED_DIR,
            Self::Terminated => TERMINATED_DIR,
        }
    }
}

/// 작업 디렉토리 레이아웃
#[derive(Debug, Clone)]
pub struct HoldingLayout {
    root: PathBuf,
}

impl HoldingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 보관 디렉토리 경로
    pub fn dir(&self, holding: Holding) -> PathBuf {
        self.root.join(holding.dir_name())
    }

    /// 모든 보관 디렉토리를 만듭니다.
    pub fn ensure(&self) -> Result<(), IngestError> {
        for name in HOLDING_DIRS
            .iter()
            .chain([UNSUPPORTED_DIR, TERMINATED_DIR].iter())
        {
            let dir = self.root.join(name);
            std::fs::create_dir_all(&dir).map_err(|source| IngestError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        debug!(root = %self.root.display(), "holding layout ready");
        Ok(())
    }

    /// 수집 대기 파일 목록 (루트 바로 아래의 일반 파일, 이름순)
    pub fn pending_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let io_err = |source| IngestError::Io {
            path: self.root.display().to_string(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// 파일을 보관 디렉토리로 옮기고 새 경로를 반환합니다.
    ///
    /// 같은 이름이 있으면 `name.1.ext`처럼 번호를 붙이며, 장치가 달라 rename이
    /// 실패하면 복사 후 삭제합니다.
    pub fn relocate(&self, file: &Path, holding: Holding) -> Result<PathBuf, IngestError> {
        let dir = self.dir(holding);
        std::fs::create_dir_all(&dir).map_err(|source| IngestError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let dest = free_name(&dir, file);
        if std::fs::rename(file, &dest).is_err() {
            std::fs::copy(file, &dest).map_err(|source| IngestError::Io {
                path: dest.display().to_string(),
                source,
            })?;
            std::fs::remove_file(file).map_err(|source| IngestError::Io {
                path: file.display().to_string(),
                source,
            })?;
        }
        info!(from = %file.display(), to = %dest.display(), "file relocated");
        Ok(dest)
    }
}

fn free_name(dir: &Path, file: &Path) -> PathBuf {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_owned());
    let candidate = dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), format!(".{ext}")),
        _ => (name.clone(), String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem}.{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HoldingLayout::new(dir.path());
        layout.ensure().unwrap();
        for name in HOLDING_DIRS {
            assert!(dir.path().join(name).is_dir(), "{name} missing");
        }
        assert!(dir.path().join("unsupported").is_dir());
        assert!(dir.path().join("terminated").is_dir());
    }

    #[test]
    fn relocate_routes_by_holding() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HoldingLayout::new(dir.path());
        let file = dir.path().join("scan.gnmap");
        std::fs::write(&file, "x").unwrap();

        let dest = layout
            .relocate(&file, Holding::Parsed(SourceType::NmapGrep))
            .unwrap();
        assert_eq!(dest, dir.path().join("nmap").join("scan.gnmap"));
        assert!(!file.exists());
    }

    #[test]
    fn relocate_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HoldingLayout::new(dir.path());
        for _ in 0..2 {
            std::fs::write(dir.path().join("big.nessus"), "x").unwrap();
            layout
                .relocate(&dir.path().join("big.nessus"), Holding::Terminated)
                .unwrap();
        }
        assert!(dir.path().join("terminated/big.nessus").exists());
        assert!(dir.path().join("terminated/big.1.nessus").exists());
    }

    #[test]
    fn pending_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HoldingLayout::new(dir.path());
        layout.ensure().unwrap();
        std::fs::write(dir.path().join("b.ckl"), "x").unwrap();
        std::fs::write(dir.path().join("a.nessus"), "x").unwrap();
        let files = layout.pending_files().unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.nessus"), dir.path().join("b.ckl")]
        );
    }
}
