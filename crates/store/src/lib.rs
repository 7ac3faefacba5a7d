#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: 저장소 에러 (`StoreError`)
//! - [`schema`]: 테이블 정의와 연결 초기화
//! - [`catalog`]: PDI, 식별자 매핑, 소프트웨어, 체크리스트
//! - [`assets`]: 자산, 인터페이스, 포트
//! - [`scans`]: 스캔 레코드
//! - [`findings`]: 발견 항목
//! - [`jobs`]: 작업 상태

pub mod assets;
pub mod catalog;
pub mod error;
pub mod findings;
pub mod jobs;
pub mod scans;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

pub use assets::{Asset, Interface, InterfaceFields, InterfaceKey, PortRecord, Protocol};
pub use catalog::{Checklist, Pdi, PdiDraft, Software};
pub use error::StoreError;
pub use findings::FindingRow;
pub use jobs::JobRecord;
pub use scans::Scan;

/// 기본 busy timeout (밀리초)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// 공유 상태 저장소
///
/// 프로세스마다 하나의 연결을 가지며, 여러 프로세스가 같은 파일을 엽니다.
/// 동일 프로세스 내의 여러 태스크는 내부 뮤텍스로 연결을 공유합니다.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// 파일 기반 저장소를 엽니다 (없으면 생성).
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        schema::init(&conn, busy_timeout_ms)?;
        debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 테스트용 메모리 저장소를 엽니다.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// 빈 문자열을 `None`으로 정규화합니다.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
