//! 저장소 에러 타입
//!
//! [`StoreError`]는 SQLite 접근 중 발생하는 모든 에러를 나타냅니다.
//! `From<StoreError> for StigpostError` 구현으로 상위 에러로 전파됩니다.

use stigpost_core::error::{StigpostError, StorageError};

/// 저장소 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite 에러
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// 데이터베이스 디렉토리 생성 실패
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 연결 뮤텍스가 오염됨 (다른 스레드가 잠금을 쥔 채 패닉)
    #[error("store connection lock poisoned")]
    Lock,

    /// JSON 컬럼 직렬화 실패
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// 참조된 레코드가 없음
    #[error("{what} not found: {key}")]
    NotFound {
        /// 레코드 종류
        what: &'static str,
        /// 조회 키
        key: String,
    },

    /// 저장된 값이 도메인 타입으로 해석되지 않음
    #[error("corrupt column {column}: {value}")]
    Corrupt {
        /// 컬럼 이름
        column: &'static str,
        /// 저장된 값
        value: String,
    },
}

impl From<StoreError> for StigpostError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Sqlite(e) => match e {
                rusqlite::Error::SqliteFailure(_, _) => {
                    StigpostError::Storage(StorageError::Connection(e.to_string()))
                }
                other => StigpostError::Storage(StorageError::Query(other.to_string())),
            },
            other => StigpostError::Storage(StorageError::Query(other.to_string())),
        }
    }
}
