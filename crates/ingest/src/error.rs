//! 수집 에러 타입
//!
//! [`IngestError`]는 파일 하나를 처리하는 동안 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<IngestError> for StigpostError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 카테고리
//!
//! - **설정**: `Config`
//! - **형식**: `Format`, `UnsupportedSource`, `FileTooBig`
//! - **파일 I/O**: `Io`
//! - **저장소**: `Store`
//! - **외부 취소**: `Cancelled` (에러가 아닌 정상 중단 신호)

use stigpost_core::error::{ConfigError, IngestFailure, StigpostError};
use stigpost_store::StoreError;

/// 수집 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 내용이 선언된 형식과 맞지 않음
    #[error("format error: {path}: {reason}")]
    Format {
        /// 대상 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 저장소 에러 (병합 도중 실패 포함)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 외부에서 작업이 TERMINATED로 표시됨
    #[error("job {job_id} cancelled")]
    Cancelled {
        /// 취소된 작업 id
        job_id: i64,
    },

    /// 처리할 수 있는 파서가 없는 형식
    #[error("unsupported source: {path}")]
    UnsupportedSource {
        /// 대상 파일 경로
        path: String,
    },

    /// 파일 크기 초과
    #[error("file too large: {path}: {size} bytes (max: {max})")]
    FileTooBig {
        /// 파일 경로
        path: String,
        /// 실제 파일 크기 (바이트)
        size: u64,
        /// 최대 허용 크기 (바이트)
        max: u64,
    },
}

impl IngestError {
    /// 형식 에러 생성 헬퍼
    pub fn format(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 외부 취소 여부
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<IngestError> for StigpostError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Config { field, reason } => {
                StigpostError::Config(ConfigError::InvalidValue { field, reason })
            }
            IngestError::Store(e) => e.into(),
            IngestError::Cancelled { job_id } => {
                StigpostError::Ingest(IngestFailure::Cancelled(format!("job {job_id}")))
            }
            e @ (IngestError::Format { .. }
            | IngestError::UnsupportedSource { .. }
            | IngestError::FileTooBig { .. }) => {
                StigpostError::Ingest(IngestFailure::Format(e.to_string()))
            }
            e @ IngestError::Io { .. } => {
                StigpostError::Ingest(IngestFailure::Failed(e.to_string()))
            }
        }
    }
}
