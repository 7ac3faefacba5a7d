//! 에러 타입 -- 도메인별 에러 정의

/// Stigpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum StigpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 수집(ingest) 처리 에러
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestFailure),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 지원하지 않는 형식
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),
}

/// 수집 파이프라인 에러 (파일 단위 실패)
#[derive(Debug, thiserror::Error)]
pub enum IngestFailure {
    /// 파일 형식이 선언된 소스 형식과 맞지 않음
    #[error("format error: {0}")]
    Format(String),

    /// 외부 취소 (에러가 아닌 정상 중단)
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// 기타 처리 실패
    #[error("failed: {0}")]
    Failed(String),
}
