//! 설정 관리 -- stigpost.toml 파싱 및 런타임 설정
//!
//! [`StigpostConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`STIGPOST_ORCHESTRATOR_MAX_RESULTS=8` 형식)
//! 3. 설정 파일 (`stigpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), stigpost_core::error::StigpostError> {
//! use stigpost_core::config::StigpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = StigpostConfig::load("stigpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = StigpostConfig::parse("[orchestrator]\nmax_results = 3")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, StigpostError};

/// 동시 워커 수 상한
const MAX_RESULTS_LIMIT: usize = 256;

/// Stigpost 통합 설정
///
/// `stigpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StigpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 오케스트레이터 설정
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// 수집(파서/워커) 설정
    #[serde(default)]
    pub ingest: IngestConfig,
    /// 상태 병합 정책
    #[serde(default)]
    pub deconfliction: DeconflictionConfig,
}

impl StigpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StigpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 설정 파일이 없으면 기본값을 사용하여 로드합니다.
    ///
    /// 워커는 설정 파일 없이도 기본 저장소 경로로 동작할 수 있어야 합니다.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, StigpostError> {
        match Self::load(path.as_ref()).await {
            Ok(config) => Ok(config),
            Err(StigpostError::Config(ConfigError::FileNotFound { path })) => {
                warn!(path = %path, "config file not found, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StigpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StigpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                StigpostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, StigpostError> {
        toml::from_str(toml_str).map_err(|e| {
            StigpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `STIGPOST_{SECTION}_{FIELD}`
    /// 예: `STIGPOST_STORE_DB_PATH=/tmp/stigpost.db`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "STIGPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "STIGPOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "STIGPOST_GENERAL_DATA_DIR");

        // Store
        override_string(&mut self.store.db_path, "STIGPOST_STORE_DB_PATH");
        override_u64(
            &mut self.store.busy_timeout_ms,
            "STIGPOST_STORE_BUSY_TIMEOUT_MS",
        );

        // Orchestrator
        override_usize(
            &mut self.orchestrator.max_results,
            "STIGPOST_ORCHESTRATOR_MAX_RESULTS",
        );
        override_u64(
            &mut self.orchestrator.poll_interval_ms,
            "STIGPOST_ORCHESTRATOR_POLL_INTERVAL_MS",
        );
        override_string(
            &mut self.orchestrator.worker_bin,
            "STIGPOST_ORCHESTRATOR_WORKER_BIN",
        );
        override_bool(
            &mut self.orchestrator.reap_dead_workers,
            "STIGPOST_ORCHESTRATOR_REAP_DEAD_WORKERS",
        );

        // Ingest
        override_usize(
            &mut self.ingest.cancel_check_records,
            "STIGPOST_INGEST_CANCEL_CHECK_RECORDS",
        );
        override_u64(
            &mut self.ingest.cancel_check_secs,
            "STIGPOST_INGEST_CANCEL_CHECK_SECS",
        );
        override_u64(&mut self.ingest.max_file_size, "STIGPOST_INGEST_MAX_FILE_SIZE");
        override_usize(
            &mut self.ingest.max_host_columns,
            "STIGPOST_INGEST_MAX_HOST_COLUMNS",
        );
        override_usize(
            &mut self.ingest.progress_every_records,
            "STIGPOST_INGEST_PROGRESS_EVERY_RECORDS",
        );

        // Deconfliction
        override_string(
            &mut self.deconfliction.flagged_precedence,
            "STIGPOST_DECONFLICTION_FLAGGED_PRECEDENCE",
        );
        override_string(
            &mut self.deconfliction.resolved_precedence,
            "STIGPOST_DECONFLICTION_RESOLVED_PRECEDENCE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), StigpostError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.store.db_path.is_empty() {
            return Err(invalid("store.db_path", "must not be empty".to_owned()));
        }

        if self.orchestrator.max_results == 0 || self.orchestrator.max_results > MAX_RESULTS_LIMIT
        {
            return Err(invalid(
                "orchestrator.max_results",
                format!("must be 1-{MAX_RESULTS_LIMIT}"),
            ));
        }

        if !(10..=60_000).contains(&self.orchestrator.poll_interval_ms) {
            return Err(invalid(
                "orchestrator.poll_interval_ms",
                "must be 10-60000".to_owned(),
            ));
        }

        if self.ingest.cancel_check_records == 0 {
            return Err(invalid(
                "ingest.cancel_check_records",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.ingest.max_file_size == 0 {
            return Err(invalid(
                "ingest.max_file_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.ingest.max_host_columns == 0 {
            return Err(invalid(
                "ingest.max_host_columns",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.ingest.progress_every_records == 0 {
            return Err(invalid(
                "ingest.progress_every_records",
                "must be greater than 0".to_owned(),
            ));
        }

        let valid_flagged = ["open", "exception"];
        if !valid_flagged.contains(&self.deconfliction.flagged_precedence.as_str()) {
            return Err(invalid(
                "deconfliction.flagged_precedence",
                format!("must be one of: {}", valid_flagged.join(", ")),
            ));
        }

        let valid_resolved = ["latest", "not_a_finding", "not_applicable"];
        if !valid_resolved.contains(&self.deconfliction.resolved_precedence.as_str()) {
            return Err(invalid(
                "deconfliction.resolved_precedence",
                format!("must be one of: {}", valid_resolved.join(", ")),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> StigpostError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/stigpost".to_owned(),
        }
    }
}

/// 저장소 설정
///
/// 오케스트레이터와 모든 워커 프로세스가 같은 SQLite 파일을 공유합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite 데이터베이스 파일 경로
    pub db_path: String,
    /// 잠금 대기 시간 (밀리초)
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "/var/lib/stigpost/stigpost.db".to_owned(),
            busy_timeout_ms: 30_000,
        }
    }
}

/// 오케스트레이터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 컨텍스트당 동시 실행 워커 최대 수 (MAX_RESULTS)
    pub max_results: usize,
    /// 작업 테이블 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,
    /// 워커 실행 파일 경로 (비어 있으면 실행 중인 바이너리 옆의 `stigpost`)
    pub worker_bin: String,
    /// 완료 보고 없이 종료된 워커의 작업을 ERROR로 표시
    pub reap_dead_workers: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            poll_interval_ms: 1_000,
            worker_bin: String::new(),
            reap_dead_workers: true,
        }
    }
}

/// 수집(파서/워커) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 취소 여부를 확인할 레코드 간격 (N)
    pub cancel_check_records: usize,
    /// 취소 여부를 확인할 시간 간격 (초, M)
    pub cancel_check_secs: u64,
    /// 입력 파일 최대 크기 (바이트)
    pub max_file_size: u64,
    /// 스프레드시트 체크리스트의 최대 호스트 열 수
    pub max_host_columns: usize,
    /// 진행률을 게시할 레코드 간격
    pub progress_every_records: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cancel_check_records: 50,
            cancel_check_secs: 5,
            max_file_size: 512 * 1024 * 1024, // 512 MiB
            max_host_columns: 64,
            progress_every_records: 25,
        }
    }
}

/// 상태 병합 정책
///
/// 계층 경계(flagged > resolved > unknown)는 고정이며,
/// 여기서는 같은 계층 안의 우선순위만 조정합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconflictionConfig {
    /// flagged 계층 내 우선 상태 (open, exception)
    pub flagged_precedence: String,
    /// resolved 계층 내 우선 상태 (latest, not_a_finding, not_applicable)
    pub resolved_precedence: String,
}

impl Default for DeconflictionConfig {
    fn default() -> Self {
        Self {
            flagged_precedence: "open".to_owned(),
            resolved_precedence: "latest".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = StigpostConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.orchestrator.max_results, 5);
        assert!(config.orchestrator.reap_dead_workers);
        assert_eq!(config.deconfliction.flagged_precedence, "open");
        assert_eq!(config.deconfliction.resolved_precedence, "latest");
    }

    #[test]
    fn default_config_passes_validation() {
        StigpostConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = StigpostConfig::parse("").unwrap();
        assert_eq!(config.store.busy_timeout_ms, 30_000);
        assert_eq!(config.ingest.cancel_check_records, 50);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[orchestrator]
max_results = 3

[store]
db_path = "/tmp/stigpost-test.db"
"#;
        let config = StigpostConfig::parse(toml).unwrap();
        assert_eq!(config.orchestrator.max_results, 3);
        // poll_interval_ms는 기본값 유지
        assert_eq!(config.orchestrator.poll_interval_ms, 1_000);
        assert_eq!(config.store.db_path, "/tmp/stigpost-test.db");
    }

    #[test]
    fn from_str_full_toml() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
data_dir = "/opt/stigpost"

[store]
db_path = "/opt/stigpost/state.db"
busy_timeout_ms = 5000

[orchestrator]
max_results = 8
poll_interval_ms = 250
worker_bin = "/usr/local/bin/stigpost"
reap_dead_workers = false

[ingest]
cancel_check_records = 10
cancel_check_secs = 2
max_file_size = 1048576
max_host_columns = 12
progress_every_records = 5

[deconfliction]
flagged_precedence = "exception"
resolved_precedence = "not_applicable"
"#;
        let config = StigpostConfig::parse(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.orchestrator.max_results, 8);
        assert!(!config.orchestrator.reap_dead_workers);
        assert_eq!(config.ingest.max_host_columns, 12);
        assert_eq!(config.deconfliction.resolved_precedence, "not_applicable");
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = StigpostConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            StigpostError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_max_results() {
        let mut config = StigpostConfig::default();
        config.orchestrator.max_results = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_results"));
    }

    #[test]
    fn validate_rejects_tiny_poll_interval() {
        let mut config = StigpostConfig::default();
        config.orchestrator.poll_interval_ms = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn validate_rejects_unknown_precedence() {
        let mut config = StigpostConfig::default();
        config.deconfliction.resolved_precedence = "newest".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resolved_precedence"));
    }

    #[test]
    fn validate_rejects_empty_db_path() {
        let mut config = StigpostConfig::default();
        config.store.db_path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_override_applies_to_orchestrator() {
        let mut config = StigpostConfig::default();
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("STIGPOST_ORCHESTRATOR_MAX_RESULTS", "7") };
        config.apply_env_overrides();
        assert_eq!(config.orchestrator.max_results, 7);
        unsafe { std::env::remove_var("STIGPOST_ORCHESTRATOR_MAX_RESULTS") };
    }

    #[test]
    #[serial]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = true;
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_STIGPOST_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_STIGPOST_BOOL_BAD");
        assert!(val);
        unsafe { std::env::remove_var("TEST_STIGPOST_BOOL_BAD") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_STIGPOST_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = StigpostConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = StigpostConfig::parse(&toml_str).unwrap();
        assert_eq!(config.store.db_path, parsed.store.db_path);
        assert_eq!(config.orchestrator.max_results, parsed.orchestrator.max_results);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = StigpostConfig::from_file("/nonexistent/path/stigpost.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StigpostError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
