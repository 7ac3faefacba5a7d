//! CLI-specific error types and exit code mapping

use stigpost_core::error::StigpostError;
use stigpost_ingest::IngestError;
use stigpost_store::StoreError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The shared database could not be opened.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database query failed after the store was opened.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// File could not be ingested.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from stigpost-core.
    #[error("{0}")]
    Core(#[from] StigpostError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                          |
    /// |------|----------------------------------|
    /// | 0    | Success                          |
    /// | 1    | Command / format error           |
    /// | 2    | Configuration or usage error     |
    /// | 3    | Store unavailable                |
    /// | 10   | IO error                         |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(StigpostError::Config(_)) => 2,
            Self::StoreUnavailable(_) => 3,
            Self::Io(_) => 10,
            Self::JsonSerialize(_)
            | Self::Command(_)
            | Self::Store(_)
            | Self::Ingest(_)
            | Self::Core(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigpost_core::error::ConfigError;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("bad".to_owned());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_core_config_error() {
        let err = CliError::Core(StigpostError::Config(ConfigError::InvalidValue {
            field: "orchestrator.max_results".to_owned(),
            reason: "must be between 1 and 256".to_owned(),
        }));
        assert_eq!(err.exit_code(), 2, "config errors from core map to 2");
    }

    #[test]
    fn test_exit_code_store_unavailable() {
        let err = CliError::StoreUnavailable("/var/lib/stigpost/stigpost.db".to_owned());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_io_error() {
        let err = CliError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn test_exit_code_command_and_ingest_errors() {
        assert_eq!(CliError::Command("x".to_owned()).exit_code(), 1);
        let err = CliError::Ingest(IngestError::Format {
            path: "a.nessus".to_owned(),
            reason: "truncated".to_owned(),
        });
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_display_messages() {
        let err = CliError::StoreUnavailable("locked".to_owned());
        assert_eq!(err.to_string(), "store unavailable: locked");
        let err = CliError::Config("missing".to_owned());
        assert_eq!(err.to_string(), "configuration error: missing");
    }
}
