//! Tracing setup for the `stigpost` binary.
//!
//! Logs go to stderr so that stdout stays reserved for command output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stigpost_core::config::GeneralConfig;

use crate::error::CliError;

/// 우선순위: `--debug` > `--log-level` > `RUST_LOG` > `general.log_level`
pub fn level_for(config: &GeneralConfig, cli_level: Option<&str>, debug: bool) -> String {
    if debug {
        return "debug".to_owned();
    }
    if let Some(level) = cli_level {
        return level.to_owned();
    }
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.log_level.clone())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(config: &GeneralConfig, cli_level: Option<&str>, debug: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(level_for(config, cli_level, debug))
        .map_err(|e| CliError::Config(format!("invalid log level: {e}")))?;
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr);

    // 이미 설치된 경우 try_init 실패는 무시
    let _ = match config.log_format.as_str() {
        "json" => registry.with(layer.json()).try_init(),
        "pretty" => registry.with(layer.pretty()).try_init(),
        other => {
            return Err(CliError::Config(format!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            )));
        }
    };
    Ok(())
}
