//! Logging initialization for stigpost-daemon.
//!
//! Configures `tracing-subscriber` based on the `[general]` section
//! of `StigpostConfig`. Supports JSON structured logging and
//! human-readable pretty format.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stigpost_core::config::GeneralConfig;

/// Filter directive to use: `--debug` > `RUST_LOG` > `general.log_level`.
pub fn filter_directive(config: &GeneralConfig, debug: bool) -> String {
    if debug {
        return "debug".to_owned();
    }
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => directive,
        _ => config.log_level.clone(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (default for production)
/// * `"pretty"` - Human-readable colored output (for development)
pub fn init_tracing(config: &GeneralConfig, debug: bool) -> Result<()> {
    let filter = EnvFilter::try_new(filter_directive(config, debug))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            ));
        }
    };
    result.map_err(|e| {
        anyhow::anyhow!(
            "failed to initialize {} tracing subscriber: {}",
            config.log_format,
            e
        )
    })
}
