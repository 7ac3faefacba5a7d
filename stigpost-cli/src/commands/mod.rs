//! Command handlers -- one module per subcommand

pub mod cancel;
pub mod classify;
pub mod config;
pub mod jobs;
pub mod parse;

use stigpost_core::config::StigpostConfig;
use stigpost_store::Store;

use crate::error::CliError;

/// Open the shared database named in `[store]`.
pub fn open_store(config: &StigpostConfig) -> Result<Store, CliError> {
    Store::open(&config.store.db_path, config.store.busy_timeout_ms)
        .map_err(|e| CliError::StoreUnavailable(format!("{}: {e}", config.store.db_path)))
}
