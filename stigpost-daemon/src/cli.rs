//! CLI argument definitions for stigpost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Stigpost batch orchestrator.
///
/// Reads a job descriptor, classifies every file in its working directory
/// and runs one ingest worker process per file, never more than
/// `orchestrator.max_results` at a time.
#[derive(Parser, Debug)]
#[command(name = "stigpost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the batch job descriptor (TOML).
    #[arg(short = 'f', long)]
    pub descriptor: PathBuf,

    /// Path to stigpost.toml configuration file.
    #[arg(short, long, default_value = "/etc/stigpost/stigpost.toml")]
    pub config: PathBuf,

    /// Verbose logging; files are neither moved nor deleted.
    #[arg(short, long)]
    pub debug: bool,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_required() {
        let result = DaemonCli::try_parse_from(["stigpost-daemon"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_all_flags() {
        let cli = DaemonCli::try_parse_from([
            "stigpost-daemon",
            "--descriptor",
            "/tmp/batch.toml",
            "--config",
            "/tmp/stigpost.toml",
            "--debug",
            "--log-format",
            "pretty",
        ])
        .unwrap();
        assert_eq!(cli.descriptor, PathBuf::from("/tmp/batch.toml"));
        assert_eq!(cli.config, PathBuf::from("/tmp/stigpost.toml"));
        assert!(cli.debug);
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
    }

    #[test]
    fn help_is_informational() {
        let err = DaemonCli::try_parse_from(["stigpost-daemon", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }
}
