//! `stigpost` command-line tool.
//!
//! - [`cli`]: clap argument definitions
//! - [`commands`]: one handler per subcommand
//! - [`output`]: text / JSON rendering
//! - [`error`]: `CliError` and exit codes
//! - [`logging`]: tracing subscriber setup (stderr)

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
