//! `stigpost` -- scan file worker and job management.

use std::process::ExitCode;

use clap::Parser;

use stigpost_cli::cli::{Cli, Commands};
use stigpost_cli::commands::{self, open_store};
use stigpost_cli::error::CliError;
use stigpost_cli::logging;
use stigpost_cli::output::OutputWriter;
use stigpost_core::config::StigpostConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    match cli.command {
        // 설정 파일 자체를 다루므로 설정 로딩 전에 분기
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
        command => {
            let config = StigpostConfig::load_or_default(&cli.config).await?;
            let debug = matches!(&command, Commands::Parse(args) if args.debug);
            logging::init(&config.general, cli.log_level.as_deref(), debug)?;
            stigpost_core::metrics::describe_all();
            dispatch(command, config, &writer).await
        }
    }
}

async fn dispatch(
    command: Commands,
    config: StigpostConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match command {
        Commands::Parse(args) => commands::parse::execute(args, config, writer).await,
        Commands::Classify(args) => commands::classify::execute(args, writer),
        Commands::Jobs(args) => commands::jobs::execute(args, &open_store(&config)?, writer),
        Commands::Cancel(args) => commands::cancel::execute(args, &open_store(&config)?, writer),
        Commands::Config(_) => Ok(()),
    }
}
