use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use stigpost_core::config::StigpostConfig;
use stigpost_daemon::cli::DaemonCli;
use stigpost_daemon::{JobDescriptor, Orchestrator, ProcessLauncher, logging};
use stigpost_store::Store;

/// 사용법/설정 에러 종료 코드
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    // 설정과 배치 기술자는 로깅 초기화 전에 검증 (실패 시 사용법 에러)
    let mut config = match StigpostConfig::load_or_default(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("stigpost-daemon: configuration error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    let descriptor = match JobDescriptor::load(&cli.descriptor).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("stigpost-daemon: {e:#}");
            eprintln!("usage: stigpost-daemon --descriptor <batch.toml> [--config <path>] [--debug]");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let debug = cli.debug || descriptor.debug;
    if let Err(e) = logging::init_tracing(&config.general, debug) {
        eprintln!("stigpost-daemon: {e:#}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(&cli, config, descriptor, debug).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "batch failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: &DaemonCli,
    config: StigpostConfig,
    descriptor: JobDescriptor,
    debug: bool,
) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        context_id = descriptor.context_id,
        working_dir = %descriptor.working_dir.display(),
        "stigpost-daemon starting"
    );
    stigpost_core::metrics::describe_all();

    let store = Store::open(&config.store.db_path, config.store.busy_timeout_ms)
        .with_context(|| format!("failed to open store {}", config.store.db_path))?;
    let worker_bin = ProcessLauncher::resolve_worker_bin(&config.orchestrator.worker_bin)?;
    let config_arg = cli.config.exists().then(|| cli.config.clone());
    let launcher = ProcessLauncher::new(worker_bin, config_arg);
    tracing::debug!(worker_bin = %launcher.worker_bin().display(), "worker launcher ready");

    let mut orchestrator = Orchestrator::new(config, Arc::new(store), launcher, descriptor)
        .with_descriptor_path(&cli.descriptor)
        .with_debug(debug);
    let summary = orchestrator.run().await?;

    let json = serde_json::to_string(&summary).context("failed to serialize batch summary")?;
    println!("{json}");
    Ok(())
}
