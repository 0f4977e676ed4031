use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use launchpad::{
    cli::Cli,
    commands::Context,
    config::{self, SearchRoots},
    exit_code, logging,
    output::Output,
    EXIT_SUCCESS,
};
use launchpad_mcp::RmcpConnector;
use tracing::debug;

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let output = Output::new(cli.json);
    let settings = cli.runtime.settings();

    let loaded = match config::load(
        cli.config.as_deref(),
        cli.env_file.as_deref(),
        &SearchRoots::from_process(),
    ) {
        Ok(loaded) => loaded,
        Err(e) => {
            output.error(&e);
            return Ok(exit_code(&e));
        }
    };
    debug!(
        "Using config {} with {} servers",
        loaded.config_path.display(),
        loaded.registry.len()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let connector = Arc::new(RmcpConnector::new(cli.verbose));
    let command = cli.command;
    let code = runtime.block_on(async move {
        let context = Context::new(
            loaded.registry,
            connector,
            settings.gateway,
            settings.cache_dir,
        );
        let reaper = context.manager().clone().spawn_idle_reaper(IDLE_SWEEP_INTERVAL);
        let outcome = context.execute(command).await;
        context.shutdown().await;
        reaper.abort();

        match outcome {
            Ok(report) => {
                output.report(&report);
                EXIT_SUCCESS
            }
            Err(e) => {
                output.error(&e);
                exit_code(&e)
            }
        }
    });
    Ok(code)
}
