mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ipcfleet_core::Fleet;

use crate::cli::{Cli, Command, EventsArgs};
use crate::commands::Context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.global.config.clone().unwrap_or_else(ipcfleet_config::config_path);
    let config = ipcfleet_config::load_config_from(&config_path).map_err(|e| CliError::config(&config_path, e))?;
    tracing::debug!(path = %config_path.display(), devices = config.devices.len(), "config loaded");

    let mut fleet_config = ipcfleet_config::fleet_config(&config.defaults);
    if let Command::Events(EventsArgs {
        heartbeat: Some(heartbeat),
        ..
    }) = cli.command
    {
        fleet_config.heartbeat = Some(heartbeat).filter(|h| *h != 0);
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let ctx = Context {
        fleet: Fleet::new(fleet_config, cancel.clone()),
        config,
        config_path,
        cancel,
    };

    tracing::debug!(command = ?cli.command, "dispatching command");
    let result = commands::dispatch(cli.command, &ctx, &cli.global).await;
    ctx.fleet.shutdown().await;
    result
}

/// Cancel `cancel` on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                    return;
                }
                tracing::info!("interrupted, shutting down");
                cancel.cancel();
            }
        }
    });
}
