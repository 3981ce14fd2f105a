//! Command dispatch: bridges CLI args -> fleet services -> output formatting.

pub mod devices;
pub mod download;
pub mod events;
pub mod rpc;
pub mod scan;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use ipcfleet_config::Config;
use ipcfleet_core::{DeviceClient, Fleet};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Everything a device-bound command needs.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub fleet: Fleet,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}

impl Context {
    /// Register `id` with the fleet, resolving its credentials on first use.
    pub async fn register(&self, id: &str) -> Result<(), CliError> {
        if self.fleet.contains(id) {
            return Ok(());
        }
        let entry = self.config.device(id).map_err(|e| self.config_error(e))?;
        let device = ipcfleet_config::device_config(entry).map_err(|e| self.config_error(e))?;
        self.fleet.upsert(device).await;
        Ok(())
    }

    /// Client for a configured device.
    pub async fn client(&self, id: &str) -> Result<Arc<DeviceClient>, CliError> {
        self.register(id).await?;
        Ok(self.fleet.get(id)?)
    }

    fn config_error(&self, err: ipcfleet_config::ConfigError) -> CliError {
        CliError::config(&self.config_path, err)
    }
}

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices => devices::handle(&ctx.config, global),
        Command::Rpc(args) => rpc::handle(ctx, args, global).await,
        Command::Events(args) => events::handle(ctx, args, global).await,
        Command::Snapshot(args) => snapshot::handle(ctx, args, global).await,
        Command::Scan(args) => scan::handle(ctx, args, global).await,
        Command::Download(args) => download::handle(ctx, args, global).await,
    }
}

/// Write a media body to `path`, returning the number of bytes written.
///
/// Stops with [`CliError::Cancelled`] when `cancel` fires mid-transfer.
pub(crate) async fn save_stream(
    cancel: &CancellationToken,
    stream: impl Stream<Item = Result<Bytes, ipcfleet_api::Error>>,
    path: &Path,
) -> Result<u64, CliError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = std::pin::pin!(stream);
    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CliError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
    }
    file.flush().await?;
    Ok(written)
}
