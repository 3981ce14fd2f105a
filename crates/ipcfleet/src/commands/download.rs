//! `ipcfleet download`: fetch a recorded file over the RPC session.

use serde::Serialize;

use ipcfleet_api::cgi::media;

use crate::cli::{DownloadArgs, GlobalOpts};
use crate::commands::{Context, save_stream};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct DownloadOutput {
    device: String,
    source: String,
    path: String,
    content_type: String,
    bytes: u64,
}

pub async fn handle(ctx: &Context, args: DownloadArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if !args.path.starts_with('/') {
        return Err(CliError::Validation {
            field: "path".into(),
            reason: format!("'{}' is not an absolute device path", args.path),
        });
    }

    let client = ctx.client(&args.device).await?;
    let file = media::load_file(client.rpc(), &args.path)
        .await
        .map_err(|e| CliError::device(&args.device, e))?;
    let content_type = file.content_type.clone();
    tracing::debug!(
        device = %args.device,
        source = %args.path,
        length = ?file.content_length,
        "download response"
    );

    let written = save_stream(&ctx.cancel, file.into_stream(), &args.output).await?;

    let out = DownloadOutput {
        device: args.device,
        source: args.path,
        path: args.output.display().to_string(),
        content_type,
        bytes: written,
    };
    let rendered = output::render_single(
        &global.format,
        &out,
        |o| format!("Saved {} to {} ({} bytes)", o.source, o.path, o.bytes),
        |o| o.path.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
