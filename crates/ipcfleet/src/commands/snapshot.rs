//! `ipcfleet snapshot`: save a JPEG from one channel.

use serde::Serialize;

use ipcfleet_api::cgi::media;

use crate::cli::{GlobalOpts, SnapshotArgs};
use crate::commands::{Context, save_stream};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SnapshotOutput {
    device: String,
    channel: u32,
    path: String,
    content_type: String,
    bytes: u64,
}

pub async fn handle(ctx: &Context, args: SnapshotArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = ctx.client(&args.device).await?;
    let snapshot = media::snapshot(client.cgi(), args.channel).await?;
    let content_type = snapshot.content_type.clone();
    tracing::debug!(
        device = %args.device,
        content_type = %content_type,
        length = ?snapshot.content_length,
        "snapshot response"
    );

    let written = save_stream(&ctx.cancel, snapshot.into_stream(), &args.output).await?;

    let out = SnapshotOutput {
        device: args.device,
        channel: args.channel,
        path: args.output.display().to_string(),
        content_type,
        bytes: written,
    };
    let rendered = output::render_single(
        &global.format,
        &out,
        |o| format!("Saved {} ({} bytes, {})", o.path, o.bytes, o.content_type),
        |o| o.path.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
