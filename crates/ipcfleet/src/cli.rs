//! Clap derive structures for the `ipcfleet` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ipcfleet -- operate a fleet of Dahua-family IP cameras
#[derive(Debug, Parser)]
#[command(
    name = "ipcfleet",
    version,
    about = "Query and watch Dahua-family IP cameras from the command line",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "IPCFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', env = "IPCFLEET_FORMAT", default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List configured devices
    #[command(alias = "dev", alias = "d")]
    Devices,

    /// Send an authenticated raw RPC call
    Rpc(RpcArgs),

    /// Stream live camera events as JSON lines
    Events(EventsArgs),

    /// Save a JPEG snapshot
    Snapshot(SnapshotArgs),

    /// Scan recorded files over a time range
    Scan(ScanArgs),

    /// Download a recorded file from the device's storage
    #[command(alias = "dl")]
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
pub struct RpcArgs {
    /// Device id
    pub device: String,

    /// RPC method, e.g. magicBox.getSerialNo
    pub method: String,

    /// JSON params
    #[arg(long)]
    pub params: Option<String>,

    /// Object handle
    #[arg(long)]
    pub object: Option<i64>,
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Device ids (all configured devices when omitted)
    pub devices: Vec<String>,

    /// Heartbeat interval requested from the device, seconds (0 disables)
    #[arg(long)]
    pub heartbeat: Option<u32>,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Device id
    pub device: String,

    /// Video channel
    #[arg(long, default_value = "1")]
    pub channel: u32,

    /// Destination file
    #[arg(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Device id
    pub device: String,

    /// Device file path, as printed by `scan -f plain`
    pub path: String,

    /// Destination file
    #[arg(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Device id
    pub device: String,

    /// Range start: RFC 3339 or YYYY-MM-DD (UTC)
    #[arg(long)]
    pub start: String,

    /// Range end: RFC 3339 or YYYY-MM-DD (UTC); defaults to now
    #[arg(long)]
    pub end: Option<String>,
}
