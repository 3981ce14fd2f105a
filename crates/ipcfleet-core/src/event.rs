// ── Fleet event model ──
//
// Everything the fleet services publish on the bus. Each variant maps to
// exactly one topic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::bus::Topic;

/// Topic names used by [`FleetEvent`].
pub mod topics {
    pub const CAMERA_EVENT: &str = "camera.event";
    pub const DEVICE_CONNECTION: &str = "device.connection";
    pub const SCAN_PROGRESS: &str = "scan.progress";

    pub const ALL: [&str; 3] = [CAMERA_EVENT, DEVICE_CONNECTION, SCAN_PROGRESS];
}

/// Live-feed connection transitions of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// One section of a device's CGI event feed.
    Camera {
        device: String,
        received_at: DateTime<Utc>,
        event: ipcfleet_api::Event,
    },
    Connection {
        device: String,
        status: ConnectionStatus,
        /// Set on `Disconnected` when the feed ended with an error.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ScanProgress {
        device: String,
        percent: f64,
        /// Files handed to the sink so far in this scan.
        files: u64,
    },
}

impl FleetEvent {
    pub fn device(&self) -> &str {
        match self {
            Self::Camera { device, .. } | Self::Connection { device, .. } | Self::ScanProgress { device, .. } => {
                device
            }
        }
    }
}

impl Topic for FleetEvent {
    fn topic(&self) -> &str {
        match self {
            Self::Camera { .. } => topics::CAMERA_EVENT,
            Self::Connection { .. } => topics::DEVICE_CONNECTION,
            Self::ScanProgress { .. } => topics::SCAN_PROGRESS,
        }
    }
}
