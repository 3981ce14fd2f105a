// ── Runtime fleet configuration ──
//
// These types describe which devices exist and how to talk to them.
// They carry credentials and tuning but never touch disk; the CLI builds
// them from `ipcfleet-config` and hands them in.

use chrono_tz::Tz;
use ipcfleet_api::{ClientConfig, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::bus::BusConfig;
use crate::listener::ReconnectConfig;

/// One registered device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Stable identifier, also the device's key in the lock store.
    pub id: String,
    /// Display name. Falls back to `id` when empty.
    pub name: String,
    /// Device root, e.g. `http://192.168.1.108`.
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    /// Zone the device's clock runs in. Wire timestamps are local to it.
    pub timezone: Tz,
}

impl DeviceConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        use secrecy::ExposeSecret;

        self.id == other.id
            && self.name == other.name
            && self.url == other.url
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
            && self.timezone == other.timezone
    }
}

/// Settings shared by every device in a [`Fleet`](crate::Fleet).
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub transport: TransportConfig,
    pub client: ClientConfig,
    pub reconnect: ReconnectConfig,
    pub bus: BusConfig,
    /// Heartbeat interval requested from the event feed, in seconds.
    pub heartbeat: Option<u32>,
}
