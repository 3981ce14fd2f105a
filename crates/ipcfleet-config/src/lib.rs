//! Configuration for the ipcfleet CLI.
//!
//! TOML device list plus environment overrides, credential resolution
//! (env var + keyring + plaintext), and translation to
//! `ipcfleet_core::{DeviceConfig, FleetConfig}`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ipcfleet_api::{ClientConfig, TransportConfig};
use ipcfleet_core::{DeviceConfig, FleetConfig};

const KEYRING_SERVICE: &str = "ipcfleet";
const ENV_PREFIX: &str = "IPCFLEET_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for device '{device}'")]
    NoCredentials { device: String },

    #[error("unknown device '{device}'")]
    UnknownDevice { device: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Registered devices.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Whole-request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// TCP connect timeout, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Session age before a keepalive is sent, seconds.
    #[serde(default = "default_keepalive_after")]
    pub keepalive_after: u64,

    /// Event feed heartbeat, seconds. 0 disables it.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            keepalive_after: default_keepalive_after(),
            heartbeat: default_heartbeat(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_keepalive_after() -> u64 {
    60
}
fn default_heartbeat() -> u32 {
    5
}

/// One `[[devices]]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Device root URL (e.g., "http://192.168.1.108").
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    /// Password (plaintext; prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// IANA zone of the device clock.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_username() -> String {
    "admin".into()
}
fn default_timezone() -> String {
    "UTC".into()
}

impl Config {
    pub fn device(&self, id: &str) -> Result<&DeviceEntry, ConfigError> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ConfigError::UnknownDevice { device: id.into() })
    }

    /// Reject empty or duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(invalid("devices.id", "must not be empty"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(invalid("devices.id", format!("duplicate id '{}'", device.id)));
            }
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "ipcfleet", "ipcfleet").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("ipcfleet");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with `__`, e.g. `IPCFLEET_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a device password: `password_env` → keyring → plaintext.
pub fn resolve_password(entry: &DeviceEntry) -> Result<SecretString, ConfigError> {
    resolve_password_with(entry, |name| std::env::var(name).ok(), keyring_password)
}

fn keyring_password(device: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{device}/password"))
        .ok()?
        .get_password()
        .ok()
}

fn resolve_password_with(
    entry: &DeviceEntry,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Env var named by the entry
    if let Some(pw) = entry.password_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(pw));
    }

    // 2. System keyring
    if let Some(pw) = keyring(&entry.id) {
        return Ok(SecretString::from(pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = entry.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        device: entry.id.clone(),
    })
}

// ── Translation to core configs ─────────────────────────────────────

pub fn parse_timezone(value: &str) -> Result<Tz, ConfigError> {
    value
        .parse::<Tz>()
        .map_err(|_| invalid("timezone", format!("unknown timezone '{value}'")))
}

/// Build a core `DeviceConfig`, resolving its password.
pub fn device_config(entry: &DeviceEntry) -> Result<DeviceConfig, ConfigError> {
    device_config_with(entry, resolve_password(entry)?)
}

fn device_config_with(entry: &DeviceEntry, password: SecretString) -> Result<DeviceConfig, ConfigError> {
    let url: url::Url = entry
        .url
        .parse()
        .map_err(|_| invalid("url", format!("invalid URL for '{}': {}", entry.id, entry.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("url", format!("unsupported scheme '{}'", url.scheme())));
    }

    Ok(DeviceConfig {
        id: entry.id.clone(),
        name: entry.name.clone(),
        url,
        username: entry.username.clone(),
        password,
        timezone: parse_timezone(&entry.timezone)?,
    })
}

/// Fleet-wide settings from `[defaults]`.
pub fn fleet_config(defaults: &Defaults) -> FleetConfig {
    FleetConfig {
        transport: TransportConfig {
            timeout: Duration::from_secs(defaults.timeout),
            connect_timeout: Duration::from_secs(defaults.connect_timeout),
            ..TransportConfig::default()
        },
        client: ClientConfig {
            keepalive_after: Duration::from_secs(defaults.keepalive_after),
        },
        heartbeat: Some(defaults.heartbeat).filter(|h| *h != 0),
        ..FleetConfig::default()
    }
}
