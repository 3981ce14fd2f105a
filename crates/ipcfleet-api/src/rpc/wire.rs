// Small wire-format helpers shared by the RPC modules.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

// ── Timestamp ───────────────────────────────────────────────────────

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_FORMAT_12H: &str = "%Y-%m-%d %I:%M:%S %p";

/// Device-local wall clock time, `YYYY-MM-DD HH:MM:SS` on the wire.
///
/// Devices have no notion of UTC, so conversion needs the device's
/// configured timezone.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Render a UTC instant in the device's local time.
    pub fn from_utc(at: DateTime<Utc>, tz: Tz) -> Self {
        Self(at.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string())
    }

    /// Interpret the timestamp in `tz` and convert to UTC.
    ///
    /// Accepts both the 24-hour form and the `... 03:04:05 PM` form some
    /// firmware emits. Ambiguous local times resolve to the earlier instant.
    pub fn to_utc(&self, tz: Tz) -> Result<DateTime<Utc>, Error> {
        let format = if self.0.ends_with("AM") || self.0.ends_with("PM") {
            TIMESTAMP_FORMAT_12H
        } else {
            TIMESTAMP_FORMAT
        };

        let naive = NaiveDateTime::parse_from_str(&self.0, format).map_err(|e| Error::Decode {
            message: format!("invalid timestamp: {e}"),
            body: self.0.clone(),
        })?;

        tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| Error::Decode {
                message: format!("timestamp does not exist in {tz}"),
                body: self.0.clone(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Integer ─────────────────────────────────────────────────────────

/// Integer field that some firmware sends as a float.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Integer(pub i64);

impl<'de> Deserialize<'de> for Integer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let number = f64::deserialize(deserializer)?;
        if !number.is_finite() {
            return Err(de::Error::custom("integer is not finite"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
        Ok(Self(number.trunc() as i64))
    }
}

// ── File paths ──────────────────────────────────────────────────────

/// Bracketed tags in the last segment of a recording path.
///
/// `/mnt/sd/2023-04-09/001/jpg/07/12/04[M][0@0][0][].jpg` yields
/// `["M", "0@0", "0", ""]`.
pub fn extract_file_path_tags(file_path: &str) -> Vec<String> {
    let name = file_path
        .rfind('/')
        .map_or(file_path, |idx| &file_path[idx..]);

    name.split('[')
        .skip(1)
        .filter_map(|token| token.find(']').map(|end| token[..end].to_owned()))
        .collect()
}

// ── Downloads ───────────────────────────────────────────────────────

/// Cookie header authenticating `RPC_Loadfile` downloads with a session.
pub(crate) fn session_cookie(session: &str) -> String {
    format!(
        "WebClientSessionID={session}; DWebClientSessionID={session}; DhWebClientSessionID={session}"
    )
}

/// Download URL for a file stored on the device's local disk.
pub(crate) fn load_file_url(base_url: &Url, file_path: &str) -> Result<Url, Error> {
    Ok(base_url.join(&format!("/RPC_Loadfile{file_path}"))?)
}
