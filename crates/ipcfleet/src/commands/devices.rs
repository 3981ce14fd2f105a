//! `ipcfleet devices`: list configured devices.

use serde::Serialize;
use tabled::Tabled;

use ipcfleet_config::{Config, DeviceEntry};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

/// A device entry without its credentials.
#[derive(Debug, Serialize)]
struct DeviceView<'a> {
    id: &'a str,
    name: &'a str,
    url: &'a str,
    username: &'a str,
    timezone: &'a str,
}

impl<'a> From<&'a DeviceEntry> for DeviceView<'a> {
    fn from(entry: &'a DeviceEntry) -> Self {
        Self {
            id: &entry.id,
            name: &entry.name,
            url: &entry.url,
            username: &entry.username,
            timezone: &entry.timezone,
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "User")]
    username: String,
    #[tabled(rename = "Timezone")]
    timezone: String,
}

impl From<&DeviceView<'_>> for DeviceRow {
    fn from(d: &DeviceView<'_>) -> Self {
        Self {
            id: d.id.to_owned(),
            name: d.name.to_owned(),
            url: d.url.to_owned(),
            username: d.username.to_owned(),
            timezone: d.timezone.to_owned(),
        }
    }
}

pub fn handle(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let views: Vec<DeviceView<'_>> = config.devices.iter().map(DeviceView::from).collect();
    let out = output::render_list(&global.format, &views, |d| DeviceRow::from(d), |d| d.id.to_owned())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
