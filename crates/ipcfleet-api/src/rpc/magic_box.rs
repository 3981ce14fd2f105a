// `magicBox.*` methods: device identity and power control.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::rpc::RpcGen;
use crate::rpc::wire::Integer;

#[derive(Deserialize)]
struct SerialNo {
    sn: String,
}

pub async fn serial_no(rpc: &impl RpcGen) -> Result<String, Error> {
    let params: SerialNo = rpc
        .rpc()
        .await?
        .method("magicBox.getSerialNo")
        .send_checked()
        .await?;
    Ok(params.sn)
}

#[derive(Deserialize)]
struct DeviceType {
    #[serde(rename = "type")]
    kind: String,
}

pub async fn device_type(rpc: &impl RpcGen) -> Result<String, Error> {
    let params: DeviceType = rpc
        .rpc()
        .await?
        .method("magicBox.getDeviceType")
        .send_checked()
        .await?;
    Ok(params.kind)
}

/// Firmware build information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SoftwareVersion {
    pub build: String,
    pub build_date: String,
    pub security_base_line_version: String,
    pub version: String,
    pub web_version: String,
}

#[derive(Deserialize)]
struct SoftwareVersionParams {
    version: SoftwareVersion,
}

pub async fn software_version(rpc: &impl RpcGen) -> Result<SoftwareVersion, Error> {
    let params: SoftwareVersionParams = rpc
        .rpc()
        .await?
        .method("magicBox.getSoftwareVersion")
        .send_checked()
        .await?;
    Ok(params.version)
}

/// Memory usage in bytes. Some firmware reports these as floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub free: Integer,
    pub total: Integer,
}

pub async fn memory_info(rpc: &impl RpcGen) -> Result<MemoryInfo, Error> {
    rpc.rpc()
        .await?
        .method("magicBox.getMemoryInfo")
        .send_checked()
        .await
}

#[derive(Deserialize)]
struct NeedReboot {
    #[serde(rename = "needReboot", default)]
    need_reboot: i64,
}

pub async fn need_reboot(rpc: &impl RpcGen) -> Result<bool, Error> {
    let params: NeedReboot = rpc
        .rpc()
        .await?
        .method("magicBox.needReboot")
        .send_checked()
        .await?;
    Ok(params.need_reboot != 0)
}

pub async fn reboot(rpc: &impl RpcGen) -> Result<bool, Error> {
    let res = rpc
        .rpc()
        .await?
        .method("magicBox.reboot")
        .send::<Value>()
        .await?
        .check()?;
    Ok(res.result.as_bool())
}
