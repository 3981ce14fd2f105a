// ── Per-device client pair ──

use ipcfleet_api::{CgiClient, ClientConfig, RpcClient, TransportConfig};
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::CoreError;

/// RPC and CGI clients of one device, built from its [`DeviceConfig`].
#[derive(Debug)]
pub struct DeviceClient {
    config: DeviceConfig,
    rpc: RpcClient,
    cgi: CgiClient,
}

impl DeviceClient {
    pub fn new(config: DeviceConfig, transport: &TransportConfig, client: ClientConfig) -> Result<Self, CoreError> {
        let rpc = RpcClient::new(
            transport.build_client()?,
            &config.url,
            config.username.clone(),
            config.password.clone(),
            client,
        )?;
        let cgi = CgiClient::new(&config.url, config.username.clone(), config.password.clone(), transport)?;

        debug!(device = %config.id, url = %config.url, "device client built");
        Ok(Self { config, rpc, cgi })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn cgi(&self) -> &CgiClient {
        &self.cgi
    }

    /// End the RPC session. Best-effort.
    pub async fn close(&self) {
        self.rpc.logout().await;
    }
}
