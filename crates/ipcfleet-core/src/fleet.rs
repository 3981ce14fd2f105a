// ── Fleet registry ──
//
// Registered devices, their lazily built clients, and the shared lock
// store, event bus and live listeners. Cheaply cloneable.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{DeviceConfig, FleetConfig};
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::event::FleetEvent;
use crate::listener::{ListenerHandle, spawn_listener};
use crate::lock::LockStore;
use crate::scan::{FileSink, ScanRange, ScanSummary, scan_files};

#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

struct FleetInner {
    config: FleetConfig,
    devices: DashMap<String, DeviceConfig>,
    clients: DashMap<String, Arc<DeviceClient>>,
    listeners: DashMap<String, ListenerHandle>,
    locks: LockStore<String>,
    bus: EventBus<FleetEvent>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("devices", &self.inner.devices.len())
            .field("listeners", &self.inner.listeners.len())
            .field("locks", &self.inner.locks)
            .finish_non_exhaustive()
    }
}

impl Fleet {
    /// Create an empty fleet and start its event bus.
    ///
    /// Cancelling `cancel` stops the bus and every listener.
    pub fn new(config: FleetConfig, cancel: CancellationToken) -> Self {
        let bus = EventBus::new(config.bus.clone(), cancel.child_token());
        Self {
            inner: Arc::new(FleetInner {
                config,
                devices: DashMap::new(),
                clients: DashMap::new(),
                listeners: DashMap::new(),
                locks: LockStore::new(),
                bus,
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus<FleetEvent> {
        &self.inner.bus
    }

    pub fn locks(&self) -> &LockStore<String> {
        &self.inner.locks
    }

    // ── Registry ─────────────────────────────────────────────────

    /// Register or update a device.
    ///
    /// Re-registering an identical config is a no-op. Any other change drops
    /// the cached client (logging it out) and restarts the device's listener
    /// if one was running.
    pub async fn upsert(&self, config: DeviceConfig) {
        let id = config.id.clone();
        let unchanged = self
            .inner
            .devices
            .insert(id.clone(), config.clone())
            .is_some_and(|old| old.same_as(&config));
        if unchanged {
            return;
        }

        info!(device = %id, "device registered");
        let relisten = self.stop_listener(&id).await;
        if let Some((_, old)) = self.inner.clients.remove(&id) {
            old.close().await;
        }
        if relisten {
            if let Err(e) = self.listen(&id) {
                warn!(device = %id, error = %e, "listener not restarted");
            }
        }
    }

    /// Forget a device. Stops its listener and logs its session out.
    ///
    /// Returns `false` if it was not registered.
    pub async fn remove(&self, id: &str) -> bool {
        let found = self.inner.devices.remove(id).is_some();
        self.stop_listener(id).await;
        if let Some((_, client)) = self.inner.clients.remove(id) {
            client.close().await;
        }
        if found {
            info!(device = %id, "device removed");
        }
        found
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.devices.contains_key(id)
    }

    /// Registered device ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Registered devices, sorted by id.
    pub fn devices(&self) -> Vec<DeviceConfig> {
        let mut devices: Vec<DeviceConfig> = self.inner.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Client for `id`, built on first use.
    pub fn get(&self, id: &str) -> Result<Arc<DeviceClient>, CoreError> {
        if let Some(client) = self.inner.clients.get(id) {
            return Ok(Arc::clone(client.value()));
        }

        let config = self
            .inner
            .devices
            .get(id)
            .map(|c| c.value().clone())
            .ok_or_else(|| CoreError::DeviceNotFound { id: id.to_owned() })?;
        let client = Arc::new(self.build_client(config)?);

        // Another caller may have won the race; keep theirs.
        Ok(Arc::clone(
            self.inner.clients.entry(id.to_owned()).or_insert(client).value(),
        ))
    }

    fn build_client(&self, config: DeviceConfig) -> Result<DeviceClient, CoreError> {
        let cfg = &self.inner.config;
        DeviceClient::new(config, &cfg.transport, cfg.client.clone())
    }

    // ── Live events ──────────────────────────────────────────────

    /// Start the live event listener for `id`. No-op if already running.
    pub fn listen(&self, id: &str) -> Result<(), CoreError> {
        let device = self.get(id)?;
        if let Some(running) = self.inner.listeners.get(id) {
            if !running.is_finished() {
                return Ok(());
            }
        }

        let cfg = &self.inner.config;
        let handle = spawn_listener(
            device,
            self.inner.bus.clone(),
            cfg.reconnect.clone(),
            cfg.heartbeat,
            self.inner.cancel.child_token(),
        );
        if let Some(stale) = self.inner.listeners.insert(id.to_owned(), handle) {
            stale.shutdown();
        }
        Ok(())
    }

    /// Start listeners for every registered device.
    pub fn listen_all(&self) -> Result<(), CoreError> {
        for id in self.ids() {
            self.listen(&id)?;
        }
        Ok(())
    }

    /// Stop the listener for `id`, waiting for it to exit. Returns whether
    /// one was running.
    pub async fn stop_listener(&self, id: &str) -> bool {
        match self.inner.listeners.remove(id) {
            Some((_, handle)) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self, id: &str) -> bool {
        self.inner
            .listeners
            .get(id)
            .is_some_and(|h| !h.is_finished())
    }

    // ── Scans ────────────────────────────────────────────────────

    /// Scan the recordings of `id` over `range` into `sink`.
    pub async fn scan<S: FileSink>(
        &self,
        id: &str,
        range: ScanRange,
        sink: &S,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, CoreError> {
        let device = self.get(id)?;
        scan_files(&device, &self.inner.locks, &self.inner.bus, sink, range, cancel).await
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Stop every listener, log out every device and shut the bus down.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.listeners.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_listener(&id).await;
        }

        let clients: Vec<Arc<DeviceClient>> = self.inner.clients.iter().map(|e| Arc::clone(e.value())).collect();
        self.inner.clients.clear();
        for client in clients {
            client.close().await;
        }

        self.inner.cancel.cancel();
        debug!("fleet shut down");
    }
}
