//! Concurrency layer and fleet services on top of `ipcfleet-api`.
//!
//! - **[`LockStore`]**: Keyed advisory locks with direct handoff to the
//!   oldest waiter. Per-device batch jobs (scans) claim the device's key
//!   before touching it.
//!
//! - **[`EventBus`]**: Single-task publish/subscribe broker. Handlers run in
//!   subscription order; a failing handler closes only its own subscription.
//!
//! - **[`Fleet`]**: Registry of [`DeviceConfig`]s with lazily built
//!   [`DeviceClient`]s, live event [listeners](listener) and recording
//!   [scans](scan), all publishing [`FleetEvent`]s on one bus.
//!
//! Nothing here reads files or installs a tracing subscriber; the CLI builds
//! a [`FleetConfig`] and hands it in.

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod fleet;
pub mod listener;
pub mod lock;
pub mod scan;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{
    BusConfig, BusState, ChannelSubscription, Delivery, EventBus, Handler, HandlerError, SubscriberState,
    Subscription, Topic,
};
pub use config::{DeviceConfig, FleetConfig};
pub use device::DeviceClient;
pub use error::{BusError, CoreError, LockError};
pub use event::{ConnectionStatus, FleetEvent, topics};
pub use fleet::Fleet;
pub use listener::{ListenerHandle, ReconnectConfig, spawn_listener};
pub use lock::{LockGuard, LockStore};
pub use scan::{FileSink, MAX_SCAN_PERIOD, ScanPeriod, ScanPeriodIter, ScanRange, ScanSummary, scan_files};
