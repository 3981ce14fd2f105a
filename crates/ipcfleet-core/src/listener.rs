//! Live event listener.
//!
//! One background task per device keeps the CGI event feed attached and
//! republishes every parsed section onto the fleet bus:
//!
//! - [`FleetEvent::Connection`] on each transition (connecting, connected,
//!   disconnected)
//! - [`FleetEvent::Camera`] for every event read from the feed
//!
//! Failures reconnect with exponential backoff until the listener's token
//! is cancelled or the bus shuts down.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::device::DeviceClient;
use crate::error::{BusError, CoreError};
use crate::event::{ConnectionStatus, FleetEvent};

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for feed reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Consecutive failures tolerated before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ListenerHandle ───────────────────────────────────────────────────

/// Handle to a running listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    device: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop. Does not wait for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(device = %self.device, error = %e, "listener task panicked");
        }
    }
}

/// Spawn the listener for `device` on the current runtime.
///
/// `heartbeat` is forwarded to the feed attach request.
pub fn spawn_listener(
    device: Arc<DeviceClient>,
    bus: EventBus<FleetEvent>,
    reconnect: ReconnectConfig,
    heartbeat: Option<u32>,
    cancel: CancellationToken,
) -> ListenerHandle {
    let id = device.id().to_owned();
    let listener = Listener {
        device,
        bus,
        heartbeat,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(listener.run(reconnect));

    ListenerHandle {
        device: id,
        cancel,
        task,
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct Listener {
    device: Arc<DeviceClient>,
    bus: EventBus<FleetEvent>,
    heartbeat: Option<u32>,
    cancel: CancellationToken,
}

impl Listener {
    /// Main loop: attach → read → on error, backoff → reattach.
    async fn run(self, reconnect: ReconnectConfig) {
        let device = self.device.id().to_owned();
        let mut attempt: u32 = 0;

        loop {
            if self.status(ConnectionStatus::Connecting, None).await.is_err() {
                break;
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.attach_and_read() => result,
            };

            let delay = match result {
                // Feed ended without an error. Reattach after the initial
                // delay so a device that hangs up instantly is not hammered.
                Ok(()) => {
                    info!(device = %device, "event feed ended, reattaching");
                    attempt = 0;
                    if self.status(ConnectionStatus::Disconnected, None).await.is_err() {
                        break;
                    }
                    reconnect.initial_delay
                }
                Err(CoreError::Bus(BusError::Closed)) => break,
                Err(e) => {
                    warn!(device = %device, error = %e, attempt, "event feed error");
                    if self
                        .status(ConnectionStatus::Disconnected, Some(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }

                    if let Some(max) = reconnect.max_retries {
                        if attempt >= max {
                            error!(device = %device, max_retries = max, "event feed reconnection limit reached, giving up");
                            break;
                        }
                    }

                    let delay = calculate_backoff(attempt, &reconnect);
                    attempt = attempt.saturating_add(1);
                    delay
                }
            };

            debug!(device = %device, delay_ms = delay.as_millis(), attempt, "waiting before reattach");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        debug!(device = %device, "listener exiting");
    }

    /// Attach to the feed once and forward events until it drops.
    async fn attach_and_read(&self) -> Result<(), CoreError> {
        let manager = ipcfleet_api::cgi::event_manager(self.device.cgi(), self.heartbeat).await?;
        info!(device = %self.device.id(), "event feed attached");
        self.status(ConnectionStatus::Connected, None).await?;

        let mut events = pin!(manager.into_stream());
        while let Some(item) = events.next().await {
            let event = FleetEvent::Camera {
                device: self.device.id().to_owned(),
                received_at: Utc::now(),
                event: item?,
            };
            self.bus.publish(&self.cancel, event).await?;
        }
        Ok(())
    }

    /// Publish a connection transition. Only a closed bus is an error; a
    /// cancelled publish is left for the caller's own cancel check.
    async fn status(&self, status: ConnectionStatus, error: Option<String>) -> Result<(), BusError> {
        let event = FleetEvent::Connection {
            device: self.device.id().to_owned(),
            status,
            error,
        };
        match self.bus.publish(&self.cancel, event).await {
            Err(BusError::Closed) => Err(BusError::Closed),
            _ => Ok(()),
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
