//! In-process publish/subscribe broker.
//!
//! A single background task owns all subscriber state; [`EventBus`] handles
//! only send it commands. Delivery is synchronous from the loop's point of
//! view: every matching handler runs to completion, in registration order,
//! before the next command is looked at.
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let bus = EventBus::<FleetEvent>::new(BusConfig::default(), cancel.clone());
//!
//! let mut sub = bus.subscribe_channel(&cancel, [topics::CAMERA_EVENT], 64).await?;
//! bus.publish(&cancel, event).await?;
//! let received = sub.recv().await;
//! ```

mod actor;
pub mod handler;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use actor::{Command, SubStatus};
use handler::ChannelHandler;

pub use handler::{Delivery, Handler, HandlerError};

/// Routing key of a published event.
pub trait Topic {
    fn topic(&self) -> &str;
}

// ── Config & state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// How often subscriptions closed by a failing handler are purged.
    pub sweep_interval: Duration,
    /// Capacity of the command channel into the loop.
    pub command_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            command_capacity: 64,
        }
    }
}

/// Snapshot of the subscriber table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusState {
    /// Open subscriptions.
    pub subscriber_count: usize,
    /// Every entry still in the table, including closed ones not yet swept.
    pub subscribers: Vec<SubscriberState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberState {
    pub id: u64,
    pub topics: Vec<String>,
    pub closed: bool,
}

// ── EventBus ────────────────────────────────────────────────────────

/// Handle to a running bus. Cheap to clone.
pub struct EventBus<E> {
    tx: mpsc::Sender<Command<E>>,
    cancel: CancellationToken,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<E: Topic + Send + Sync + 'static> EventBus<E> {
    /// Spawn the bus loop on the current Tokio runtime.
    ///
    /// Cancelling `cancel` shuts the bus down.
    pub fn new(config: BusConfig, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        tokio::spawn(actor::run(rx, cancel.clone(), config));
        Self { tx, cancel }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver `event` to every open subscriber of its topic and wait until
    /// they have all been called.
    ///
    /// A failing handler closes its own subscription; the publisher still
    /// gets `Ok`.
    pub async fn publish(&self, cancel: &CancellationToken, event: E) -> Result<(), BusError> {
        let (reply, done) = oneshot::channel();
        let cmd = Command::Publish {
            event: Arc::new(event),
            cancel: cancel.clone(),
            reply,
        };
        self.request(cancel, cmd, done).await
    }

    /// Register `handler` for `topics`.
    pub async fn subscribe<I, H>(
        &self,
        cancel: &CancellationToken,
        topics: I,
        handler: H,
    ) -> Result<Subscription<E>, BusError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        H: Handler<E>,
    {
        let (reply, registered) = oneshot::channel();
        let cmd = Command::Subscribe {
            topics: topics.into_iter().map(Into::into).collect(),
            handler: Box::new(handler),
            reply,
        };
        let subscribed = self.request(cancel, cmd, registered).await?;

        Ok(Subscription {
            id: subscribed.id,
            status: subscribed.status,
            tx: self.tx.clone(),
            bus: self.cancel.clone(),
        })
    }

    /// Subscribe through a bounded channel of `capacity` events.
    ///
    /// A full channel holds up delivery (and so the publisher) until the
    /// receiver drains it. Dropping the receiver closes the subscription on
    /// the next delivery.
    pub async fn subscribe_channel<I>(
        &self,
        cancel: &CancellationToken,
        topics: I,
        capacity: usize,
    ) -> Result<ChannelSubscription<E>, BusError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = self.subscribe(cancel, topics, ChannelHandler::new(tx)).await?;
        Ok(ChannelSubscription { rx, subscription })
    }

    pub async fn state(&self, cancel: &CancellationToken) -> Result<BusState, BusError> {
        let (reply, state) = oneshot::channel();
        self.request(cancel, Command::State { reply }, state).await
    }

    async fn request<T>(
        &self,
        cancel: &CancellationToken,
        cmd: Command<E>,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }

        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(BusError::Closed),
            () = cancel.cancelled() => Err(BusError::Cancelled),
            sent = self.tx.send(cmd) => sent.map_err(|_| BusError::Closed),
        };
        sent?;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(BusError::Closed),
            () = cancel.cancelled() => Err(BusError::Cancelled),
            res = reply => res.map_err(|_| BusError::Closed),
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// Handle to one registration. Dropping it does not unsubscribe.
pub struct Subscription<E> {
    id: u64,
    status: watch::Receiver<SubStatus>,
    tx: mpsc::Sender<Command<E>>,
    bus: CancellationToken,
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<E> Subscription<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.bus.is_cancelled() || *self.status.borrow() != SubStatus::Open
    }

    /// Unsubscribe. No further events are delivered once the loop has
    /// processed the request.
    pub async fn close(&self) -> Result<(), BusError> {
        if self.bus.is_cancelled() {
            return Err(BusError::Closed);
        }
        tokio::select! {
            biased;
            () = self.bus.cancelled() => Err(BusError::Closed),
            sent = self.tx.send(Command::Unsubscribe { id: self.id }) => {
                sent.map_err(|_| BusError::Closed)
            }
        }
    }

    /// Wait until the subscription is closed.
    ///
    /// `Ok` after an explicit [`close`](Self::close); [`BusError::Handler`]
    /// if the handler failed; [`BusError::Closed`] if the bus shut down.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            match current {
                SubStatus::Open => {}
                SubStatus::Unsubscribed => return Ok(()),
                SubStatus::Failed(message) => return Err(BusError::Handler(message)),
                SubStatus::BusClosed => return Err(BusError::Closed),
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BusError::Cancelled),
                () = self.bus.cancelled() => return Err(BusError::Closed),
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(BusError::Closed);
                    }
                }
            }
        }
    }
}

/// A subscription delivering into a bounded channel.
pub struct ChannelSubscription<E> {
    rx: mpsc::Receiver<Arc<E>>,
    subscription: Subscription<E>,
}

impl<E> std::fmt::Debug for ChannelSubscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl<E> ChannelSubscription<E> {
    /// Next event, or `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<E>> {
        self.rx.recv().await
    }

    pub fn subscription(&self) -> &Subscription<E> {
        &self.subscription
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Arc<E>>, Subscription<E>) {
        (self.rx, self.subscription)
    }

    /// Events as a [`Stream`](futures_util::Stream).
    pub fn into_stream(self) -> (ReceiverStream<Arc<E>>, Subscription<E>) {
        (ReceiverStream::new(self.rx), self.subscription)
    }
}
