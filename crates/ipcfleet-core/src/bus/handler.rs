// ── Subscriber handlers ──

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Error type handlers report back to the bus.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Cancellation scope of one delivery.
///
/// Fires when either the publisher gives up or the bus shuts down.
#[derive(Debug, Clone)]
pub struct Delivery {
    publisher: CancellationToken,
    bus: CancellationToken,
}

impl Delivery {
    pub(crate) fn new(publisher: CancellationToken, bus: CancellationToken) -> Self {
        Self { publisher, bus }
    }

    pub async fn cancelled(&self) {
        tokio::select! {
            () = self.publisher.cancelled() => {}
            () = self.bus.cancelled() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.publisher.is_cancelled() || self.bus.is_cancelled()
    }
}

/// Receives events for the topics it subscribed to.
///
/// Called from the bus loop, one event at a time, in subscription order.
/// Returning an error closes the subscription.
pub trait Handler<E>: Send + 'static {
    fn handle(&mut self, event: Arc<E>, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<E, F, Fut> Handler<E> for F
where
    F: FnMut(Arc<E>, Delivery) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&mut self, event: Arc<E>, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(event, delivery))
    }
}

// ── Channel delivery ────────────────────────────────────────────────

/// Feeds a bounded channel. A full channel blocks the delivery until the
/// consumer catches up or the delivery is cancelled; a dropped receiver
/// fails the handler, which closes the subscription.
pub(crate) struct ChannelHandler<E> {
    tx: mpsc::Sender<Arc<E>>,
}

impl<E> ChannelHandler<E> {
    pub(crate) fn new(tx: mpsc::Sender<Arc<E>>) -> Self {
        Self { tx }
    }
}

impl<E: Send + Sync + 'static> Handler<E> for ChannelHandler<E> {
    fn handle(&mut self, event: Arc<E>, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tokio::select! {
                biased;
                () = delivery.cancelled() => {
                    debug!("channel delivery cancelled, event dropped for this subscriber");
                    Ok(())
                }
                sent = tx.send(event) => sent.map_err(|_| "subscriber channel closed".into()),
            }
        })
    }
}
