// ── Bus coordination loop ──
//
// Owns every subscription. Subscribe, unsubscribe, publish and state
// requests arrive over one channel and are applied strictly in order, so
// the subscriber list is never touched from anywhere else.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::handler::{Delivery, Handler};
use super::{BusConfig, BusState, SubscriberState, Topic};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) enum Command<E> {
    Subscribe {
        topics: Vec<String>,
        handler: Box<dyn Handler<E>>,
        reply: oneshot::Sender<Subscribed>,
    },
    Unsubscribe {
        id: u64,
    },
    Publish {
        event: Arc<E>,
        cancel: CancellationToken,
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<BusState>,
    },
}

pub(crate) struct Subscribed {
    pub id: u64,
    pub status: watch::Receiver<SubStatus>,
}

/// Lifecycle of one subscription as seen by its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubStatus {
    Open,
    Unsubscribed,
    Failed(String),
    BusClosed,
}

struct Entry<E> {
    id: u64,
    topics: Vec<String>,
    handler: Box<dyn Handler<E>>,
    status: watch::Sender<SubStatus>,
}

impl<E> Entry<E> {
    fn is_closed(&self) -> bool {
        *self.status.borrow() != SubStatus::Open
    }

    /// Move an open subscription to `status`. Already-closed ones keep theirs.
    fn close(&self, status: SubStatus) {
        self.status.send_if_modified(|current| {
            if *current == SubStatus::Open {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

struct Actor<E> {
    subs: Vec<Entry<E>>,
    last_id: u64,
    cancel: CancellationToken,
}

pub(crate) async fn run<E>(mut rx: mpsc::Receiver<Command<E>>, cancel: CancellationToken, config: BusConfig)
where
    E: Topic + Send + Sync + 'static,
{
    let period = config.sweep_interval.max(MIN_SWEEP_INTERVAL);
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut actor = Actor {
        subs: Vec::new(),
        last_id: 0,
        cancel: cancel.clone(),
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                actor.apply(cmd).await;
            }
            _ = sweep.tick() => actor.sweep(),
        }
    }

    actor.shutdown();
    debug!("event bus loop exiting");
}

impl<E: Topic + Send + Sync + 'static> Actor<E> {
    async fn apply(&mut self, cmd: Command<E>) {
        match cmd {
            Command::Subscribe {
                topics,
                handler,
                reply,
            } => self.subscribe(topics, handler, reply),
            Command::Unsubscribe { id } => self.unsubscribe(id),
            Command::Publish {
                event,
                cancel,
                reply,
            } => {
                self.publish(&event, cancel).await;
                let _ = reply.send(());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state());
            }
        }
    }

    fn subscribe(
        &mut self,
        topics: Vec<String>,
        handler: Box<dyn Handler<E>>,
        reply: oneshot::Sender<Subscribed>,
    ) {
        self.last_id += 1;
        let id = self.last_id;
        let (status, status_rx) = watch::channel(SubStatus::Open);

        // Nobody is left to hold the handle, so don't register it.
        if reply.send(Subscribed { id, status: status_rx }).is_err() {
            debug!(subscriber = id, "subscriber went away before registration");
            return;
        }

        debug!(subscriber = id, ?topics, "subscribed");
        self.subs.push(Entry {
            id,
            topics,
            handler,
            status,
        });
    }

    fn unsubscribe(&mut self, id: u64) {
        if let Some(pos) = self.subs.iter().position(|s| s.id == id) {
            let entry = self.subs.remove(pos);
            entry.close(SubStatus::Unsubscribed);
            debug!(subscriber = id, "unsubscribed");
        }
    }

    async fn publish(&mut self, event: &Arc<E>, publisher: CancellationToken) {
        let topic = event.topic().to_owned();
        let delivery = Delivery::new(publisher, self.cancel.clone());
        let mut delivered = 0_usize;

        for sub in &mut self.subs {
            if sub.is_closed() || !sub.topics.iter().any(|t| *t == topic) {
                continue;
            }

            match sub.handler.handle(Arc::clone(event), delivery.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscriber = sub.id, topic = %topic, error = %e, "handler failed, closing subscription");
                    sub.close(SubStatus::Failed(e.to_string()));
                }
            }
        }

        trace!(topic = %topic, delivered, "event published");
    }

    fn state(&self) -> BusState {
        let subscribers: Vec<SubscriberState> = self
            .subs
            .iter()
            .map(|s| SubscriberState {
                id: s.id,
                topics: s.topics.clone(),
                closed: s.is_closed(),
            })
            .collect();

        BusState {
            subscriber_count: subscribers.iter().filter(|s| !s.closed).count(),
            subscribers,
        }
    }

    fn sweep(&mut self) {
        let before = self.subs.len();
        self.subs.retain(|s| !s.is_closed());
        let removed = before - self.subs.len();
        if removed > 0 {
            debug!(removed, remaining = self.subs.len(), "swept closed subscriptions");
        }
    }

    fn shutdown(&mut self) {
        for sub in self.subs.drain(..) {
            sub.close(SubStatus::BusClosed);
        }
    }
}
