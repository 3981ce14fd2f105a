// ── Resource lock store ──
//
// Per-key advisory mutual exclusion. An entry exists only while its key is
// held or has queued waiters. Releasing a contended key hands ownership
// straight to the oldest live waiter instead of freeing it.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::LockError;

#[derive(Default)]
struct Slot {
    waiters: VecDeque<oneshot::Sender<()>>,
}

type Entries<K> = Arc<DashMap<K, Slot>>;

/// Keyed lock table. Cheap to clone; clones share the same table.
pub struct LockStore<K: Eq + Hash> {
    entries: Entries<K>,
}

impl<K: Eq + Hash> Clone for LockStore<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Eq + Hash> Default for LockStore<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Eq + Hash> fmt::Debug for LockStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockStore")
            .field("active", &self.entries.len())
            .finish()
    }
}

impl<K> LockStore<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free (or handed over) and claim it.
    ///
    /// Fails with [`LockError::Cancelled`] if `cancel` fires first. Dropping
    /// the returned future while it waits is also safe: a handoff that raced
    /// with the drop is passed on to the next waiter.
    pub async fn lock(&self, cancel: &CancellationToken, key: K) -> Result<LockGuard<K>, LockError> {
        loop {
            let rx = match self.entries.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::default());
                    trace!(key = %key, "lock acquired");
                    return Ok(self.guard(key));
                }
                Entry::Occupied(mut held) => {
                    let (tx, rx) = oneshot::channel();
                    held.get_mut().waiters.push_back(tx);
                    rx
                }
            };

            let mut waiter = Waiter {
                entries: Arc::clone(&self.entries),
                key: key.clone(),
                rx: Some(rx),
            };
            trace!(key = %key, "waiting for lock");

            let handed_over = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                ok = waiter.recv() => Some(ok),
            };

            match handed_over {
                None => return Err(LockError::Cancelled),
                Some(true) => {
                    waiter.disarm();
                    trace!(key = %key, "lock handed over");
                    return Ok(self.guard(key));
                }
                // The holder vanished without handing over; race again.
                Some(false) => {}
            }
        }
    }

    /// Claim `key` only if nobody holds it.
    pub fn try_lock(&self, key: K) -> Result<LockGuard<K>, LockError> {
        match self.entries.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::default());
                Ok(self.guard(key))
            }
            Entry::Occupied(_) => Err(LockError::ResourceLocked {
                key: key.to_string(),
            }),
        }
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Lock status for each of `keys`, in order.
    pub fn list_locked(&self, keys: &[K]) -> Vec<bool> {
        keys.iter().map(|k| self.entries.contains_key(k)).collect()
    }

    /// Keys currently held or waited on.
    pub fn active_keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn guard(&self, key: K) -> LockGuard<K> {
        LockGuard {
            entries: Arc::clone(&self.entries),
            key,
            held: true,
        }
    }
}

/// Hand `key` to the oldest waiter still listening, or free it.
fn release<K: Eq + Hash + Clone>(entries: &DashMap<K, Slot>, key: &K) {
    let Entry::Occupied(mut slot) = entries.entry(key.clone()) else {
        return;
    };
    while let Some(waiter) = slot.get_mut().waiters.pop_front() {
        if waiter.send(()).is_ok() {
            return;
        }
    }
    slot.remove();
}

// ── LockGuard ───────────────────────────────────────────────────────

/// Ownership of one key. Released by [`unlock`](Self::unlock) or on drop.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct LockGuard<K: Eq + Hash + Clone> {
    entries: Entries<K>,
    key: K,
    held: bool,
}

impl<K: Eq + Hash + Clone> LockGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Release the key. Calling it again is a no-op.
    pub fn unlock(&mut self) {
        if std::mem::take(&mut self.held) {
            release(&self.entries, &self.key);
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for LockGuard<K> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for LockGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.held)
            .finish()
    }
}

// ── Waiter ──────────────────────────────────────────────────────────

/// A queued claim on a key.
///
/// If dropped after ownership was already sent to it, the ownership is
/// released again so the key never ends up held by nobody.
struct Waiter<K: Eq + Hash + Clone> {
    entries: Entries<K>,
    key: K,
    rx: Option<oneshot::Receiver<()>>,
}

impl<K: Eq + Hash + Clone> Waiter<K> {
    async fn recv(&mut self) -> bool {
        match self.rx.as_mut() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        }
    }

    fn disarm(&mut self) {
        self.rx = None;
    }
}

impl<K: Eq + Hash + Clone> Drop for Waiter<K> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if rx.try_recv().is_ok() {
            release(&self.entries, &self.key);
        }
    }
}
