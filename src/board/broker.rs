//! Long-poll change notifications.
//!
//! Each waiting client registers a one-shot slot. A publish drains every slot
//! registered at that moment and hands each one the same change. Clients that
//! subscribe after the publish wait for the next one; nothing is buffered for
//! absent listeners.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use super::models::CardChange;

pub const DEFAULT_WAIT: Duration = Duration::from_millis(5_000);
pub const MAX_WAIT: Duration = Duration::from_millis(60_000);

type Slots = HashMap<Uuid, oneshot::Sender<CardChange>>;

pub struct ChangeBroker {
    waiters: Mutex<Slots>,
    max_wait: Duration,
}

impl Default for ChangeBroker {
    fn default() -> Self {
        Self::new(MAX_WAIT)
    }
}

impl ChangeBroker {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            max_wait: max_wait.max(Duration::from_millis(1)),
        }
    }

    fn waiters(&self) -> MutexGuard<'_, Slots> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of clients currently parked in `subscribe`.
    pub fn waiter_count(&self) -> usize {
        self.waiters().len()
    }

    pub fn clamp_wait(&self, wait: Duration) -> Duration {
        wait.clamp(Duration::from_millis(1), self.max_wait)
    }

    /// Wait up to `wait` for the next change. Returns `None` on timeout.
    ///
    /// A change published after this call registers is delivered exactly once,
    /// even if it races with the timeout.
    pub async fn subscribe(&self, wait: Duration) -> Option<CardChange> {
        let wait = self.clamp_wait(wait);
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            broker: self,
            id: Uuid::new_v4(),
            rx,
        };
        self.waiters().insert(waiter.id, tx);
        trace!(waiter = %waiter.id, ?wait, "long-poll registered");
        waiter.wait(wait).await
    }

    /// Deliver `change` to every registered waiter. Returns how many received it.
    ///
    /// Slots are drained and filled under the registry lock, so a waiter whose
    /// deadline fires mid-publish either still owns its slot or already has
    /// the change in its channel.
    pub fn publish(&self, change: CardChange) -> usize {
        let mut waiters = self.waiters();
        let mut delivered = 0;
        for (_, tx) in waiters.drain() {
            if tx.send(change.clone()).is_ok() {
                delivered += 1;
            }
        }
        drop(waiters);
        debug!(
            kind = %change.kind,
            card_id = change.card_id,
            delivered,
            "change published"
        );
        delivered
    }
}

/// Registration of one parked client. Dropping it (timeout, or the HTTP
/// request going away) takes its slot out of the broker.
struct Waiter<'a> {
    broker: &'a ChangeBroker,
    id: Uuid,
    rx: oneshot::Receiver<CardChange>,
}

impl Waiter<'_> {
    async fn wait(mut self, wait: Duration) -> Option<CardChange> {
        match tokio::time::timeout(wait, &mut self.rx).await {
            Ok(received) => received.ok(),
            Err(_) => {
                // Still registered means nobody published to us.
                if self.broker.waiters().remove(&self.id).is_some() {
                    trace!(waiter = %self.id, "long-poll timed out");
                    return None;
                }
                // A publish took our slot after the deadline; its send has
                // already happened, so this resolves at once.
                (&mut self.rx).await.ok()
            }
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.broker.waiters().remove(&self.id);
    }
}
