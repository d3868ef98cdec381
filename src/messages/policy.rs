//! # Message lifecycle policy.
//!
//! Mediates every interaction between services and the queue store: dequeue,
//! poison detection, completion, abandonment and deferral.
//!
//! ```text
//! acquire(queue, visibility, max_trials)
//!     │
//!     ├─ store.acquire ──► none ─────────────────────────────► Ok(None)
//!     │
//!     ├─ dequeue_count >= max_trials ──► quarantine ──► retry acquire
//!     │
//!     ├─ Standard ──────────────────────────────────────────► Ok(Some(item))
//!     │
//!     └─ Resilient ──► fence.try_acquire ──► held ──────────► Ok(Some(item))
//!                                        └─► busy ──────────► Ok(None)
//! ```
//!
//! ## Rules
//! - A delivery whose dequeue count reaches `max_trials` is quarantined instead of
//!   handed out, so a message is processed at most `max_trials - 1` times.
//! - `complete` deletes; `fail` makes the message visible immediately;
//!   `defer_to_visibility_expiry` leaves it hidden until its timeout runs out.
//! - Resilient mode only hands out messages older than `min_age` and guards each
//!   delivery with a fencing lease; a busy lease leaves the copy hidden.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::item::QueueWorkItem;
use super::store::{DelayedStore, FencingLease, QueueStore};
use crate::error::StorageError;
use crate::events::{Bus, Event, EventKind};

/// How messages are taken from the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DequeueMode {
    /// Plain at-least-once dequeue.
    #[default]
    Standard,
    /// Minimum-age filter plus a per-message fencing lease.
    Resilient {
        /// Messages younger than this are left alone.
        min_age: Duration,
        /// Lifetime of the single-flight lease.
        lease_ttl: Duration,
    },
}

/// How a work item was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Deleted from the queue.
    Completed,
    /// Made visible again immediately.
    Abandoned,
    /// Left hidden until its visibility timeout expires.
    Deferred,
    /// Moved to the delayed store for later re-delivery.
    Resumed,
}

/// Dequeue/ack/nack policy shared by all queued services of a cell.
pub struct MessagePolicy {
    store: Arc<dyn QueueStore>,
    fence: Option<Arc<dyn FencingLease>>,
    delayed: Option<Arc<dyn DelayedStore>>,
    mode: DequeueMode,
    bus: Bus,
}

impl MessagePolicy {
    /// Creates a policy in [`DequeueMode::Standard`].
    pub fn new(store: Arc<dyn QueueStore>, bus: Bus) -> Self {
        Self {
            store,
            fence: None,
            delayed: None,
            mode: DequeueMode::Standard,
            bus,
        }
    }

    /// Switches to [`DequeueMode::Resilient`], guarded by `fence`.
    pub fn resilient(
        mut self,
        fence: Arc<dyn FencingLease>,
        min_age: Duration,
        lease_ttl: Duration,
    ) -> Self {
        self.fence = Some(fence);
        self.mode = DequeueMode::Resilient { min_age, lease_ttl };
        self
    }

    /// Enables [`MessagePolicy::resume_later`] through `delayed`.
    pub fn with_delayed_store(mut self, delayed: Arc<dyn DelayedStore>) -> Self {
        self.delayed = Some(delayed);
        self
    }

    /// Active dequeue mode.
    pub fn mode(&self) -> DequeueMode {
        self.mode
    }

    /// Takes the next processable message from `queue`.
    ///
    /// Poison messages met along the way are quarantined and skipped.
    pub async fn acquire(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_trials: u32,
    ) -> Result<Option<QueueWorkItem>, StorageError> {
        let min_age = match self.mode {
            DequeueMode::Standard => Duration::ZERO,
            DequeueMode::Resilient { min_age, .. } => min_age,
        };
        loop {
            let Some(raw) = self.store.acquire(queue, visibility_timeout, min_age).await? else {
                return Ok(None);
            };
            let visible_at = Instant::now() + visibility_timeout;

            if raw.dequeue_count >= max_trials {
                let dequeue_count = raw.dequeue_count;
                self.store.quarantine(queue, raw).await?;
                self.bus.publish(
                    Event::new(EventKind::MessageQuarantined)
                        .with_queue(queue)
                        .with_attempt(dequeue_count),
                );
                continue;
            }

            let fence = match (self.mode, &self.fence) {
                (DequeueMode::Resilient { lease_ttl, .. }, Some(fence)) => {
                    match fence.try_acquire(&lease_key(queue, &raw), lease_ttl).await? {
                        Some(token) => Some(token),
                        // another copy is in flight; leave this one hidden
                        None => return Ok(None),
                    }
                }
                _ => None,
            };
            return Ok(Some(QueueWorkItem::new(queue.into(), raw, visible_at, fence)));
        }
    }

    /// Successful processing: deletes the message.
    pub async fn complete(&self, item: QueueWorkItem) -> Result<Resolution, StorageError> {
        let deleted = self.store.complete(&item.queue, &item.message.receipt).await?;
        if !deleted {
            tracing::debug!(
                queue = item.queue(),
                id = %item.id(),
                "receipt expired before completion; message may be redelivered"
            );
        }
        self.release(&item).await?;
        Ok(Resolution::Completed)
    }

    /// Abandons the message: it becomes visible immediately.
    pub async fn fail(&self, item: QueueWorkItem) -> Result<Resolution, StorageError> {
        self.store
            .make_visible_now(&item.queue, &item.message.receipt)
            .await?;
        self.release(&item).await?;
        Ok(Resolution::Abandoned)
    }

    /// Leaves the message hidden; it re-appears when its visibility timeout expires.
    pub async fn defer_to_visibility_expiry(
        &self,
        item: QueueWorkItem,
    ) -> Result<Resolution, StorageError> {
        self.release(&item).await?;
        Ok(Resolution::Deferred)
    }

    /// Moves the message to the delayed store, due after `delay`.
    ///
    /// Falls back to [`MessagePolicy::defer_to_visibility_expiry`] when no
    /// delayed store is configured.
    pub async fn resume_later(
        &self,
        item: QueueWorkItem,
        delay: Duration,
    ) -> Result<Resolution, StorageError> {
        let Some(delayed) = &self.delayed else {
            tracing::warn!(queue = item.queue(), "resume requested without a delayed store");
            return self.defer_to_visibility_expiry(item).await;
        };
        delayed
            .put_delayed(Instant::now() + delay, &item.queue, item.message.payload.clone())
            .await?;
        self.store.complete(&item.queue, &item.message.receipt).await?;
        self.release(&item).await?;
        Ok(Resolution::Resumed)
    }

    async fn release(&self, item: &QueueWorkItem) -> Result<(), StorageError> {
        if let (Some(fence), Some(token)) = (&self.fence, &item.fence) {
            if !fence.release(token).await? {
                tracing::warn!(queue = item.queue(), id = %item.id(), "fencing lease lost");
            }
        }
        Ok(())
    }
}

fn lease_key(queue: &str, raw: &super::store::RawMessage) -> String {
    format!("{queue}/{}", raw.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::memory::{MemoryFence, MemoryQueueStore};

    const VT: Duration = Duration::from_secs(60);

    fn policy(store: &Arc<MemoryQueueStore>) -> MessagePolicy {
        MessagePolicy::new(store.clone(), Bus::new(16))
    }

    #[tokio::test(start_paused = true)]
    async fn completed_message_is_never_seen_again() {
        let store = Arc::new(MemoryQueueStore::new());
        let policy = policy(&store);
        store.put("q", b"once".to_vec()).await.unwrap();

        let item = policy.acquire("q", VT, 3).await.unwrap().unwrap();
        assert_eq!(item.payload(), b"once");
        assert_eq!(policy.complete(item).await.unwrap(), Resolution::Completed);

        tokio::time::advance(VT * 2).await;
        assert!(policy.acquire("q", VT, 3).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_message_is_visible_immediately() {
        let store = Arc::new(MemoryQueueStore::new());
        let policy = policy(&store);
        store.put("q", b"retry".to_vec()).await.unwrap();

        let item = policy.acquire("q", VT, 3).await.unwrap().unwrap();
        policy.fail(item).await.unwrap();
        let again = policy.acquire("q", VT, 3).await.unwrap().unwrap();
        assert_eq!(again.dequeue_count(), 2);
        policy.complete(again).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_message_waits_for_visibility_timeout() {
        let store = Arc::new(MemoryQueueStore::new());
        let policy = policy(&store);
        store.put("q", b"later".to_vec()).await.unwrap();

        let item = policy.acquire("q", VT, 3).await.unwrap().unwrap();
        policy.defer_to_visibility_expiry(item).await.unwrap();
        assert!(policy.acquire("q", VT, 3).await.unwrap().is_none());

        tokio::time::advance(VT).await;
        assert!(policy.acquire("q", VT, 3).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn poison_message_is_quarantined_after_max_trials() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let policy = MessagePolicy::new(store.clone(), bus);
        store.put("q", b"poison".to_vec()).await.unwrap();

        let item = policy.acquire("q", VT, 2).await.unwrap().unwrap();
        assert_eq!(item.dequeue_count(), 1);
        policy.defer_to_visibility_expiry(item).await.unwrap();
        tokio::time::advance(VT).await;
        // the second delivery reaches max_trials and is never handed out
        assert!(policy.acquire("q", VT, 2).await.unwrap().is_none());
        tokio::time::advance(VT * 2).await;
        assert!(policy.acquire("q", VT, 2).await.unwrap().is_none());

        let quarantined = store.list_quarantined("q").await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].dequeue_count, 2);
        assert_eq!(store.len("q").await.unwrap(), 0);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::MessageQuarantined);
    }

    #[tokio::test(start_paused = true)]
    async fn resilient_mode_respects_min_age_and_single_flight() {
        let store = Arc::new(MemoryQueueStore::new());
        let fence = Arc::new(MemoryFence::new());
        let min_age = Duration::from_secs(2);
        let lease = Duration::from_secs(600);
        let policy = policy(&store).resilient(fence.clone(), min_age, lease);
        store.put("q", b"r".to_vec()).await.unwrap();

        assert!(policy.acquire("q", VT, 5).await.unwrap().is_none());
        tokio::time::advance(min_age).await;

        let item = policy.acquire("q", VT, 5).await.unwrap().unwrap();
        // visibility expires while the first copy is still being processed
        tokio::time::advance(VT).await;
        assert!(policy.acquire("q", VT, 5).await.unwrap().is_none());

        // the first copy's receipt is stale now; its lease is still released
        policy.complete(item).await.unwrap();
        tokio::time::advance(VT).await;
        let retry = policy.acquire("q", VT, 5).await.unwrap().unwrap();
        assert_eq!(retry.dequeue_count(), 3);
        policy.complete(retry).await.unwrap();
        assert_eq!(store.len("q").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_later_moves_message_to_delayed_store() {
        let store = Arc::new(MemoryQueueStore::new());
        let policy = policy(&store).with_delayed_store(store.clone());
        store.put("q", b"snooze".to_vec()).await.unwrap();

        let item = policy.acquire("q", VT, 3).await.unwrap().unwrap();
        let res = policy.resume_later(item, Duration::from_secs(30)).await.unwrap();
        assert_eq!(res, Resolution::Resumed);
        assert_eq!(store.len("q").await.unwrap(), 0);

        use futures::StreamExt;
        let delayed: Vec<_> = store.list_delayed().collect().await;
        assert_eq!(delayed.len(), 1);
    }
}
