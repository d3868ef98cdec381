//! # In-memory storage collaborators.
//!
//! [`MemoryQueueStore`] implements both [`QueueStore`] and [`DelayedStore`];
//! [`MemoryFence`] implements [`FencingLease`]. They back the tests and
//! single-process hosts. Locks are never held across an `.await`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::Instant;

use super::store::{
    DelayKey, DelayedRecord, DelayedStore, FenceToken, FencingLease, MessageId, QuarantinedMessage,
    QueueStore, RawMessage, Receipt,
};
use crate::error::StorageError;

#[derive(Debug)]
struct Stored {
    id: MessageId,
    payload: Vec<u8>,
    dequeue_count: u32,
    inserted_at: Instant,
    hidden_until: Option<Instant>,
    nonce: u64,
}

impl Stored {
    fn is_visible(&self, now: Instant) -> bool {
        self.hidden_until.is_none_or(|until| until <= now)
    }
}

#[derive(Default)]
struct Queues {
    live: HashMap<String, VecDeque<Stored>>,
    quarantined: HashMap<String, Vec<QuarantinedMessage>>,
    delayed: BTreeMap<DelayKey, (String, Vec<u8>)>,
}

/// Queue and delayed-message store kept in process memory.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Queues>,
    seq: AtomicU64,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn put(&self, queue: &str, payload: Vec<u8>) -> Result<MessageId, StorageError> {
        let id = MessageId(self.next());
        self.lock()
            .live
            .entry(queue.to_string())
            .or_default()
            .push_back(Stored {
                id,
                payload,
                dequeue_count: 0,
                inserted_at: Instant::now(),
                hidden_until: None,
                nonce: 0,
            });
        Ok(id)
    }

    async fn acquire(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        min_age: Duration,
    ) -> Result<Option<RawMessage>, StorageError> {
        let now = Instant::now();
        let nonce = self.next();
        let mut guard = self.lock();
        let Some(messages) = guard.live.get_mut(queue) else {
            return Ok(None);
        };
        let candidate = messages
            .iter_mut()
            .find(|m| m.is_visible(now) && now.saturating_duration_since(m.inserted_at) >= min_age);
        Ok(candidate.map(|m| {
            m.dequeue_count = m.dequeue_count.saturating_add(1);
            m.hidden_until = Some(now + visibility_timeout);
            m.nonce = nonce;
            RawMessage {
                id: m.id,
                receipt: Receipt {
                    message: m.id,
                    nonce,
                },
                payload: m.payload.clone(),
                dequeue_count: m.dequeue_count,
                inserted_at: m.inserted_at,
            }
        }))
    }

    async fn complete(&self, queue: &str, receipt: &Receipt) -> Result<bool, StorageError> {
        let mut guard = self.lock();
        let Some(messages) = guard.live.get_mut(queue) else {
            return Ok(false);
        };
        let pos = messages
            .iter()
            .position(|m| m.id == receipt.message && m.nonce == receipt.nonce);
        Ok(pos.and_then(|i| messages.remove(i)).is_some())
    }

    async fn make_visible_now(&self, queue: &str, receipt: &Receipt) -> Result<bool, StorageError> {
        let mut guard = self.lock();
        let found = guard
            .live
            .get_mut(queue)
            .and_then(|q| {
                q.iter_mut()
                    .find(|m| m.id == receipt.message && m.nonce == receipt.nonce)
            })
            .map(|m| m.hidden_until = None);
        Ok(found.is_some())
    }

    async fn quarantine(&self, queue: &str, message: RawMessage) -> Result<(), StorageError> {
        let mut guard = self.lock();
        if let Some(messages) = guard.live.get_mut(queue) {
            messages.retain(|m| m.id != message.id);
        }
        guard
            .quarantined
            .entry(queue.to_string())
            .or_default()
            .push(QuarantinedMessage {
                id: message.id,
                queue: queue.to_string(),
                payload: message.payload,
                dequeue_count: message.dequeue_count,
            });
        Ok(())
    }

    async fn list_quarantined(&self, queue: &str) -> Result<Vec<QuarantinedMessage>, StorageError> {
        Ok(self
            .lock()
            .quarantined
            .get(queue)
            .cloned()
            .unwrap_or_default())
    }

    async fn len(&self, queue: &str) -> Result<usize, StorageError> {
        Ok(self.lock().live.get(queue).map_or(0, VecDeque::len))
    }
}

#[async_trait]
impl DelayedStore for MemoryQueueStore {
    async fn put_delayed(
        &self,
        trigger_at: Instant,
        queue: &str,
        payload: Vec<u8>,
    ) -> Result<DelayKey, StorageError> {
        let key = DelayKey {
            trigger_at,
            seq: self.next(),
        };
        self.lock()
            .delayed
            .insert(key, (queue.to_string(), payload));
        Ok(key)
    }

    fn list_delayed(&self) -> BoxStream<'_, Result<DelayedRecord, StorageError>> {
        let snapshot: Vec<_> = self
            .lock()
            .delayed
            .iter()
            .map(|(key, (queue, payload))| {
                Ok(DelayedRecord {
                    key: *key,
                    queue: queue.clone(),
                    payload: payload.clone(),
                })
            })
            .collect();
        futures::stream::iter(snapshot).boxed()
    }

    async fn delete_delayed(&self, key: &DelayKey) -> Result<bool, StorageError> {
        Ok(self.lock().delayed.remove(key).is_some())
    }
}

/// Single-process fencing lease table.
#[derive(Default)]
pub struct MemoryFence {
    leases: Mutex<HashMap<String, (u64, Instant)>>,
    tokens: AtomicU64,
}

impl MemoryFence {
    /// Creates an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FencingLease for MemoryFence {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<FenceToken>, StorageError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = self.tokens.fetch_add(1, Ordering::Relaxed) + 1;
        leases.insert(key.to_string(), (token, now + ttl));
        Ok(Some(FenceToken {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, token: &FenceToken) -> Result<bool, StorageError> {
        let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        match leases.get(&token.key) {
            Some((held, _)) if *held == token.token => {
                leases.remove(&token.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn hidden_message_reappears_after_visibility_timeout() {
        let store = MemoryQueueStore::new();
        store.put("q", b"a".to_vec()).await.unwrap();

        let first = store.acquire("q", VT, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.dequeue_count, 1);
        assert!(store.acquire("q", VT, Duration::ZERO).await.unwrap().is_none());

        tokio::time::advance(VT).await;
        let second = store.acquire("q", VT, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.dequeue_count, 2);

        // the first delivery's receipt is stale now
        assert!(!store.complete("q", &first.receipt).await.unwrap());
        assert!(store.complete("q", &second.receipt).await.unwrap());
        assert_eq!(store.len("q").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_age_skips_young_messages() {
        let store = MemoryQueueStore::new();
        store.put("q", b"young".to_vec()).await.unwrap();
        let min_age = Duration::from_secs(5);

        assert!(store.acquire("q", VT, min_age).await.unwrap().is_none());
        tokio::time::advance(min_age).await;
        let msg = store.acquire("q", VT, min_age).await.unwrap().unwrap();
        assert_eq!(msg.dequeue_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_records_are_listed_in_trigger_order() {
        let store = MemoryQueueStore::new();
        let now = Instant::now();
        store
            .put_delayed(now + Duration::from_secs(20), "q", b"late".to_vec())
            .await
            .unwrap();
        let early = store
            .put_delayed(now + Duration::from_secs(10), "q", b"early".to_vec())
            .await
            .unwrap();

        let listed: Vec<_> = store.list_delayed().collect().await;
        let payloads: Vec<_> = listed.iter().map(|r| r.as_ref().unwrap().payload.clone()).collect();
        assert_eq!(payloads, vec![b"early".to_vec(), b"late".to_vec()]);

        assert!(store.delete_delayed(&early).await.unwrap());
        assert!(!store.delete_delayed(&early).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fence_is_single_flight_until_expiry() {
        let fence = MemoryFence::new();
        let ttl = Duration::from_secs(10);

        let held = fence.try_acquire("k", ttl).await.unwrap().unwrap();
        assert!(fence.try_acquire("k", ttl).await.unwrap().is_none());

        tokio::time::advance(ttl).await;
        let next = fence.try_acquire("k", ttl).await.unwrap().unwrap();
        assert!(next.token > held.token);
        assert!(!fence.release(&held).await.unwrap());
        assert!(fence.release(&next).await.unwrap());
    }
}
