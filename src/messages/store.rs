//! # Storage contracts consumed by the message lifecycle policy.
//!
//! The core never talks to a concrete queue service. It needs:
//! - [`QueueStore`]: enqueue, dequeue-with-visibility-timeout, delete, abandon, quarantine;
//! - [`DelayedStore`]: records for future delivery, listed in trigger order;
//! - [`FencingLease`]: single-flight leases for the resilient dequeue mode.
//!
//! Delivery is at-least-once. A [`Receipt`] identifies one *delivery* of a
//! message: completing or releasing with the receipt of an older delivery is a
//! no-op that returns `Ok(false)`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::time::Instant;

use crate::error::StorageError;

/// Stable identifier of a logical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Handle on one delivery of a message (a "pop receipt").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Receipt {
    /// Message this receipt belongs to.
    pub message: MessageId,
    /// Delivery nonce; changes on every dequeue.
    pub nonce: u64,
}

/// A message as handed out by [`QueueStore::acquire`].
#[derive(Clone, Debug)]
pub struct RawMessage {
    /// Logical message id (stable across redeliveries).
    pub id: MessageId,
    /// Receipt of this particular delivery.
    pub receipt: Receipt,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Number of deliveries so far, including this one.
    pub dequeue_count: u32,
    /// When the message was first enqueued.
    pub inserted_at: Instant,
}

/// A message removed from its live queue after exhausting its trials.
#[derive(Clone, Debug)]
pub struct QuarantinedMessage {
    /// Logical message id.
    pub id: MessageId,
    /// Queue the message was taken from.
    pub queue: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Dequeue count at the time of quarantine.
    pub dequeue_count: u32,
}

/// Queue collaborator with visibility-timeout semantics.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Appends a message to `queue`.
    async fn put(&self, queue: &str, payload: Vec<u8>) -> Result<MessageId, StorageError>;

    /// Hides and returns the oldest visible message that is at least `min_age` old.
    ///
    /// The message stays hidden for `visibility_timeout` unless completed or
    /// made visible again; its dequeue count is incremented.
    async fn acquire(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        min_age: Duration,
    ) -> Result<Option<RawMessage>, StorageError>;

    /// Deletes the delivery identified by `receipt`; `Ok(false)` if it is gone or stale.
    async fn complete(&self, queue: &str, receipt: &Receipt) -> Result<bool, StorageError>;

    /// Makes the delivery identified by `receipt` visible immediately (abandon).
    async fn make_visible_now(&self, queue: &str, receipt: &Receipt) -> Result<bool, StorageError>;

    /// Removes `message` from `queue` and stores it in the quarantine area.
    async fn quarantine(&self, queue: &str, message: RawMessage) -> Result<(), StorageError>;

    /// Lists quarantined messages of `queue`.
    async fn list_quarantined(&self, queue: &str) -> Result<Vec<QuarantinedMessage>, StorageError>;

    /// Number of live (visible or hidden) messages in `queue`.
    async fn len(&self, queue: &str) -> Result<usize, StorageError>;
}

/// Key of a delayed record: ordered by trigger time, then insertion sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelayKey {
    /// When the message becomes due.
    pub trigger_at: Instant,
    /// Tie-breaker for identical trigger times.
    pub seq: u64,
}

/// A message scheduled for future delivery.
#[derive(Clone, Debug)]
pub struct DelayedRecord {
    /// Ordering key.
    pub key: DelayKey,
    /// Target queue.
    pub queue: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// Storage for delayed messages.
#[async_trait]
pub trait DelayedStore: Send + Sync + 'static {
    /// Records `payload` for delivery into `queue` at `trigger_at`.
    async fn put_delayed(
        &self,
        trigger_at: Instant,
        queue: &str,
        payload: Vec<u8>,
    ) -> Result<DelayKey, StorageError>;

    /// Streams delayed records in ascending trigger order.
    ///
    /// Callers may stop polling at any point; partial scans are expected.
    fn list_delayed(&self) -> BoxStream<'_, Result<DelayedRecord, StorageError>>;

    /// Deletes a delayed record; `Ok(false)` if it was already gone.
    async fn delete_delayed(&self, key: &DelayKey) -> Result<bool, StorageError>;
}

/// Proof of holding a single-flight lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FenceToken {
    /// Leased key.
    pub key: String,
    /// Monotonic fencing number; a newer holder always has a larger token.
    pub token: u64,
}

/// External single-flight lease used by the resilient dequeue mode.
#[async_trait]
pub trait FencingLease: Send + Sync + 'static {
    /// Acquires `key` for `ttl`; `None` while another holder's lease is live.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<FenceToken>, StorageError>;

    /// Releases a lease; `Ok(false)` if the token no longer holds it.
    async fn release(&self, token: &FenceToken) -> Result<bool, StorageError>;
}
