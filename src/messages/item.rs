//! # A single delivery of a queued message.
//!
//! [`QueueWorkItem`] is produced by [`MessagePolicy::acquire`](super::MessagePolicy::acquire)
//! and consumed by value by exactly one of `complete`, `fail`,
//! `defer_to_visibility_expiry` or `resume_later`. Once resolved it cannot be
//! used again.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;

use super::store::{FenceToken, MessageId, RawMessage};

/// A dequeued message awaiting resolution.
#[must_use = "a work item must be completed, failed or deferred"]
#[derive(Debug)]
pub struct QueueWorkItem {
    pub(super) queue: Arc<str>,
    pub(super) message: RawMessage,
    pub(super) visible_at: Instant,
    pub(super) fence: Option<FenceToken>,
    resume_after: OnceLock<Duration>,
}

impl QueueWorkItem {
    pub(super) fn new(
        queue: Arc<str>,
        message: RawMessage,
        visible_at: Instant,
        fence: Option<FenceToken>,
    ) -> Self {
        Self {
            queue,
            message,
            visible_at,
            fence,
            resume_after: OnceLock::new(),
        }
    }

    /// Queue this message was taken from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Logical message id.
    pub fn id(&self) -> MessageId {
        self.message.id
    }

    /// Message payload.
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Number of deliveries so far, including this one.
    pub fn dequeue_count(&self) -> u32 {
        self.message.dequeue_count
    }

    /// Instant at which the queue makes the message visible again if unresolved.
    pub fn visible_at(&self) -> Instant {
        self.visible_at
    }

    /// Asks the runner to re-deliver this message after `delay` instead of deleting it.
    ///
    /// Only the first request counts. Returns `false` if one was already recorded.
    pub fn resume_later(&self, delay: Duration) -> bool {
        self.resume_after.set(delay).is_ok()
    }

    /// Delay requested through [`QueueWorkItem::resume_later`], if any.
    pub fn resume_requested(&self) -> Option<Duration> {
        self.resume_after.get().copied()
    }
}
