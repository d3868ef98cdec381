//! Message lifecycle: storage contracts, policy and delayed delivery.
//!
//! ## Contents
//! - [`QueueStore`], [`DelayedStore`], [`FencingLease`] storage collaborators
//! - [`MemoryQueueStore`], [`MemoryFence`] in-memory implementations
//! - [`MessagePolicy`] dequeue / complete / fail / defer / quarantine
//! - [`QueueWorkItem`] one delivery, resolved exactly once
//! - [`DelayedSweeper`] moves due delayed messages into their queues

mod delayed;
mod item;
mod memory;
mod policy;
mod store;

pub use delayed::DelayedSweeper;
pub use item::QueueWorkItem;
pub use memory::{MemoryFence, MemoryQueueStore};
pub use policy::{DequeueMode, MessagePolicy, Resolution};
pub use store::{
    DelayKey, DelayedRecord, DelayedStore, FenceToken, FencingLease, MessageId, QuarantinedMessage,
    QueueStore, RawMessage, Receipt,
};
