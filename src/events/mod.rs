//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `CellHost`, `CellSupervisor`, `CellScheduler`, the runners,
//!   `MessagePolicy`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the host listener (fans out to `SubscriberSet` and updates
//!   `AliveTracker`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
