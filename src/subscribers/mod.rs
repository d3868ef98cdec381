//! # Event subscribers for the cellvisor runtime.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   CellSupervisor / CellScheduler ── publish(Event) ──► Bus ──► host listener
//!                                                                   │
//!                                                                   ├──► AliveTracker (cell liveness)
//!                                                                   └──► SubscriberSet
//!                                                                          ├──► LogWriter
//!                                                                          └──► custom (metrics, alerts)
//! ```

mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
mod embedded;

pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
