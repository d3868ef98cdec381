//! Restart and delay policies.
//!
//! ## Contents
//! - [`FloodPolicy`] / [`FloodGuard`] how fast a faulting cell may be rebuilt
//! - [`BackoffPolicy`] how delays grow once a cell is flooding
//! - [`JitterPolicy`] randomization to avoid synchronized reboots
//!
//! ## Quick wiring
//! ```text
//! HostConfig { flood: FloodPolicy { backoff: BackoffPolicy { jitter, .. }, .. }, .. }
//!      └─► core::supervisor::CellSupervisor uses:
//!           - FloodGuard::record_fault(now) after every faulted run
//!           - the returned delay before booting the next boundary
//! ```

mod backoff;
mod flood;
mod jitter;

pub use backoff::BackoffPolicy;
pub use flood::{FloodGuard, FloodPolicy, RestartDelay};
pub use jitter::JitterPolicy;
