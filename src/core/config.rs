//! # Host configuration.
//!
//! Provides [`HostConfig`] centralized settings for the cell host and the
//! supervisors it creates.
//!
//! ## Sentinel values
//! - `grace = 0s` → do not wait for cells on shutdown
//! - `stop_grace = 0s` → discard a cell's boundary right after asking it to stop
//! - `IsolationMode::DedicatedRuntime { worker_threads: 0 }` → one worker thread

use std::time::Duration;

use crate::policies::FloodPolicy;

/// Minimum interval between two head polls of one cell.
pub const MIN_HEAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How cells are isolated from the host and from each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationMode {
    /// Each boot gets its own multi-thread tokio runtime, shut down in the
    /// background when the boot ends or is discarded.
    DedicatedRuntime {
        /// Worker threads of the cell runtime.
        worker_threads: usize,
    },
    /// Cells run as tasks on the host runtime. Panics are still contained;
    /// a discarded cell's own spawned tasks are not torn down.
    SharedRuntime,
}

impl Default for IsolationMode {
    fn default() -> Self {
        IsolationMode::DedicatedRuntime { worker_threads: 2 }
    }
}

/// Configuration of a [`CellHost`](crate::CellHost).
///
/// ## Field semantics
/// - `grace`: host shutdown budget for all cells together
/// - `stop_grace`: budget for one cell to stop before its boundary is discarded
/// - `idle_timeout`: longest wait of an idle cell before it polls its queues again
/// - `head_poll_interval`: period of the in-cell head poller (clamped to [`MIN_HEAD_POLL_INTERVAL`])
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `flood`: restart flood guard
/// - `isolation`: how boots are isolated
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Maximum time to wait for all cells on shutdown.
    pub grace: Duration,
    /// Maximum time to wait for one cell to stop before discarding it.
    pub stop_grace: Duration,
    /// Upper bound of an idle cell's wait.
    pub idle_timeout: Duration,
    /// Head poll period.
    pub head_poll_interval: Duration,
    /// Capacity of the event bus.
    pub bus_capacity: usize,
    /// Restart flood guard settings.
    pub flood: FloodPolicy,
    /// Boundary strategy.
    pub isolation: IsolationMode,
}

impl HostConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the head poll interval, never below [`MIN_HEAD_POLL_INTERVAL`].
    #[inline]
    pub fn head_poll_interval_clamped(&self) -> Duration {
        self.head_poll_interval.max(MIN_HEAD_POLL_INTERVAL)
    }
}

impl Default for HostConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`, `stop_grace = 25s`
    /// - `idle_timeout = 10s`
    /// - `head_poll_interval = 60s`
    /// - `bus_capacity = 1024`
    /// - `flood = FloodPolicy::default()`
    /// - `isolation = DedicatedRuntime { worker_threads: 2 }`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            stop_grace: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(10),
            head_poll_interval: Duration::from_secs(60),
            bus_capacity: 1024,
            flood: FloodPolicy::default(),
            isolation: IsolationMode::default(),
        }
    }
}
