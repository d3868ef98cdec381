//! Host core: isolation, supervision and lifecycle of cells.
//!
//! - [`host`]: runs many cells, fans out events, graceful shutdown;
//! - [`supervisor`]: boot/restart loop of one cell with flood protection;
//! - [`boundary`]: isolated execution of one boot;
//! - [`entry`]: what runs inside a boundary;
//! - [`environment`], [`signal`]: what a cell sees and how it asks for a rebuild;
//! - [`shutdown`]: OS signals and explicit stop.

mod alive;
mod boundary;
mod builder;
mod config;
mod entry;
mod environment;
mod host;
mod shutdown;
mod signal;
mod supervisor;

pub use alive::AliveTracker;
pub use boundary::{Boundary, BoundaryExit};
pub use builder::HostBuilder;
pub use config::{HostConfig, IsolationMode, MIN_HEAD_POLL_INTERVAL};
pub use entry::{CellEntry, ServiceCellEntry};
pub use environment::{CellEnvironment, CellIdentity};
pub use host::CellHost;
pub use shutdown::ShutdownCause;
pub use signal::{CellOutcome, DeploymentCommand, RestartSignal, RestartTrigger};
pub use supervisor::{CellSupervisor, SupervisorHandle};

/// Extracts the message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
