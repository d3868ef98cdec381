//! # Host shutdown triggers.
//!
//! [`wait_for_shutdown`] completes on the first of:
//! - a termination signal delivered to the process;
//! - an explicit [`CellHost::request_stop`](crate::CellHost::request_stop).
//!
//! ## Signals
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`.
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].
//!
//! If signal handlers cannot be installed, only the explicit request stops the host.

use tokio_util::sync::CancellationToken;

/// Why the host is shutting down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The process received a termination signal.
    OsSignal,
    /// Stop was requested through the host.
    Requested,
}

impl ShutdownCause {
    /// Short label for events and logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ShutdownCause::OsSignal => "os_signal",
            ShutdownCause::Requested => "requested",
        }
    }
}

/// Waits until a termination signal arrives or `stop` is cancelled.
pub async fn wait_for_shutdown(stop: &CancellationToken) -> ShutdownCause {
    let signal = async {
        match os_signal().await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(err = %e, "cannot install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = signal => ShutdownCause::OsSignal,
        _ = stop.cancelled() => ShutdownCause::Requested,
    }
}

#[cfg(unix)]
async fn os_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn os_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
