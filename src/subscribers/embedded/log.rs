//! # LogWriter: renders runtime events through `tracing`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  cell starting cell="worker-1" deployment="deployment/Qm..." boot=1
//! WARN  message failed cell="worker-1" service="orders" queue="orders" dequeue_count=2 err="..."
//! WARN  message quarantined queue="orders" dequeue_count=3
//! INFO  restart scheduled cell="worker-1" delay_ms=1000 boot=2
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let cell = e.cell.as_deref().unwrap_or("-");
        let service = e.service.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ShutdownRequested => tracing::info!("shutdown requested"),
            EventKind::AllStoppedWithin => tracing::info!("all cells stopped within grace"),
            EventKind::GraceExceeded => tracing::error!("shutdown grace exceeded"),
            EventKind::CellStarting => tracing::info!(
                cell,
                deployment = e.deployment.as_deref(),
                boot = e.attempt,
                "cell starting"
            ),
            EventKind::CellStopped => tracing::info!(cell, "cell stopped"),
            EventKind::CellFailed => {
                tracing::error!(cell, boot = e.attempt, err = reason, "cell failed")
            }
            EventKind::RestartRequested => tracing::info!(cell, signal = reason, "restart requested"),
            EventKind::RestartScheduled => tracing::info!(
                cell,
                delay_ms = e.delay_ms,
                boot = e.attempt,
                flood = reason,
                "restart scheduled"
            ),
            EventKind::BoundaryDiscarded => {
                tracing::warn!(cell, grace_ms = e.timeout_ms, "boundary discarded")
            }
            EventKind::DeploymentChanged => tracing::info!(
                cell,
                deployment = e.deployment.as_deref(),
                change = reason,
                "deployment changed"
            ),
            EventKind::SettingsApplied => tracing::info!(cell, "settings applied"),
            EventKind::ServiceStarted => tracing::debug!(cell, service, "service started"),
            EventKind::ServiceStopped => tracing::debug!(cell, service, "service stopped"),
            EventKind::MessageFailed => tracing::warn!(
                cell,
                service,
                queue = e.queue.as_deref(),
                dequeue_count = e.attempt,
                err = reason,
                "message failed"
            ),
            EventKind::MessageAbandoned => tracing::info!(
                cell,
                service,
                queue = e.queue.as_deref(),
                dequeue_count = e.attempt,
                "message abandoned"
            ),
            EventKind::ScheduledJobFailed => {
                tracing::warn!(cell, service, err = reason, "scheduled job failed")
            }
            EventKind::TimeoutHit => {
                tracing::warn!(cell, service, timeout_ms = e.timeout_ms, "timeout hit")
            }
            EventKind::MessageQuarantined => tracing::warn!(
                queue = e.queue.as_deref(),
                dequeue_count = e.attempt,
                "message quarantined"
            ),
            EventKind::DelayedReleased => {
                tracing::debug!(released = e.attempt, "delayed messages released")
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = service, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = service, info = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
