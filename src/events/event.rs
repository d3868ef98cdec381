//! # Runtime events emitted by the host, supervisors, cells and runners.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Host events**: shutdown flow across all cells
//! - **Supervisor events**: boundary lifecycle, restarts, deployment changes
//! - **Cell events**: service lifecycle and per-invocation faults inside a cell
//! - **Message events**: quarantine and delayed re-delivery
//!
//! The [`Event`] struct carries metadata such as timestamps, cell/service names,
//! reasons and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use cellvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::CellFailed)
//!     .with_cell("worker-1")
//!     .with_reason("boom")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::CellFailed);
//! assert_eq!(ev.cell.as_deref(), Some("worker-1"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Host events ===
    /// Shutdown requested (OS signal or explicit stop).
    ShutdownRequested,

    /// All cells stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some cells did not stop in time.
    GraceExceeded,

    // === Supervisor events ===
    /// A fresh isolation boundary is booting a deployment.
    ///
    /// Sets: `cell`, `deployment`, `attempt` (boot number, 1-based).
    CellStarting,

    /// The cell entry point returned after a clean stop.
    ///
    /// Sets: `cell`, `deployment`.
    CellStopped,

    /// The cell terminated with a fatal error (load failure, panic, background fault).
    ///
    /// Sets: `cell`, `deployment`, `reason`, `attempt`.
    CellFailed,

    /// The cell asked to be rebuilt (code/config change or explicit command).
    ///
    /// Sets: `cell`, `deployment`, `reason` (signal label).
    RestartRequested,

    /// Next boot scheduled after a delay.
    ///
    /// Sets: `cell`, `delay_ms`, `attempt`, `reason` (flood state).
    RestartScheduled,

    /// The boundary did not stop within its grace period and was discarded.
    ///
    /// Sets: `cell`, `timeout_ms`.
    BoundaryDiscarded,

    /// The head poller found a head that differs from the loaded deployment.
    ///
    /// Sets: `cell`, `deployment` (new head), `reason` (what changed).
    DeploymentChanged,

    /// New settings were pushed to a running cell.
    ///
    /// Sets: `cell`.
    SettingsApplied,

    // === Cell events ===
    /// A background service was started.
    ///
    /// Sets: `cell`, `service`.
    ServiceStarted,

    /// A background service was stopped during drain.
    ///
    /// Sets: `cell`, `service`.
    ServiceStopped,

    /// A queued handler failed; the message waits for its visibility timeout.
    ///
    /// Sets: `cell`, `service`, `queue`, `reason`, `attempt` (dequeue count).
    MessageFailed,

    /// A queued handler was aborted; the message was made visible immediately.
    ///
    /// Sets: `cell`, `service`, `queue`, `attempt` (dequeue count).
    MessageAbandoned,

    /// A scheduled job failed; the invocation was dropped.
    ///
    /// Sets: `cell`, `service`, `reason`.
    ScheduledJobFailed,

    /// Execution timeout hit for a handler or job.
    ///
    /// Sets: `cell`, `service`, `timeout_ms`.
    TimeoutHit,

    // === Message events ===
    /// A poison message was moved to quarantine.
    ///
    /// Sets: `queue`, `attempt` (dequeue count).
    MessageQuarantined,

    /// Due delayed messages were moved into their target queues.
    ///
    /// Sets: `attempt` (number of released messages).
    DelayedReleased,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Cell name, if applicable.
    pub cell: Option<Arc<str>>,
    /// Service (or subscriber) name, if applicable.
    pub service: Option<Arc<str>>,
    /// Queue name, if applicable.
    pub queue: Option<Arc<str>>,
    /// Deployment name, if applicable.
    pub deployment: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt / boot / dequeue count depending on the kind.
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed) + 1,
            at: SystemTime::now(),
            kind,
            cell: None,
            service: None,
            queue: None,
            deployment: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
        }
    }

    /// Attaches a cell name.
    #[inline]
    pub fn with_cell(mut self, cell: impl Into<Arc<str>>) -> Self {
        self.cell = Some(cell.into());
        self
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a queue name.
    #[inline]
    pub fn with_queue(mut self, queue: impl Into<Arc<str>>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Attaches a deployment name.
    #[inline]
    pub fn with_deployment(mut self, deployment: impl Into<Arc<str>>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
