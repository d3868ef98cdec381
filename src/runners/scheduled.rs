//! # Fixed-phase runner over scheduled services.
//!
//! Due times live in an ordered set keyed by `(due, slot)` with a side index
//! `slot → due`, so the earliest job is found and any job rescheduled in
//! logarithmic time.
//!
//! ## Rules
//! - A service first fires one interval after the runner is created.
//! - The next due time is `previous due + interval`, never `now + interval`:
//!   phase does not drift with execution time, and missed slots are caught up.
//! - The next due time is recorded before the job runs; a failing job loses only
//!   its current invocation.
//! - A due time past the clock's range parks the job instead of wrapping.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::invoke;
use crate::error::ServiceError;
use crate::events::{Bus, Event, EventKind};
use crate::services::{ScheduledService, ScheduledSettings};

struct ScheduledSlot {
    service: Arc<dyn ScheduledService>,
    settings: ScheduledSettings,
}

/// Runs scheduled services when they fall due.
pub struct ScheduledServiceRunner {
    cell: Arc<str>,
    slots: Vec<ScheduledSlot>,
    due: BTreeSet<(Instant, usize)>,
    index: HashMap<usize, Instant>,
    bus: Bus,
}

impl ScheduledServiceRunner {
    /// Creates a runner with no services.
    pub fn new(cell: impl Into<Arc<str>>, bus: Bus) -> Self {
        Self {
            cell: cell.into(),
            slots: Vec::new(),
            due: BTreeSet::new(),
            index: HashMap::new(),
            bus,
        }
    }

    /// Adds a service whose first invocation is due at `start + interval`.
    pub fn add(&mut self, service: Arc<dyn ScheduledService>, settings: ScheduledSettings, start: Instant) {
        let slot = self.slots.len();
        let first = start.checked_add(settings.interval());
        self.slots.push(ScheduledSlot { service, settings });
        match first {
            Some(first) => {
                self.due.insert((first, slot));
                self.index.insert(slot, first);
            }
            None => self.park(slot),
        }
    }

    /// Returns true if no service is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest due instant, if any service is registered.
    pub fn next_due(&self) -> Option<Instant> {
        self.due.first().map(|(at, _)| *at)
    }

    /// Moves `service`'s next invocation to `at`. Returns false for an unknown name.
    pub fn reschedule(&mut self, service: &str, at: Instant) -> bool {
        let Some(slot) = self.slots.iter().position(|s| s.service.name() == service) else {
            return false;
        };
        if let Some(previous) = self.index.insert(slot, at) {
            self.due.remove(&(previous, slot));
        }
        self.due.insert((at, slot));
        true
    }

    fn park(&self, slot: usize) {
        tracing::warn!(
            cell = %self.cell,
            service = %self.slots[slot].service.name(),
            "next due time out of range; job parked"
        );
    }

    /// Runs the earliest job if it is due. Returns whether a job ran.
    pub async fn run_single(&mut self, token: &CancellationToken) -> bool {
        self.run_turn(token, token).await
    }

    /// Like [`run_single`](Self::run_single), but the job gets a child of `scope`
    /// and nothing starts once `stop` is cancelled.
    pub async fn run_turn(&mut self, stop: &CancellationToken, scope: &CancellationToken) -> bool {
        if stop.is_cancelled() {
            return false;
        }
        let Some(&(at, slot)) = self.due.first() else {
            return false;
        };
        if at > Instant::now() {
            return false;
        }
        self.due.remove(&(at, slot));
        self.index.remove(&slot);
        match at.checked_add(self.slots[slot].settings.interval()) {
            Some(next) => {
                self.due.insert((next, slot));
                self.index.insert(slot, next);
            }
            None => self.park(slot),
        }
        let entry = &self.slots[slot];

        let child = scope.child_token();
        let res = invoke(
            entry.service.run(at, child.clone()),
            entry.settings.execution_timeout(),
            &child,
        )
        .await;

        match res {
            Ok(()) | Err(ServiceError::Canceled) => {}
            Err(e) => {
                let name = entry.service.name();
                if let ServiceError::Timeout { timeout } = &e {
                    self.bus.publish(
                        Event::new(EventKind::TimeoutHit)
                            .with_cell(self.cell.clone())
                            .with_service(name)
                            .with_timeout(*timeout),
                    );
                }
                self.bus.publish(
                    Event::new(EventKind::ScheduledJobFailed)
                        .with_cell(self.cell.clone())
                        .with_service(name)
                        .with_reason(e.to_string()),
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ScheduledFn;
    use std::sync::Mutex;
    use std::time::Duration;

    type Fired = Arc<Mutex<Vec<(&'static str, u64)>>>;

    fn recorder(name: &'static str, t0: Instant, fired: &Fired) -> Arc<dyn ScheduledService> {
        let fired = fired.clone();
        ScheduledFn::arc(name, move |at: Instant, _c: CancellationToken| {
            fired.lock().unwrap().push((name, (at - t0).as_secs()));
            async { Ok::<(), ServiceError>(()) }
        })
    }

    async fn run_until(runner: &mut ScheduledServiceRunner, end: Instant) {
        let token = CancellationToken::new();
        loop {
            while runner.run_single(&token).await {}
            match runner.next_due() {
                Some(at) if at <= end => tokio::time::sleep_until(at).await,
                _ => break,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_fixed_phase() {
        let t0 = Instant::now();
        let fired: Fired = Arc::default();
        let mut runner = ScheduledServiceRunner::new("cell", Bus::new(8));
        runner.add(recorder("a", t0, &fired), ScheduledSettings::every(Duration::from_secs(10)), t0);
        runner.add(recorder("b", t0, &fired), ScheduledSettings::every(Duration::from_secs(15)), t0);

        run_until(&mut runner, t0 + Duration::from_secs(31)).await;

        assert_eq!(
            *fired.lock().unwrap(),
            vec![("a", 10), ("b", 15), ("a", 20), ("a", 30), ("b", 30)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn catches_up_missed_slots() {
        let t0 = Instant::now();
        let fired: Fired = Arc::default();
        let mut runner = ScheduledServiceRunner::new("cell", Bus::new(8));
        runner.add(recorder("a", t0, &fired), ScheduledSettings::every(Duration::from_secs(10)), t0);

        tokio::time::advance(Duration::from_secs(35)).await;
        let token = CancellationToken::new();
        while runner.run_single(&token).await {}

        let at: Vec<_> = fired.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(at, vec![10, 20, 30]);
        assert_eq!(runner.next_due(), Some(t0 + Duration::from_secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_keeps_its_schedule() {
        let t0 = Instant::now();
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let mut runner = ScheduledServiceRunner::new("cell", bus);
        runner.add(
            ScheduledFn::arc("flaky", |_at: Instant, _c: CancellationToken| async {
                Err::<(), _>(ServiceError::fail("nope"))
            }),
            ScheduledSettings::every(Duration::from_secs(5)),
            t0,
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(runner.run_single(&CancellationToken::new()).await);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ScheduledJobFailed);
        assert_eq!(runner.next_due(), Some(t0 + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_moves_a_single_job() {
        let t0 = Instant::now();
        let fired: Fired = Arc::default();
        let mut runner = ScheduledServiceRunner::new("cell", Bus::new(8));
        runner.add(recorder("a", t0, &fired), ScheduledSettings::every(Duration::from_secs(60)), t0);

        assert!(runner.reschedule("a", t0 + Duration::from_secs(1)));
        assert!(!runner.reschedule("missing", t0));
        assert_eq!(runner.next_due(), Some(t0 + Duration::from_secs(1)));

        run_until(&mut runner, t0 + Duration::from_secs(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec![("a", 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_does_not_overflow() {
        let t0 = Instant::now();
        let fired: Fired = Arc::default();
        let mut runner = ScheduledServiceRunner::new("cell", Bus::new(8));
        let settings = ScheduledSettings {
            interval_secs: u64::MAX,
            execution_timeout_secs: Some(u64::MAX),
        };
        runner.add(recorder("a", t0, &fired), settings, t0);

        let first = t0 + crate::services::MAX_SCHEDULE_INTERVAL;
        assert_eq!(runner.next_due(), Some(first));
        assert!(!runner.run_single(&CancellationToken::new()).await);

        assert!(runner.reschedule("a", t0));
        assert!(runner.run_single(&CancellationToken::new()).await);
        assert_eq!(*fired.lock().unwrap(), vec![("a", 0)]);
        assert_eq!(runner.next_due(), Some(first));
    }
}
