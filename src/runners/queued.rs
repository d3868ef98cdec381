//! # Round-robin runner over queued services.
//!
//! Each call to [`QueuedServiceRunner::run_single`] gives one service a turn:
//!
//! ```text
//! cursor ──► service[i] ──► acquire ──► process ──► complete / fail / defer
//!                              ▲                          │
//!                              └── while within window ◄──┘
//! cursor = (i + 1) % n
//! ```
//!
//! ## Rules
//! - The cursor advances before the turn, so a failing service never starves the others.
//! - A turn keeps draining the same queue while messages are available and the
//!   service's continue window has not elapsed (a zero window means one message).
//! - Handler outcomes:
//!   - `Ok` → complete (or resume later when the item asked for it);
//!   - `Canceled` → fail, the message is visible immediately;
//!   - other errors and panics → defer to visibility expiry and return a [`RunnerFault`].

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::invoke;
use crate::error::{ServiceError, StorageError};
use crate::events::{Bus, Event, EventKind};
use crate::messages::MessagePolicy;
use crate::services::{QueuedService, QueuedSettings};

/// Failure surfaced by a runner turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerFault {
    /// A handler failed; its message was deferred.
    Handler {
        /// Service name.
        service: String,
        /// Handler error.
        error: ServiceError,
    },
    /// The queue store failed.
    Storage {
        /// Service name.
        service: String,
        /// Storage error.
        error: StorageError,
    },
}

struct QueuedSlot {
    service: Arc<dyn QueuedService>,
    settings: QueuedSettings,
}

/// Rotates over the queued services of a cell.
pub struct QueuedServiceRunner {
    cell: Arc<str>,
    slots: Vec<QueuedSlot>,
    cursor: usize,
    policy: Arc<MessagePolicy>,
    bus: Bus,
}

impl QueuedServiceRunner {
    /// Creates a runner with no services.
    pub fn new(cell: impl Into<Arc<str>>, policy: Arc<MessagePolicy>, bus: Bus) -> Self {
        Self {
            cell: cell.into(),
            slots: Vec::new(),
            cursor: 0,
            policy,
            bus,
        }
    }

    /// Appends a service to the rotation.
    pub fn add(&mut self, service: Arc<dyn QueuedService>, settings: QueuedSettings) {
        self.slots.push(QueuedSlot { service, settings });
    }

    /// Number of services in the rotation.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no service is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Gives the next service its turn. Returns whether any message was processed.
    pub async fn run_single(&mut self, token: &CancellationToken) -> Result<bool, RunnerFault> {
        self.run_turn(token, token).await
    }

    /// Like [`run_single`](Self::run_single), but handlers get children of `scope`
    /// while `stop` only ends the turn: no message is acquired once `stop` is cancelled.
    pub async fn run_turn(
        &mut self,
        stop: &CancellationToken,
        scope: &CancellationToken,
    ) -> Result<bool, RunnerFault> {
        if self.slots.is_empty() || stop.is_cancelled() {
            return Ok(false);
        }
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();

        let slot = &self.slots[idx];
        let name = slot.service.name();
        let settings = &slot.settings;
        let storage = |error: StorageError| RunnerFault::Storage {
            service: name.to_string(),
            error,
        };

        let started = Instant::now();
        let mut processed = false;
        while !stop.is_cancelled() {
            let acquired = self
                .policy
                .acquire(&settings.queue, settings.visibility_timeout(), settings.max_trials)
                .await
                .map_err(storage)?;
            let Some(item) = acquired else { break };
            processed = true;

            let child = scope.child_token();
            let timeout = settings.execution_timeout();
            let outcome = invoke(slot.service.process(&item, child.clone()), Some(timeout), &child).await;
            let dequeue_count = item.dequeue_count();

            match outcome {
                Ok(()) => {
                    match item.resume_requested() {
                        Some(delay) => self.policy.resume_later(item, delay).await,
                        None => self.policy.complete(item).await,
                    }
                    .map_err(storage)?;
                }
                Err(ServiceError::Canceled) => {
                    self.policy.fail(item).await.map_err(storage)?;
                    self.publish(EventKind::MessageAbandoned, name, &settings.queue, dequeue_count);
                }
                Err(error) => {
                    self.policy
                        .defer_to_visibility_expiry(item)
                        .await
                        .map_err(storage)?;
                    if let ServiceError::Timeout { timeout } = &error {
                        self.bus.publish(
                            Event::new(EventKind::TimeoutHit)
                                .with_cell(self.cell.clone())
                                .with_service(name)
                                .with_timeout(*timeout),
                        );
                    }
                    self.bus.publish(
                        Event::new(EventKind::MessageFailed)
                            .with_cell(self.cell.clone())
                            .with_service(name)
                            .with_queue(settings.queue.as_str())
                            .with_attempt(dequeue_count)
                            .with_reason(error.to_string()),
                    );
                    return Err(RunnerFault::Handler {
                        service: name.to_string(),
                        error,
                    });
                }
            }

            if started.elapsed() >= settings.continue_window() {
                break;
            }
        }
        Ok(processed)
    }

    fn publish(&self, kind: EventKind, service: &str, queue: &str, dequeue_count: u32) {
        self.bus.publish(
            Event::new(kind)
                .with_cell(self.cell.clone())
                .with_service(service)
                .with_queue(queue)
                .with_attempt(dequeue_count),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MemoryQueueStore, QueueStore};
    use crate::services::QueuedFn;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn settings(queue: &str, window_secs: u64) -> QueuedSettings {
        let mut s = QueuedSettings::new(queue);
        s.continue_window_secs = window_secs;
        s.execution_timeout_secs = Some(8);
        s
    }

    fn runner(store: &Arc<MemoryQueueStore>, bus: &Bus) -> QueuedServiceRunner {
        let policy = Arc::new(MessagePolicy::new(store.clone(), bus.clone()));
        QueuedServiceRunner::new("cell", policy, bus.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queue_within_continue_window_exactly_once() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut runner = runner(&store, &bus);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        runner.add(
            QueuedFn::arc("counter", move |_p: Vec<u8>, _c: CancellationToken| {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), ServiceError>(())
                }
            }),
            settings("q", 30),
        );
        for i in 0..3u8 {
            store.put("q", vec![i]).await.unwrap();
        }

        let token = CancellationToken::new();
        assert_eq!(runner.run_single(&token).await, Ok(true));
        assert_eq!(runner.run_single(&token).await, Ok(false));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(runner.run_single(&token).await, Ok(false));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(store.len("q").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_turn_without_cancelling_the_handler() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut runner = runner(&store, &bus);
        let stop = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (s, st) = (seen.clone(), stop.clone());
        runner.add(
            QueuedFn::arc("q", move |_p: Vec<u8>, ctx: CancellationToken| {
                st.cancel();
                s.lock().unwrap().push(ctx.is_cancelled());
                async { Ok::<(), ServiceError>(()) }
            }),
            settings("q", 30),
        );
        for i in 0..3u8 {
            store.put("q", vec![i]).await.unwrap();
        }

        let scope = CancellationToken::new();
        assert_eq!(runner.run_turn(&stop, &scope).await, Ok(true));
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        assert_eq!(store.len("q").await.unwrap(), 2);
        assert_eq!(runner.run_turn(&stop, &scope).await, Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_is_fair_across_services() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut runner = runner(&store, &bus);
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = order.clone();
            runner.add(
                QueuedFn::arc(name, move |_p: Vec<u8>, _c: CancellationToken| {
                    order.lock().unwrap().push(name);
                    async { Ok::<(), ServiceError>(()) }
                }),
                settings(name, 0),
            );
            for _ in 0..2 {
                store.put(name, b"m".to_vec()).await.unwrap();
            }
        }

        let token = CancellationToken::new();
        for _ in 0..6 {
            assert_eq!(runner.run_single(&token).await, Ok(true));
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_service_does_not_starve_the_next_one() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut runner = runner(&store, &bus);
        runner.add(
            QueuedFn::arc("broken", |_p: Vec<u8>, _c: CancellationToken| async {
                Err::<(), _>(ServiceError::fail("boom"))
            }),
            settings("broken", 30),
        );
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        runner.add(
            QueuedFn::arc("healthy", move |_p: Vec<u8>, _c: CancellationToken| {
                d.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), ServiceError>(()) }
            }),
            settings("healthy", 30),
        );
        store.put("broken", b"x".to_vec()).await.unwrap();
        store.put("healthy", b"y".to_vec()).await.unwrap();

        let token = CancellationToken::new();
        let fault = runner.run_single(&token).await.unwrap_err();
        assert_eq!(
            fault,
            RunnerFault::Handler {
                service: "broken".into(),
                error: ServiceError::fail("boom"),
            }
        );
        assert_eq!(runner.run_single(&token).await, Ok(true));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        // the failed message is hidden, not lost
        assert_eq!(store.len("broken").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poison_orders_all_end_in_quarantine() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let mut runner = runner(&store, &bus);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut orders = settings("orders", 30);
        orders.max_trials = 2;
        let visibility = orders.visibility_timeout();
        runner.add(
            QueuedFn::arc("orders", move |_p: Vec<u8>, _c: CancellationToken| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ServiceError::fail("bad order")) }
            }),
            orders,
        );
        for id in 1..=3 {
            store.put("orders", format!("order-{id}").into_bytes()).await.unwrap();
        }

        let token = CancellationToken::new();
        for _ in 0..3 {
            assert!(runner.run_single(&token).await.is_err());
        }
        tokio::time::advance(visibility).await;
        // every redelivery reaches max_trials
        assert_eq!(runner.run_single(&token).await, Ok(false));
        tokio::time::advance(visibility * 2).await;
        assert_eq!(runner.run_single(&token).await, Ok(false));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let mut quarantined: Vec<Vec<u8>> = store
            .list_quarantined("orders")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.payload)
            .collect();
        quarantined.sort();
        assert_eq!(
            quarantined,
            vec![b"order-1".to_vec(), b"order-2".to_vec(), b"order-3".to_vec()]
        );
        assert_eq!(store.len("orders").await.unwrap(), 0);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::MessageFailed,
                EventKind::MessageFailed,
                EventKind::MessageFailed,
                EventKind::MessageQuarantined,
                EventKind::MessageQuarantined,
                EventKind::MessageQuarantined,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_and_is_deferred() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let mut runner = runner(&store, &bus);
        runner.add(
            QueuedFn::arc("slow", |_p: Vec<u8>, _c: CancellationToken| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), ServiceError>(())
            }),
            settings("slow", 30),
        );
        store.put("slow", b"z".to_vec()).await.unwrap();

        let token = CancellationToken::new();
        let fault = runner.run_single(&token).await.unwrap_err();
        assert!(matches!(
            fault,
            RunnerFault::Handler { error: ServiceError::Timeout { .. }, .. }
        ));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TimeoutHit);
        assert_eq!(store.len("slow").await.unwrap(), 1);
    }
}
