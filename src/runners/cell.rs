//! # Cell scheduler: the main loop of a running cell.
//!
//! ```text
//! Initializing ── setup hooks ── start background ──► Running
//!
//! Running loop:
//!   ├─ queued.run_turn()       ─┐
//!   ├─ scheduled.run_turn()    ─┼─ any work? ──► loop again
//!   │                           └─ idle ──► wait(idle timeout | next due | cancel | background exit)
//!   └─ cancel ──► drain: stop hooks → cancel internal scope → join background ──► Stopped
//! ```
//!
//! The internal scope is not a child of the caller's token: only drain cancels
//! it, so background bodies and in-flight handlers observe cancellation after
//! the stop hooks have run.
//!
//! ## Rules
//! - Setup and start failures abort initialization; started services are still stopped.
//! - A background service that fails, or a handler returning `Fatal`, ends the run with an error.
//! - Other handler faults are logged; the loop keeps rotating.
//! - Idle waits never exceed the idle timeout.
//! - Drain always runs, even when the loop exits with an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::queued::{QueuedServiceRunner, RunnerFault};
use super::scheduled::ScheduledServiceRunner;
use crate::error::{CellError, ServiceError};
use crate::events::{Bus, Event, EventKind};
use crate::messages::MessagePolicy;
use crate::services::{BackgroundService, ServiceInstance};

/// Lifecycle of a [`CellScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellState {
    /// Running setup and start hooks.
    Initializing,
    /// Main loop active.
    Running,
    /// Drained; no service runs anymore.
    Stopped,
}

type BackgroundExit = (String, Result<(), ServiceError>);

/// Drives all services of one cell.
pub struct CellScheduler {
    cell: Arc<str>,
    services: Vec<ServiceInstance>,
    queued: QueuedServiceRunner,
    scheduled: ScheduledServiceRunner,
    background: Vec<Arc<dyn BackgroundService>>,
    idle_timeout: Duration,
    bus: Bus,
    state: watch::Sender<CellState>,
}

impl CellScheduler {
    /// Builds a scheduler for `services`; scheduled services are phased from now.
    pub fn new(
        cell: impl Into<Arc<str>>,
        services: Vec<ServiceInstance>,
        policy: Arc<MessagePolicy>,
        idle_timeout: Duration,
        bus: Bus,
    ) -> Self {
        let cell = cell.into();
        let start = Instant::now();
        let mut queued = QueuedServiceRunner::new(cell.clone(), policy, bus.clone());
        let mut scheduled = ScheduledServiceRunner::new(cell.clone(), bus.clone());
        let mut background = Vec::new();
        for svc in &services {
            match svc {
                ServiceInstance::Queued { service, settings } => {
                    queued.add(service.clone(), settings.clone())
                }
                ServiceInstance::Scheduled { service, settings } => {
                    scheduled.add(service.clone(), settings.clone(), start)
                }
                ServiceInstance::Background { service } => background.push(service.clone()),
            }
        }
        let (state, _) = watch::channel(CellState::Initializing);
        Self {
            cell,
            services,
            queued,
            scheduled,
            background,
            idle_timeout: idle_timeout.max(Duration::from_millis(1)),
            bus,
            state,
        }
    }

    /// Observes the scheduler's lifecycle.
    pub fn state(&self) -> watch::Receiver<CellState> {
        self.state.subscribe()
    }

    /// Runs the cell until `token` is cancelled or a fatal fault occurs.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), CellError> {
        let internal = CancellationToken::new();
        let mut tasks: JoinSet<BackgroundExit> = JoinSet::new();

        let started = match self.initialize(&internal, &mut tasks).await {
            Ok(()) => {
                self.state.send_replace(CellState::Running);
                self.drive(&token, &internal, &mut tasks).await
            }
            Err(e) => Err(e),
        };
        let drained = self.drain(&internal, &mut tasks).await;
        self.state.send_replace(CellState::Stopped);
        started.and(drained)
    }

    async fn initialize(
        &mut self,
        internal: &CancellationToken,
        tasks: &mut JoinSet<BackgroundExit>,
    ) -> Result<(), CellError> {
        for svc in &self.services {
            svc.setup().await.map_err(|error| CellError::Setup {
                service: svc.name().to_string(),
                error,
            })?;
        }
        let mut started = Vec::with_capacity(self.background.len());
        for svc in std::mem::take(&mut self.background) {
            if let Err(error) = svc.start().await {
                self.background = started;
                return Err(CellError::Background {
                    service: svc.name().to_string(),
                    error,
                });
            }
            self.publish(EventKind::ServiceStarted, svc.name());
            let body = svc.clone();
            let ctx = internal.clone();
            tasks.spawn(async move {
                let res = body.run(ctx).await;
                (body.name().to_string(), res)
            });
            started.push(svc);
        }
        self.background = started;
        Ok(())
    }

    async fn drive(
        &mut self,
        token: &CancellationToken,
        internal: &CancellationToken,
        tasks: &mut JoinSet<BackgroundExit>,
    ) -> Result<(), CellError> {
        loop {
            if token.is_cancelled() {
                return Ok(());
            }
            while let Some(joined) = tasks.try_join_next() {
                self.background_exit(joined)?;
            }

            let mut worked = match self.queued.run_turn(token, internal).await {
                Ok(worked) => worked,
                Err(RunnerFault::Handler { service, error: error @ ServiceError::Fatal { .. } }) => {
                    return Err(CellError::Fatal { service, error });
                }
                Err(RunnerFault::Handler { service, error }) => {
                    tracing::warn!(cell = %self.cell, service = %service, err = %error, "queued handler failed");
                    true
                }
                Err(RunnerFault::Storage { service, error }) => {
                    tracing::warn!(cell = %self.cell, service = %service, err = %error, "queue storage failed");
                    false
                }
            };
            worked |= self.scheduled.run_turn(token, internal).await;
            if worked {
                tokio::task::yield_now().await;
                continue;
            }

            let wait = self
                .scheduled
                .next_due()
                .map_or(self.idle_timeout, |due| {
                    due.saturating_duration_since(Instant::now())
                        .min(self.idle_timeout)
                });
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = time::sleep(wait) => {},
                Some(joined) = tasks.join_next() => self.background_exit(joined)?,
            }
        }
    }

    fn background_exit(
        &self,
        joined: Result<BackgroundExit, tokio::task::JoinError>,
    ) -> Result<(), CellError> {
        match joined {
            Ok((service, Ok(()))) => {
                tracing::debug!(cell = %self.cell, service = %service, "background service returned");
                Ok(())
            }
            Ok((service, Err(error))) => Err(CellError::Background { service, error }),
            Err(join) => Err(CellError::Background {
                service: "<background>".to_string(),
                error: ServiceError::fail(join_message(join)),
            }),
        }
    }

    async fn drain(
        &mut self,
        internal: &CancellationToken,
        tasks: &mut JoinSet<BackgroundExit>,
    ) -> Result<(), CellError> {
        let mut first_err = None;
        for svc in &self.background {
            if let Err(error) = svc.stop().await {
                first_err.get_or_insert(CellError::Background {
                    service: svc.name().to_string(),
                    error,
                });
            }
            self.publish(EventKind::ServiceStopped, svc.name());
        }
        internal.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = self.background_exit(joined) {
                tracing::debug!(cell = %self.cell, err = %e, "background service exited during drain");
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn publish(&self, kind: EventKind, service: &str) {
        self.bus.publish(
            Event::new(kind)
                .with_cell(self.cell.clone())
                .with_service(service),
        );
    }
}

fn join_message(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", crate::core::panic_message(err.into_panic().as_ref()))
    } else {
        "cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MemoryQueueStore, QueueStore};
    use crate::services::{QueuedFn, QueuedSettings, ScheduledFn, ScheduledSettings};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(services: Vec<ServiceInstance>, store: Arc<MemoryQueueStore>, bus: &Bus) -> CellScheduler {
        let policy = Arc::new(MessagePolicy::new(store, bus.clone()));
        CellScheduler::new("cell", services, policy, Duration::from_secs(10), bus.clone())
    }

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail_run: bool,
    }

    #[async_trait]
    impl BackgroundService for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn setup(&self) -> Result<(), ServiceError> {
            self.log.lock().unwrap().push("setup".into());
            Ok(())
        }
        async fn start(&self) -> Result<(), ServiceError> {
            self.log.lock().unwrap().push("start".into());
            Ok(())
        }
        async fn run(&self, ctx: CancellationToken) -> Result<(), ServiceError> {
            if self.fail_run {
                return Err(ServiceError::fail("lost connection"));
            }
            ctx.cancelled().await;
            self.log.lock().unwrap().push("cancelled".into());
            Ok(())
        }
        async fn stop(&self) -> Result<(), ServiceError> {
            self.log.lock().unwrap().push("stop".into());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn processes_messages_and_scheduled_jobs_until_cancelled() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let processed = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let (p, t) = (processed.clone(), ticks.clone());
        let services = vec![
            ServiceInstance::Queued {
                service: QueuedFn::arc("q", move |_m: Vec<u8>, _c: CancellationToken| {
                    p.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), ServiceError>(()) }
                }),
                settings: QueuedSettings::new("q"),
            },
            ServiceInstance::Scheduled {
                service: ScheduledFn::arc("tick", move |_at: Instant, _c: CancellationToken| {
                    t.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), ServiceError>(()) }
                }),
                settings: ScheduledSettings::every(Duration::from_secs(10)),
            },
        ];
        for _ in 0..5 {
            store.put("q", b"m".to_vec()).await.unwrap();
        }

        let cell = scheduler(services, store.clone(), &bus);
        let mut state = cell.state();
        let token = CancellationToken::new();
        let run = tokio::spawn(cell.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(35)).await;
        store.put("q", b"late".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        token.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 6);
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
        assert_eq!(*state.borrow_and_update(), CellState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_background_services_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = Bus::new(64);
        let services = vec![ServiceInstance::Background {
            service: Arc::new(Recorder {
                log: log.clone(),
                fail_run: false,
            }),
        }];
        let cell = scheduler(services, Arc::new(MemoryQueueStore::new()), &bus);
        let token = CancellationToken::new();
        let run = tokio::spawn(cell.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["setup", "start", "stop", "cancelled"]);
    }

    #[tokio::test(start_paused = true)]
    async fn outer_cancel_lets_in_flight_handler_finish() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let seen_cancel = Arc::new(Mutex::new(None));
        let seen = seen_cancel.clone();
        let services = vec![ServiceInstance::Queued {
            service: QueuedFn::arc("slow", move |_m: Vec<u8>, ctx: CancellationToken| {
                let seen = seen.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    *seen.lock().unwrap() = Some(ctx.is_cancelled());
                    Ok::<(), ServiceError>(())
                }
            }),
            settings: QueuedSettings::new("slow"),
        }];
        store.put("slow", b"m".to_vec()).await.unwrap();
        let token = CancellationToken::new();
        let run = tokio::spawn(scheduler(services, store.clone(), &bus).run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(*seen_cancel.lock().unwrap(), Some(false));
        assert_eq!(store.len("slow").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_background_service_ends_the_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = Bus::new(64);
        let services = vec![ServiceInstance::Background {
            service: Arc::new(Recorder {
                log: log.clone(),
                fail_run: true,
            }),
        }];
        let cell = scheduler(services, Arc::new(MemoryQueueStore::new()), &bus);

        let err = cell.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CellError::Background { .. }));
        assert!(log.lock().unwrap().contains(&"stop".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_handler_error_tears_the_cell_down() {
        let store = Arc::new(MemoryQueueStore::new());
        let bus = Bus::new(64);
        let services = vec![ServiceInstance::Queued {
            service: QueuedFn::arc("doom", |_m: Vec<u8>, _c: CancellationToken| async {
                Err::<(), _>(ServiceError::fatal("corrupted state"))
            }),
            settings: QueuedSettings::new("doom"),
        }];
        store.put("doom", b"x".to_vec()).await.unwrap();

        let err = scheduler(services, store, &bus)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CellError::Fatal { .. }));
    }
}
