//! # CellHost: runs several cells, fans out events, shuts down gracefully.
//!
//! The [`CellHost`] owns the event bus, the [`SubscriberSet`] and the
//! [`AliveTracker`]. Every cell runs under its own [`CellSupervisor`].
//!
//! ## Architecture
//! ```text
//! Inputs to run():
//!   Vec<CellSupervisor> ──► CellHost::run()
//!
//! Preparation:
//!   - duplicate cell names rejected (RuntimeError::DuplicateCell)
//!   - listener: Bus.subscribe() ─► AliveTracker::update ─► SubscriberSet::emit
//!
//! Spawn:
//!   supervisor[0] ... supervisor[N-1] ──► set.spawn(sup.run(host token))
//!
//! Shutdown path:
//!   wait_for_shutdown(OS signal | request_stop)
//!       └─► publish ShutdownRequested
//!       └─► cancel host token (every supervisor stops its cell)
//!       └─► wait_all_with_grace(cfg.grace):
//!              ├─ all joined   → AllStoppedWithin
//!              └─ grace passed → GraceExceeded, remaining supervisors aborted
//!                                (stuck cells named from AliveTracker)
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::alive::AliveTracker;
use super::config::HostConfig;
use super::entry::CellEntry;
use super::shutdown;
use super::supervisor::CellSupervisor;
use crate::deployment::BlobStore;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

/// Coordinates cell supervisors, event delivery and graceful shutdown.
pub struct CellHost {
    cfg: HostConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    alive: Arc<AliveTracker>,
    token: CancellationToken,
    listening: AtomicBool,
}

impl CellHost {
    pub(crate) fn new_internal(
        cfg: HostConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        alive: Arc<AliveTracker>,
        token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            alive,
            token,
            listening: AtomicBool::new(false),
        }
    }

    /// Host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.cfg
    }

    /// Event bus shared by every cell of this host.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Creates a supervisor for cell `name` wired to this host's bus and config.
    pub fn supervisor(
        &self,
        name: &str,
        entry: Arc<dyn CellEntry>,
        deployments: Arc<dyn BlobStore>,
    ) -> CellSupervisor {
        CellSupervisor::new(name, self.cfg.clone(), entry, deployments, self.bus.clone())
    }

    /// Sorted names of the cells currently booted.
    pub async fn alive_cells(&self) -> Vec<String> {
        self.alive.snapshot().await
    }

    /// Asks every cell to stop; [`CellHost::run`] returns once they did. Idempotent.
    pub fn request_stop(&self) {
        self.token.cancel();
    }

    /// Runs `cells` until a termination signal, [`CellHost::request_stop`], or
    /// until every supervisor returns on its own.
    pub async fn run(&self, cells: Vec<CellSupervisor>) -> Result<(), RuntimeError> {
        let mut names = HashSet::with_capacity(cells.len());
        for cell in &cells {
            if !names.insert(cell.name().to_string()) {
                return Err(RuntimeError::DuplicateCell {
                    name: cell.name().to_string(),
                });
            }
        }
        self.subscriber_listener();

        let mut set = JoinSet::new();
        for cell in cells {
            set.spawn(cell.run(self.token.clone()));
        }
        self.drive_shutdown(&mut set).await
    }

    fn subscriber_listener(&self) {
        if self.listening.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rx = self.bus.subscribe();
        let subs = Arc::clone(&self.subs);
        let alive = Arc::clone(&self.alive);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        alive.update(&ev).await;
                        subs.emit(&ev);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "host listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn drive_shutdown(&self, set: &mut JoinSet<()>) -> Result<(), RuntimeError> {
        tokio::select! {
            cause = shutdown::wait_for_shutdown(&self.token) => {
                self.bus.publish(
                    Event::new(EventKind::ShutdownRequested).with_reason(cause.as_label()),
                );
                self.token.cancel();
                self.wait_all_with_grace(set).await
            }
            _ = async { while set.join_next().await.is_some() {} } => Ok(()),
        }
    }

    async fn wait_all_with_grace(&self, set: &mut JoinSet<()>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let done = async { while set.join_next().await.is_some() {} };
        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(Event::new(EventKind::GraceExceeded).with_timeout(grace));
                let stuck = self.alive.snapshot().await;
                // dropping a supervisor discards its boundary
                set.abort_all();
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}
