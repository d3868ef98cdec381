//! # CellSupervisor: boots, watches and rebuilds one cell.
//!
//! Each boot runs the [`CellEntry`] inside a fresh [`Boundary`]. When the boot
//! ends, the boundary is torn down and the outcome decides what happens next.
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► resolve deployment (head, or the one named by the last command)
//!   ├─► publish CellStarting
//!   ├─► Boundary::boot(entry.run(settings, reader, env, token))
//!   ├─► wait: boundary exit | stop requested
//!   │         stop ──► cancel token ──► wait stop_grace ──► discard (BoundaryDiscarded)
//!   ├─► boundary.discard()
//!   └─► outcome:
//!         Stopped (stop requested)            → break
//!         AssembliesChanged / ConfigChanged   → reboot now on the head
//!         ExplicitCommand(cmd)                → reboot now on cmd
//!         FatalError / panic / resolve error  → CellFailed → flood guard delay → reboot
//! }
//! ```
//!
//! ## Rules
//! - Boots run sequentially; a new boundary starts only after the previous one is gone.
//! - Faults are counted in a sliding window; past the threshold, reboot delays escalate.
//! - The delay sleep is cancellable: a stop during the delay ends the loop at once.
//! - `request_stop` is idempotent.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::boundary::{Boundary, BoundaryExit};
use super::config::HostConfig;
use super::entry::CellEntry;
use super::environment::{CellEnvironment, CellIdentity};
use super::signal::{CellOutcome, DeploymentCommand, RestartSignal, RestartTrigger};
use crate::deployment::{BlobStore, CellSettings, DeploymentReader};
use crate::events::{Bus, Event, EventKind};
use crate::policies::FloodGuard;

/// Control surface of a running [`CellSupervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    name: Arc<str>,
    stop: CancellationToken,
    overrides: watch::Sender<CellSettings>,
    bus: Bus,
}

impl SupervisorHandle {
    /// Cell name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the cell to stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Pushes host setting overrides to the running cell; later boots use them too.
    pub fn apply_changed_settings(&self, settings: CellSettings) {
        self.overrides.send_replace(settings);
        self.bus
            .publish(Event::new(EventKind::SettingsApplied).with_cell(self.name.clone()));
    }
}

enum BootExit {
    Stopped,
    Restart(RestartSignal),
    Fault(String),
}

/// Supervises the boots of one cell.
pub struct CellSupervisor {
    name: Arc<str>,
    cfg: HostConfig,
    entry: Arc<dyn CellEntry>,
    deployments: Arc<dyn BlobStore>,
    bus: Bus,
    stop: CancellationToken,
    overrides: watch::Sender<CellSettings>,
}

impl CellSupervisor {
    /// Creates a supervisor for cell `name`.
    pub fn new(
        name: impl Into<Arc<str>>,
        cfg: HostConfig,
        entry: Arc<dyn CellEntry>,
        deployments: Arc<dyn BlobStore>,
        bus: Bus,
    ) -> Self {
        let (overrides, _) = watch::channel(CellSettings::new());
        Self {
            name: name.into(),
            cfg,
            entry,
            deployments,
            bus,
            stop: CancellationToken::new(),
            overrides,
        }
    }

    /// Cell name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to stop the cell or push settings while it runs.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            name: self.name.clone(),
            stop: self.stop.clone(),
            overrides: self.overrides.clone(),
            bus: self.bus.clone(),
        }
    }

    /// Boots the cell repeatedly until `shutdown` is cancelled or a stop is requested.
    pub async fn run(self, shutdown: CancellationToken) {
        let link = {
            let stop = self.stop.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                stop.cancel();
            })
        };

        let mut flood = FloodGuard::new(self.cfg.flood);
        let mut command = DeploymentCommand::LoadCurrentHeadDeployment;
        let mut boot: u32 = 0;

        while !self.stop.is_cancelled() {
            boot += 1;
            let fault = match self.boot_once(&command, boot).await {
                BootExit::Stopped if self.stop.is_cancelled() => break,
                BootExit::Stopped => Some("cell returned without being asked to stop".to_string()),
                BootExit::Restart(signal) => {
                    self.publish_restart_requested(&signal);
                    match signal {
                        RestartSignal::AssembliesChanged | RestartSignal::ConfigurationChanged => {
                            command = DeploymentCommand::LoadCurrentHeadDeployment;
                            None
                        }
                        RestartSignal::ExplicitCommand(next) => {
                            command = next;
                            None
                        }
                        RestartSignal::FatalError(reason) => Some(reason),
                    }
                }
                BootExit::Fault(reason) => {
                    // a pinned deployment that cannot be resolved falls back to the head
                    command = DeploymentCommand::LoadCurrentHeadDeployment;
                    Some(reason)
                }
            };

            let Some(reason) = fault else { continue };
            self.bus.publish(
                Event::new(EventKind::CellFailed)
                    .with_cell(self.name.clone())
                    .with_attempt(boot)
                    .with_reason(reason),
            );
            let next = flood.record_fault(Instant::now());
            self.bus.publish(
                Event::new(EventKind::RestartScheduled)
                    .with_cell(self.name.clone())
                    .with_delay(next.delay)
                    .with_attempt(boot + 1)
                    .with_reason(if next.flooding { "flooding" } else { "isolated fault" }),
            );
            tokio::select! {
                _ = time::sleep(next.delay) => {}
                _ = self.stop.cancelled() => break,
            }
        }

        link.abort();
        self.bus
            .publish(Event::new(EventKind::CellStopped).with_cell(self.name.clone()));
    }

    async fn boot_once(&self, command: &DeploymentCommand, boot: u32) -> BootExit {
        let reader = match DeploymentReader::resolve(self.deployments.clone(), command).await {
            Ok(r) => r,
            Err(e) => return BootExit::Fault(format!("cannot resolve deployment: {e}")),
        };
        let mut settings = match reader.settings().await {
            Ok(s) => s,
            Err(e) => return BootExit::Fault(format!("cannot read settings: {e}")),
        };
        settings.extend(self.overrides.borrow().clone());

        let token = self.stop.child_token();
        let env = CellEnvironment::new(
            CellIdentity::new(&*self.name),
            self.bus.clone(),
            settings.clone(),
            self.overrides.subscribe(),
            RestartTrigger::new(token.child_token()),
        );
        self.bus.publish(
            Event::new(EventKind::CellStarting)
                .with_cell(self.name.clone())
                .with_deployment(reader.deployment().name.as_str())
                .with_attempt(boot),
        );

        let entry = self.entry.clone();
        let cell_token = token.clone();
        let mut boundary = match Boundary::boot(&self.name, self.cfg.isolation, async move {
            entry.run(settings, reader, env, cell_token).await
        }) {
            Ok(b) => b,
            Err(e) => return BootExit::Fault(e.to_string()),
        };

        let finished = tokio::select! {
            exit = boundary.join() => Some(exit),
            _ = self.stop.cancelled() => None,
        };
        let exit = match finished {
            Some(exit) => exit,
            None => {
                token.cancel();
                match time::timeout(self.cfg.stop_grace, boundary.join()).await {
                    Ok(exit) => exit,
                    Err(_) => {
                        self.bus.publish(
                            Event::new(EventKind::BoundaryDiscarded)
                                .with_cell(self.name.clone())
                                .with_timeout(self.cfg.stop_grace),
                        );
                        BoundaryExit::Discarded
                    }
                }
            }
        };
        boundary.discard();

        match exit {
            BoundaryExit::Completed(CellOutcome::Stopped) | BoundaryExit::Discarded => BootExit::Stopped,
            BoundaryExit::Completed(CellOutcome::Restart(signal)) => BootExit::Restart(signal),
            BoundaryExit::Panicked(msg) => BootExit::Fault(format!("cell panicked: {msg}")),
        }
    }

    fn publish_restart_requested(&self, signal: &RestartSignal) {
        let mut ev = Event::new(EventKind::RestartRequested)
            .with_cell(self.name.clone())
            .with_reason(signal.as_label());
        if let RestartSignal::ExplicitCommand(DeploymentCommand::LoadDeployment(name)) = signal {
            ev = ev.with_deployment(name.as_str());
        }
        self.bus.publish(ev);
    }
}
