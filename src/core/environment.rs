//! # What a cell sees of its host.
//!
//! [`CellEnvironment`] is handed to the cell entry point and to service
//! factories. It carries the cell's identity, the event bus, the settings the
//! cell booted with, settings pushed by the host afterwards, and the
//! [`RestartTrigger`] used to ask for a rebuild.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::signal::{DeploymentCommand, RestartSignal, RestartTrigger};
use crate::deployment::CellSettings;
use crate::events::Bus;

/// Identity of one cell boot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellIdentity {
    /// Machine name.
    pub host_name: String,
    /// Cell name, stable across boots.
    pub cell_name: String,
    /// Unique per boot.
    pub instance_id: Uuid,
}

impl CellIdentity {
    /// Identity for a fresh boot of `cell_name` on this machine.
    pub fn new(cell_name: impl Into<String>) -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            host_name,
            cell_name: cell_name.into(),
            instance_id: Uuid::new_v4(),
        }
    }
}

/// Host services available inside a cell.
#[derive(Clone, Debug)]
pub struct CellEnvironment {
    identity: Arc<CellIdentity>,
    bus: Bus,
    settings: Arc<CellSettings>,
    updates: watch::Receiver<CellSettings>,
    restart: RestartTrigger,
}

impl CellEnvironment {
    /// Assembles an environment; `restart` must be scoped to this boot.
    pub fn new(
        identity: CellIdentity,
        bus: Bus,
        settings: CellSettings,
        updates: watch::Receiver<CellSettings>,
        restart: RestartTrigger,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            bus,
            settings: Arc::new(settings),
            updates,
            restart,
        }
    }

    /// Standalone environment with its own bus and restart scope.
    pub fn detached(cell_name: &str) -> Self {
        let (_tx, updates) = watch::channel(CellSettings::new());
        Self::new(
            CellIdentity::new(cell_name),
            Bus::default(),
            CellSettings::new(),
            updates,
            RestartTrigger::new(CancellationToken::new()),
        )
    }

    /// Identity of this boot.
    pub fn identity(&self) -> &CellIdentity {
        &self.identity
    }

    /// Cell name.
    pub fn cell_name(&self) -> &str {
        &self.identity.cell_name
    }

    /// Runtime event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Settings the cell booted with (deployment settings plus host overrides).
    pub fn settings(&self) -> &CellSettings {
        &self.settings
    }

    /// Host overrides pushed after boot through
    /// [`SupervisorHandle::apply_changed_settings`](crate::SupervisorHandle::apply_changed_settings).
    pub fn settings_updates(&self) -> watch::Receiver<CellSettings> {
        self.updates.clone()
    }

    /// Asks the supervisor to rebuild this cell. Returns false if a restart is already pending.
    pub fn request_restart(&self, signal: RestartSignal) -> bool {
        self.restart.fire(signal)
    }

    /// Asks the supervisor to boot the deployment selected by `command`.
    pub fn send_command(&self, command: DeploymentCommand) -> bool {
        self.request_restart(RestartSignal::ExplicitCommand(command))
    }

    /// Scope cancelled on shutdown or when a restart is requested.
    pub fn restart_token(&self) -> CancellationToken {
        self.restart.token().clone()
    }

    /// Takes the pending restart signal, if any.
    pub fn take_restart(&self) -> Option<RestartSignal> {
        self.restart.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_become_restart_signals() {
        let env = CellEnvironment::detached("worker");
        assert_eq!(env.cell_name(), "worker");
        assert!(!env.identity().host_name.is_empty());

        assert!(env.send_command(DeploymentCommand::LoadDeployment("deployment/x".into())));
        assert!(env.restart_token().is_cancelled());
        assert_eq!(
            env.take_restart(),
            Some(RestartSignal::ExplicitCommand(DeploymentCommand::LoadDeployment(
                "deployment/x".into()
            )))
        );
    }

    #[test]
    fn every_boot_has_a_new_instance_id() {
        assert_ne!(CellIdentity::new("a").instance_id, CellIdentity::new("a").instance_id);
    }
}
