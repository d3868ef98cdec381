//! # Restart signals raised from inside a cell.
//!
//! A running cell ends in one of two ways: a clean stop, or a request to be
//! rebuilt ([`CellOutcome::Restart`]). The request travels through a
//! [`RestartTrigger`] shared by everything inside the cell: the first signal
//! wins and cancels the cell's scope, later ones are ignored.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Deployment selection for the next boot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeploymentCommand {
    /// Boot a specific, already published deployment.
    LoadDeployment(String),
    /// Boot whatever the head points to.
    LoadCurrentHeadDeployment,
}

/// Why a cell asks to be rebuilt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartSignal {
    /// The head ships different code.
    AssembliesChanged,
    /// Same code, different config or settings.
    ConfigurationChanged,
    /// The cell failed; the next boot is delayed by the flood guard.
    FatalError(String),
    /// An operator or service asked for a specific deployment.
    ExplicitCommand(DeploymentCommand),
}

impl RestartSignal {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RestartSignal::AssembliesChanged => "assemblies_changed",
            RestartSignal::ConfigurationChanged => "configuration_changed",
            RestartSignal::FatalError(_) => "fatal_error",
            RestartSignal::ExplicitCommand(_) => "explicit_command",
        }
    }
}

/// Result of one cell run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellOutcome {
    /// The cell stopped because it was asked to.
    Stopped,
    /// The cell wants a fresh boundary.
    Restart(RestartSignal),
}

/// First-signal-wins restart slot bound to a cancellation scope.
#[derive(Clone, Debug)]
pub struct RestartTrigger {
    slot: Arc<Mutex<Option<RestartSignal>>>,
    token: CancellationToken,
}

impl RestartTrigger {
    /// Creates a trigger that cancels `token` when fired.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            token,
        }
    }

    /// Records `signal` and cancels the scope. Returns false if a signal was already recorded.
    pub fn fire(&self, signal: RestartSignal) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(signal);
        drop(slot);
        self.token.cancel();
        true
    }

    /// Takes the recorded signal, if any.
    pub fn take(&self) -> Option<RestartSignal> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Scope cancelled by [`RestartTrigger::fire`].
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_wins() {
        let parent = CancellationToken::new();
        let trigger = RestartTrigger::new(parent.child_token());

        assert!(trigger.fire(RestartSignal::ConfigurationChanged));
        assert!(!trigger.fire(RestartSignal::FatalError("late".into())));
        assert!(trigger.token().is_cancelled());
        assert!(!parent.is_cancelled());

        assert_eq!(trigger.take(), Some(RestartSignal::ConfigurationChanged));
        assert_eq!(trigger.take(), None);
    }
}
