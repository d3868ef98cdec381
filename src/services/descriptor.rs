//! # Service descriptors: the cell configuration artifact.
//!
//! A deployment's configuration artifact is a JSON [`CellConfig`] listing the
//! services a cell hosts. Each [`ServiceDescriptor`] names a registered factory
//! (`type`) and carries kind-specific settings.
//!
//! ```json
//! {
//!   "services": [
//!     { "name": "orders", "type": "orders-handler", "kind": "queued",
//!       "queue": "orders", "max_trials": 2, "execution_timeout_secs": 60 },
//!     { "name": "report", "type": "daily-report", "kind": "scheduled", "interval_secs": 3600 },
//!     { "name": "cache", "type": "cache-warmer", "kind": "background" }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Upper bound for any visibility timeout.
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Execution timeout used when a queued service does not set one.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(90 * 60);

/// Longest execution timeout a descriptor may declare.
pub const MAX_EXECUTION_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Longest interval a scheduled service may declare.
pub const MAX_SCHEDULE_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Services hosted by one cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Service descriptors, in declaration order.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl CellConfig {
    /// Validates every descriptor.
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut seen = std::collections::HashSet::new();
        for d in &self.services {
            d.validate()?;
            if !seen.insert(d.name.as_str()) {
                return Err(LoadError::InvalidDescriptor {
                    service: d.name.clone(),
                    reason: "duplicate service name".into(),
                });
            }
        }
        Ok(())
    }
}

fn enabled() -> bool {
    true
}

/// One service entry of a [`CellConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name (unique within the cell).
    pub name: String,
    /// Registered factory key.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Disabled services are skipped at load.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Kind-specific settings.
    #[serde(flatten)]
    pub kind: ServiceKind,
}

impl ServiceDescriptor {
    /// Checks the descriptor for values the runners cannot work with.
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |reason: &str| LoadError::InvalidDescriptor {
            service: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty service name"));
        }
        let too_long = |secs: Option<u64>| secs.is_some_and(|s| s > MAX_EXECUTION_TIMEOUT.as_secs());
        match &self.kind {
            ServiceKind::Queued(s) if s.queue.trim().is_empty() => Err(invalid("empty queue name")),
            ServiceKind::Queued(s) if s.max_trials == 0 => Err(invalid("max_trials must be at least 1")),
            ServiceKind::Queued(s) if too_long(s.execution_timeout_secs) => {
                Err(invalid("execution timeout exceeds 7 days"))
            }
            ServiceKind::Scheduled(s) if s.interval_secs == 0 => Err(invalid("interval must be positive")),
            ServiceKind::Scheduled(s) if s.interval_secs > MAX_SCHEDULE_INTERVAL.as_secs() => {
                Err(invalid("interval exceeds 366 days"))
            }
            ServiceKind::Scheduled(s) if too_long(s.execution_timeout_secs) => {
                Err(invalid("execution timeout exceeds 7 days"))
            }
            _ => Ok(()),
        }
    }
}

/// Kind tag plus settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Queue-driven service.
    Queued(QueuedSettings),
    /// Interval-driven service.
    Scheduled(ScheduledSettings),
    /// Long-running service.
    Background,
}

fn default_max_trials() -> u32 {
    5
}

fn default_continue_window_secs() -> u64 {
    30
}

/// Settings of a queued service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSettings {
    /// Queue to consume.
    pub queue: String,
    /// Processing attempts before a message is quarantined.
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,
    /// Explicit visibility timeout; derived from the execution timeout when absent.
    #[serde(default)]
    pub visibility_timeout_secs: Option<u64>,
    /// Per-message execution timeout.
    #[serde(default)]
    pub execution_timeout_secs: Option<u64>,
    /// How long one rotation turn keeps draining the same queue.
    #[serde(default = "default_continue_window_secs")]
    pub continue_window_secs: u64,
}

impl QueuedSettings {
    /// Settings for `queue` with every other field at its default.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            max_trials: default_max_trials(),
            visibility_timeout_secs: None,
            execution_timeout_secs: None,
            continue_window_secs: default_continue_window_secs(),
        }
    }

    /// Per-message execution timeout.
    ///
    /// Default: [`DEFAULT_EXECUTION_TIMEOUT`].
    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout_secs
            .map_or(DEFAULT_EXECUTION_TIMEOUT, Duration::from_secs)
    }

    /// Visibility timeout: explicit, or 1.25 × execution timeout; capped at 2h.
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.execution_timeout().saturating_mul(5) / 4)
            .min(MAX_VISIBILITY_TIMEOUT)
    }

    /// Rotation continue window.
    pub fn continue_window(&self) -> Duration {
        Duration::from_secs(self.continue_window_secs)
    }
}

/// Settings of a scheduled service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSettings {
    /// Fixed interval between invocations.
    pub interval_secs: u64,
    /// Per-invocation execution timeout; none when absent.
    #[serde(default)]
    pub execution_timeout_secs: Option<u64>,
}

impl ScheduledSettings {
    /// Settings firing every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs().max(1),
            execution_timeout_secs: None,
        }
    }

    /// Fixed interval, capped at [`MAX_SCHEDULE_INTERVAL`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs).min(MAX_SCHEDULE_INTERVAL)
    }

    /// Execution timeout, if any.
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_service_kinds() {
        let json = r#"{
            "services": [
                { "name": "orders", "type": "orders-handler", "kind": "queued", "queue": "orders", "max_trials": 2 },
                { "name": "report", "type": "daily-report", "kind": "scheduled", "interval_secs": 3600 },
                { "name": "cache", "type": "cache-warmer", "kind": "background", "enabled": false }
            ]
        }"#;
        let cfg: CellConfig = serde_json::from_str(json).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.services.len(), 3);
        match &cfg.services[0].kind {
            ServiceKind::Queued(s) => {
                assert_eq!(s.queue, "orders");
                assert_eq!(s.max_trials, 2);
                assert_eq!(s.continue_window(), Duration::from_secs(30));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(cfg.services[1].kind, ServiceKind::Scheduled(ScheduledSettings::every(Duration::from_secs(3600))));
        assert!(!cfg.services[2].enabled);
    }

    #[test]
    fn visibility_is_derived_and_capped() {
        let mut s = QueuedSettings::new("q");
        s.execution_timeout_secs = Some(60);
        assert_eq!(s.visibility_timeout(), Duration::from_secs(75));

        s.execution_timeout_secs = Some(3 * 60 * 60);
        assert_eq!(s.visibility_timeout(), MAX_VISIBILITY_TIMEOUT);

        s.execution_timeout_secs = Some(u64::MAX);
        assert_eq!(s.visibility_timeout(), MAX_VISIBILITY_TIMEOUT);

        s.visibility_timeout_secs = Some(10);
        assert_eq!(s.visibility_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_oversized_interval_and_timeouts() {
        let scheduled = |interval_secs: u64, execution_timeout_secs: Option<u64>| ServiceDescriptor {
            name: "tick".into(),
            type_id: "t".into(),
            enabled: true,
            kind: ServiceKind::Scheduled(ScheduledSettings {
                interval_secs,
                execution_timeout_secs,
            }),
        };
        assert!(scheduled(u64::MAX, None).validate().is_err());
        assert!(scheduled(MAX_SCHEDULE_INTERVAL.as_secs() + 1, None).validate().is_err());
        assert!(scheduled(MAX_SCHEDULE_INTERVAL.as_secs(), None).validate().is_ok());
        assert!(scheduled(60, Some(u64::MAX)).validate().is_err());

        let mut settings = QueuedSettings::new("orders");
        settings.execution_timeout_secs = Some(u64::MAX);
        let queued = ServiceDescriptor {
            name: "orders".into(),
            type_id: "t".into(),
            enabled: true,
            kind: ServiceKind::Queued(settings),
        };
        assert!(matches!(queued.validate(), Err(LoadError::InvalidDescriptor { .. })));

        let raw = ScheduledSettings {
            interval_secs: u64::MAX,
            execution_timeout_secs: None,
        };
        assert_eq!(raw.interval(), MAX_SCHEDULE_INTERVAL);
    }

    #[test]
    fn rejects_zero_interval_and_duplicates() {
        let zero = ServiceDescriptor {
            name: "tick".into(),
            type_id: "t".into(),
            enabled: true,
            kind: ServiceKind::Scheduled(ScheduledSettings {
                interval_secs: 0,
                execution_timeout_secs: None,
            }),
        };
        assert!(matches!(zero.validate(), Err(LoadError::InvalidDescriptor { .. })));

        let bg = ServiceDescriptor {
            name: "dup".into(),
            type_id: "t".into(),
            enabled: true,
            kind: ServiceKind::Background,
        };
        let cfg = CellConfig {
            services: vec![bg.clone(), bg],
        };
        assert!(cfg.validate().is_err());
    }
}
