//! # Service factories keyed by type id.
//!
//! Deployments reference services by a string `type`; the host binary registers
//! one factory per type. At load the registry turns a [`CellConfig`] into
//! [`ServiceInstance`]s, checking that each descriptor's kind matches the kind
//! its factory produces.

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{CellConfig, ServiceDescriptor, ServiceKind};
use super::service::{BackgroundService, QueuedService, ScheduledService, ServiceInstance};
use crate::core::CellEnvironment;
use crate::error::{LoadError, ServiceError};

type Factory<T> = Arc<dyn Fn(&ServiceDescriptor, &CellEnvironment) -> Result<Arc<T>, ServiceError> + Send + Sync>;

#[derive(Clone)]
enum ServiceFactory {
    Queued(Factory<dyn QueuedService>),
    Scheduled(Factory<dyn ScheduledService>),
    Background(Factory<dyn BackgroundService>),
}

impl ServiceFactory {
    fn kind(&self) -> &'static str {
        match self {
            ServiceFactory::Queued(_) => "queued",
            ServiceFactory::Scheduled(_) => "scheduled",
            ServiceFactory::Background(_) => "background",
        }
    }
}

/// Registered service factories.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for queued services of `type_id`.
    pub fn register_queued<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ServiceDescriptor, &CellEnvironment) -> Result<Arc<dyn QueuedService>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(type_id.into(), ServiceFactory::Queued(Arc::new(factory)));
        self
    }

    /// Registers a factory for scheduled services of `type_id`.
    pub fn register_scheduled<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ServiceDescriptor, &CellEnvironment) -> Result<Arc<dyn ScheduledService>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(type_id.into(), ServiceFactory::Scheduled(Arc::new(factory)));
        self
    }

    /// Registers a factory for background services of `type_id`.
    pub fn register_background<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ServiceDescriptor, &CellEnvironment) -> Result<Arc<dyn BackgroundService>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(type_id.into(), ServiceFactory::Background(Arc::new(factory)));
        self
    }

    /// Returns true if a factory is registered for `type_id`.
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Builds every enabled service of `config`.
    pub fn instantiate(
        &self,
        config: &CellConfig,
        env: &CellEnvironment,
    ) -> Result<Vec<ServiceInstance>, LoadError> {
        config.validate()?;
        config
            .services
            .iter()
            .filter(|d| d.enabled)
            .map(|d| self.build(d, env))
            .collect()
    }

    fn build(&self, d: &ServiceDescriptor, env: &CellEnvironment) -> Result<ServiceInstance, LoadError> {
        let factory = self
            .factories
            .get(&d.type_id)
            .ok_or_else(|| LoadError::UnknownServiceType {
                service: d.name.clone(),
                type_id: d.type_id.clone(),
            })?;
        let failed = |e: ServiceError| LoadError::Factory {
            service: d.name.clone(),
            error: e.to_string(),
        };
        match (factory, &d.kind) {
            (ServiceFactory::Queued(f), ServiceKind::Queued(settings)) => Ok(ServiceInstance::Queued {
                service: f(d, env).map_err(failed)?,
                settings: settings.clone(),
            }),
            (ServiceFactory::Scheduled(f), ServiceKind::Scheduled(settings)) => {
                Ok(ServiceInstance::Scheduled {
                    service: f(d, env).map_err(failed)?,
                    settings: settings.clone(),
                })
            }
            (ServiceFactory::Background(f), ServiceKind::Background) => Ok(ServiceInstance::Background {
                service: f(d, env).map_err(failed)?,
            }),
            (f, _) => Err(LoadError::InvalidDescriptor {
                service: d.name.clone(),
                reason: format!("type `{}` produces {} services", d.type_id, f.kind()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::descriptor::{QueuedSettings, ScheduledSettings};
    use crate::services::service_fn::{QueuedFn, ScheduledFn};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn registry() -> ServiceRegistry {
        let mut r = ServiceRegistry::new();
        r.register_queued("echo", |d, _env| {
            Ok(QueuedFn::arc(d.name.clone(), |_p: Vec<u8>, _c: CancellationToken| async {
                Ok::<_, ServiceError>(())
            }) as Arc<dyn QueuedService>)
        })
        .register_scheduled("tick", |d, _env| {
            Ok(ScheduledFn::arc(d.name.clone(), |_at: Instant, _c: CancellationToken| async {
                Ok::<_, ServiceError>(())
            }) as Arc<dyn ScheduledService>)
        });
        r
    }

    fn descriptor(name: &str, type_id: &str, kind: ServiceKind) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.into(),
            type_id: type_id.into(),
            enabled: true,
            kind,
        }
    }

    #[test]
    fn builds_enabled_services_in_order() {
        let env = CellEnvironment::detached("cell");
        let mut disabled = descriptor("off", "echo", ServiceKind::Queued(QueuedSettings::new("x")));
        disabled.enabled = false;
        let cfg = CellConfig {
            services: vec![
                descriptor("orders", "echo", ServiceKind::Queued(QueuedSettings::new("orders"))),
                disabled,
                descriptor(
                    "tick",
                    "tick",
                    ServiceKind::Scheduled(ScheduledSettings::every(Duration::from_secs(5))),
                ),
            ],
        };
        let built = registry().instantiate(&cfg, &env).unwrap();
        let names: Vec<_> = built.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["orders", "tick"]);
    }

    #[test]
    fn rejects_unknown_type_and_kind_mismatch() {
        let env = CellEnvironment::detached("cell");
        let unknown = CellConfig {
            services: vec![descriptor("x", "missing", ServiceKind::Background)],
        };
        assert!(matches!(
            registry().instantiate(&unknown, &env),
            Err(LoadError::UnknownServiceType { .. })
        ));

        let mismatch = CellConfig {
            services: vec![descriptor("x", "echo", ServiceKind::Background)],
        };
        assert!(matches!(
            registry().instantiate(&mismatch, &env),
            Err(LoadError::InvalidDescriptor { .. })
        ));
    }
}
