//! # Cell entry point: what runs inside a boundary.
//!
//! The supervisor hands every boot to a [`CellEntry`]. The default entry,
//! [`ServiceCellEntry`], materializes the deployment and runs it:
//!
//! ```text
//! ServiceCellEntry::run(settings, reader, env, token)
//!   ├─ assemblies manifest ──► every service type registered?
//!   ├─ config ──► ServiceRegistry::instantiate ──► CellScheduler
//!   ├─ spawn HeadPoller (raises AssembliesChanged / ConfigurationChanged)
//!   ├─ CellScheduler::run(env.restart_token())
//!   └─ outcome:
//!        restart signal pending ──► Restart(signal)
//!        scheduler error        ──► Restart(FatalError)
//!        otherwise              ──► Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::config::HostConfig;
use super::environment::CellEnvironment;
use super::signal::{CellOutcome, RestartSignal};
use crate::deployment::{CellSettings, DeploymentReader};
use crate::error::LoadError;
use crate::messages::{DelayedStore, FencingLease, MessagePolicy, QueueStore};
use crate::runners::CellScheduler;
use crate::services::ServiceRegistry;

/// Entry point invoked inside each boundary.
///
/// `token` is cancelled when the host stops the cell; `env.restart_token()` is a
/// child of it that is also cancelled when a restart is requested.
#[async_trait]
pub trait CellEntry: Send + Sync + 'static {
    /// Runs the cell until it stops or asks to be rebuilt.
    async fn run(
        &self,
        settings: CellSettings,
        reader: DeploymentReader,
        env: CellEnvironment,
        token: CancellationToken,
    ) -> CellOutcome;
}

#[derive(Clone)]
struct ResilientDequeue {
    fence: Arc<dyn FencingLease>,
    min_age: Duration,
    lease_ttl: Duration,
}

/// Entry that hosts the services described by the deployment's config.
pub struct ServiceCellEntry {
    registry: Arc<ServiceRegistry>,
    queues: Arc<dyn QueueStore>,
    delayed: Option<Arc<dyn DelayedStore>>,
    resilient: Option<ResilientDequeue>,
    idle_timeout: Duration,
    head_poll_interval: Duration,
}

impl ServiceCellEntry {
    /// Creates an entry building services from `registry` over `queues`.
    pub fn new(registry: ServiceRegistry, queues: Arc<dyn QueueStore>, cfg: &HostConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            queues,
            delayed: None,
            resilient: None,
            idle_timeout: cfg.idle_timeout,
            head_poll_interval: cfg.head_poll_interval_clamped(),
        }
    }

    /// Enables resume-later for queued handlers.
    pub fn with_delayed_store(mut self, delayed: Arc<dyn DelayedStore>) -> Self {
        self.delayed = Some(delayed);
        self
    }

    /// Switches queued services to the resilient dequeue mode.
    pub fn with_resilient_dequeue(
        mut self,
        fence: Arc<dyn FencingLease>,
        min_age: Duration,
        lease_ttl: Duration,
    ) -> Self {
        self.resilient = Some(ResilientDequeue {
            fence,
            min_age,
            lease_ttl,
        });
        self
    }

    async fn materialize(
        &self,
        reader: &DeploymentReader,
        env: &CellEnvironment,
    ) -> Result<CellScheduler, LoadError> {
        let manifest = reader.assemblies().await?;
        if let Some(missing) = manifest
            .service_types
            .iter()
            .find(|t| !self.registry.contains(t))
        {
            return Err(LoadError::UnknownServiceType {
                service: format!("assemblies {}", manifest.version),
                type_id: missing.clone(),
            });
        }
        let config = reader.config().await?;
        let services = self.registry.instantiate(&config, env)?;

        let mut policy = MessagePolicy::new(self.queues.clone(), env.bus().clone());
        if let Some(r) = &self.resilient {
            policy = policy.resilient(r.fence.clone(), r.min_age, r.lease_ttl);
        }
        if let Some(delayed) = &self.delayed {
            policy = policy.with_delayed_store(delayed.clone());
        }
        Ok(CellScheduler::new(
            env.cell_name(),
            services,
            Arc::new(policy),
            self.idle_timeout,
            env.bus().clone(),
        ))
    }
}

#[async_trait]
impl CellEntry for ServiceCellEntry {
    async fn run(
        &self,
        settings: CellSettings,
        reader: DeploymentReader,
        env: CellEnvironment,
        _token: CancellationToken,
    ) -> CellOutcome {
        let scheduler = match self.materialize(&reader, &env).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(cell = env.cell_name(), err = %e, "cannot materialize deployment");
                return CellOutcome::Restart(RestartSignal::FatalError(e.to_string()));
            }
        };
        tracing::info!(
            cell = env.cell_name(),
            deployment = %reader.deployment().name,
            instance = %env.identity().instance_id,
            settings = settings.len(),
            "cell materialized"
        );

        let scope = env.restart_token();
        let poller = tokio::spawn(
            reader
                .head_poller(self.head_poll_interval)
                .run(env.clone(), scope.clone()),
        );
        let res = scheduler.run(scope).await;
        poller.abort();

        if let Some(signal) = env.take_restart() {
            return CellOutcome::Restart(signal);
        }
        match res {
            Ok(()) => CellOutcome::Stopped,
            Err(e) => CellOutcome::Restart(RestartSignal::FatalError(e.to_string())),
        }
    }
}
