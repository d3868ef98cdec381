use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{alive::AliveTracker, config::HostConfig, host::CellHost};
use crate::{
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`CellHost`].
pub struct HostBuilder {
    cfg: HostConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl HostBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: HostConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive every event of every cell through dedicated workers
    /// with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the host. Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<CellHost> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let alive = Arc::new(AliveTracker::new());
        Arc::new(CellHost::new_internal(
            self.cfg,
            bus,
            subs,
            alive,
            CancellationToken::new(),
        ))
    }
}
