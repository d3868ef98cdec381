//! # Delayed message delivery.
//!
//! [`DelayedSweeper`] moves due records from a [`DelayedStore`] into their
//! target queues. It runs as a [`ScheduledService`] so a cell can host it next
//! to its own services.
//!
//! ## Rules
//! - Records are visited in trigger order; the scan stops at the first record
//!   that is not yet due.
//! - A record is enqueued first and deleted second: a crash in between delivers
//!   the message twice rather than losing it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::store::{DelayedStore, QueueStore};
use crate::core::CellEnvironment;
use crate::error::{ServiceError, StorageError};
use crate::events::{Bus, Event, EventKind};
use crate::services::{ScheduledService, ServiceRegistry};

/// Releases due delayed messages.
pub struct DelayedSweeper {
    name: String,
    delayed: Arc<dyn DelayedStore>,
    queues: Arc<dyn QueueStore>,
    bus: Bus,
}

impl DelayedSweeper {
    /// Factory key under which [`DelayedSweeper::register`] installs the sweeper.
    pub const TYPE_ID: &'static str = "delayed-messages";

    /// Creates a sweeper between `delayed` and `queues`.
    pub fn new(
        name: impl Into<String>,
        delayed: Arc<dyn DelayedStore>,
        queues: Arc<dyn QueueStore>,
        bus: Bus,
    ) -> Self {
        Self {
            name: name.into(),
            delayed,
            queues,
            bus,
        }
    }

    /// Registers the sweeper as a scheduled service type.
    pub fn register(
        registry: &mut ServiceRegistry,
        delayed: Arc<dyn DelayedStore>,
        queues: Arc<dyn QueueStore>,
    ) {
        registry.register_scheduled(Self::TYPE_ID, move |d, env: &CellEnvironment| {
            let sweeper = DelayedSweeper::new(
                d.name.clone(),
                delayed.clone(),
                queues.clone(),
                env.bus().clone(),
            );
            Ok(Arc::new(sweeper) as Arc<dyn ScheduledService>)
        });
    }

    /// Moves every record due at `now`; returns how many were released.
    pub async fn sweep(&self, now: Instant, ctx: &CancellationToken) -> Result<u32, StorageError> {
        let mut released = 0u32;
        let mut records = self.delayed.list_delayed();
        while let Some(record) = records.next().await {
            let record = record?;
            if record.key.trigger_at > now || ctx.is_cancelled() {
                break;
            }
            self.queues.put(&record.queue, record.payload).await?;
            self.delayed.delete_delayed(&record.key).await?;
            released += 1;
        }
        if released > 0 {
            self.bus
                .publish(Event::new(EventKind::DelayedReleased).with_attempt(released));
        }
        Ok(released)
    }
}

#[async_trait]
impl ScheduledService for DelayedSweeper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _scheduled_at: Instant, ctx: CancellationToken) -> Result<(), ServiceError> {
        self.sweep(Instant::now(), &ctx)
            .await
            .map(|_| ())
            .map_err(ServiceError::fail)
    }
}
