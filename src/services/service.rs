//! # Service contracts hosted by a cell.
//!
//! Three shapes of work run inside a cell:
//! - [`QueuedService`]: handles one message at a time from a named queue;
//! - [`ScheduledService`]: runs at a fixed interval;
//! - [`BackgroundService`]: long-running, with start/stop hooks.
//!
//! Each service may implement a one-time `setup` hook, invoked while the cell
//! initializes. A handler receives a [`CancellationToken`] and should return
//! [`ServiceError::Canceled`] when it aborts because of it.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use cellvisor::{QueueWorkItem, QueuedService, ServiceError};
//!
//! struct Orders;
//!
//! #[async_trait]
//! impl QueuedService for Orders {
//!     fn name(&self) -> &str { "orders" }
//!
//!     async fn process(&self, item: &QueueWorkItem, ctx: CancellationToken) -> Result<(), ServiceError> {
//!         if ctx.is_cancelled() {
//!             return Err(ServiceError::Canceled);
//!         }
//!         let _order = item.payload();
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::descriptor::{QueuedSettings, ScheduledSettings};
use crate::error::ServiceError;
use crate::messages::QueueWorkItem;

/// Handles messages from one queue.
#[async_trait]
pub trait QueuedService: Send + Sync + 'static {
    /// Stable service name.
    fn name(&self) -> &str;

    /// One-time initialization before the cell starts running.
    async fn setup(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Processes a single message.
    ///
    /// - `Ok(())` deletes the message (unless [`QueueWorkItem::resume_later`] was requested);
    /// - `Err(Canceled)` makes it visible immediately;
    /// - `Err(Fatal)` tears the cell down;
    /// - any other error leaves it hidden until its visibility timeout expires.
    async fn process(&self, item: &QueueWorkItem, ctx: CancellationToken) -> Result<(), ServiceError>;
}

/// Runs periodically on a fixed phase.
#[async_trait]
pub trait ScheduledService: Send + Sync + 'static {
    /// Stable service name.
    fn name(&self) -> &str;

    /// One-time initialization before the cell starts running.
    async fn setup(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Runs one invocation; `scheduled_at` is the nominal due instant.
    async fn run(&self, scheduled_at: Instant, ctx: CancellationToken) -> Result<(), ServiceError>;
}

/// Long-running service with explicit start/stop hooks.
#[async_trait]
pub trait BackgroundService: Send + Sync + 'static {
    /// Stable service name.
    fn name(&self) -> &str;

    /// One-time initialization before the cell starts running.
    async fn setup(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Invoked once when the cell starts.
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Body spawned after `start`; runs until `ctx` is cancelled.
    ///
    /// An error returned here is fatal for the cell.
    async fn run(&self, ctx: CancellationToken) -> Result<(), ServiceError> {
        ctx.cancelled().await;
        Ok(())
    }

    /// Invoked once during drain, before the cell's scope is cancelled.
    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// A materialized service ready to be scheduled.
#[derive(Clone)]
pub enum ServiceInstance {
    /// Queue-driven service.
    Queued {
        /// Implementation.
        service: Arc<dyn QueuedService>,
        /// Per-service queue settings.
        settings: QueuedSettings,
    },
    /// Interval-driven service.
    Scheduled {
        /// Implementation.
        service: Arc<dyn ScheduledService>,
        /// Per-service interval settings.
        settings: ScheduledSettings,
    },
    /// Long-running service.
    Background {
        /// Implementation.
        service: Arc<dyn BackgroundService>,
    },
}

impl ServiceInstance {
    /// Service name.
    pub fn name(&self) -> &str {
        match self {
            ServiceInstance::Queued { service, .. } => service.name(),
            ServiceInstance::Scheduled { service, .. } => service.name(),
            ServiceInstance::Background { service } => service.name(),
        }
    }

    /// Invokes the service's one-time setup hook.
    pub async fn setup(&self) -> Result<(), ServiceError> {
        match self {
            ServiceInstance::Queued { service, .. } => service.setup().await,
            ServiceInstance::Scheduled { service, .. } => service.setup().await,
            ServiceInstance::Background { service } => service.setup().await,
        }
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ServiceInstance::Queued { .. } => "queued",
            ServiceInstance::Scheduled { .. } => "scheduled",
            ServiceInstance::Background { .. } => "background",
        };
        f.debug_struct("ServiceInstance")
            .field("name", &self.name())
            .field("kind", &kind)
            .finish()
    }
}
