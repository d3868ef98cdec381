//! # Function-backed services (`QueuedFn`, `ScheduledFn`)
//!
//! Wrap a closure that produces a fresh future per invocation. No hidden state is
//! shared between invocations; capture an `Arc<...>` explicitly when needed.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use cellvisor::{QueuedFn, QueuedService, ServiceError};
//!
//! let svc: Arc<dyn QueuedService> = QueuedFn::arc("echo", |payload: Vec<u8>, _ctx: CancellationToken| async move {
//!     if payload.is_empty() {
//!         return Err(ServiceError::fail("empty message"));
//!     }
//!     Ok(())
//! });
//! assert_eq!(svc.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::service::{QueuedService, ScheduledService};
use crate::error::ServiceError;
use crate::messages::QueueWorkItem;

/// Queued service backed by `Fn(payload, ctx) -> Future`.
#[derive(Debug)]
pub struct QueuedFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> QueuedFn<F> {
    /// Creates a new function-backed queued service.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the service and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> QueuedService for QueuedFn<F>
where
    F: Fn(Vec<u8>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, item: &QueueWorkItem, ctx: CancellationToken) -> Result<(), ServiceError> {
        (self.f)(item.payload().to_vec(), ctx).await
    }
}

/// Scheduled service backed by `Fn(scheduled_at, ctx) -> Future`.
#[derive(Debug)]
pub struct ScheduledFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ScheduledFn<F> {
    /// Creates a new function-backed scheduled service.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the service and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> ScheduledService for ScheduledFn<F>
where
    F: Fn(Instant, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, scheduled_at: Instant, ctx: CancellationToken) -> Result<(), ServiceError> {
        (self.f)(scheduled_at, ctx).await
    }
}
