//! # cellvisor
//!
//! **Cellvisor** hosts long-running worker *cells*. A cell runs a set of
//! services described by a *deployment*; when the deployment head moves, or the
//! cell fails, the cell is torn down and rebuilt inside a fresh isolation
//! boundary.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │CellSupervisor│   │CellSupervisor│   │CellSupervisor│
//!     │  (cell #1)   │   │  (cell #2)   │   │  (cell #3)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  CellHost                                                         │
//! │  - Bus (broadcast events)                                         │
//! │  - AliveTracker (which cells are booted)                          │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - graceful shutdown (OS signal / request_stop)                   │
//! └───────────────────────────────────────────────────────────────────┘
//!
//! one boot of one cell:
//!   DeploymentReader::resolve(head | pinned name)
//!     └─► Boundary (dedicated tokio runtime)
//!           └─► CellEntry::run
//!                 ├─ ServiceRegistry::instantiate(config)
//!                 ├─ HeadPoller          ──► AssembliesChanged / ConfigurationChanged
//!                 └─ CellScheduler
//!                      ├─ background services (start/run/stop)
//!                      ├─ QueuedServiceRunner    ──► MessagePolicy ──► QueueStore
//!                      └─ ScheduledServiceRunner
//! ```
//!
//! ### Restart loop
//! ```text
//! loop {
//!   ├─► resolve deployment, merge host setting overrides
//!   ├─► publish CellStarting{ cell, deployment, boot }
//!   ├─► boot boundary, wait for it (or for stop → stop_grace → discard)
//!   └─► outcome:
//!         deployment changed / explicit command → reboot at once
//!         fatal error / panic                   → CellFailed, flood-guarded delay, reboot
//!         stopped on request                    → exit
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                  |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------------------|
//! | **Hosting**       | Run cells, restart them, shut down gracefully.                | [`CellHost`], [`CellSupervisor`], [`HostConfig`]    |
//! | **Isolation**     | Contain and abandon a boot.                                   | [`Boundary`], [`IsolationMode`]                     |
//! | **Services**      | Queued, scheduled and background services.                   | [`QueuedService`], [`ScheduledService`], [`BackgroundService`] |
//! | **Messages**      | Dequeue, complete, retry, quarantine, resume later.           | [`MessagePolicy`], [`QueueStore`]                   |
//! | **Deployments**   | Content-addressed artifacts, head pointer, head polling.      | [`DeploymentPublisher`], [`DeploymentReader`]       |
//! | **Subscriber API**| Hook into lifecycle events.                                   | [`Subscribe`]                                       |
//! | **Errors**        | Typed errors with stable labels.                              | [`RuntimeError`], [`ServiceError`], [`CellError`]   |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (renders events through `tracing`).
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use cellvisor::{
//!     HostBuilder, HostConfig, MemoryBlobStore, MemoryQueueStore, QueuedFn, QueuedService,
//!     ServiceCellEntry, ServiceError, ServiceRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = HostConfig::default();
//!     let host = HostBuilder::new(cfg.clone()).build();
//!
//!     let mut registry = ServiceRegistry::new();
//!     registry.register_queued("echo", |d, _env| {
//!         Ok(QueuedFn::arc(d.name.clone(), |payload: Vec<u8>, _ctx: CancellationToken| async move {
//!             println!("{}", String::from_utf8_lossy(&payload));
//!             Ok::<(), ServiceError>(())
//!         }) as Arc<dyn QueuedService>)
//!     });
//!
//!     let queues = Arc::new(MemoryQueueStore::new());
//!     let deployments = Arc::new(MemoryBlobStore::new());
//!     let entry = Arc::new(ServiceCellEntry::new(registry, queues, &cfg));
//!
//!     let cell = host.supervisor("worker-1", entry, deployments);
//!     host.run(vec![cell]).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod deployment;
pub mod error;
pub mod events;
pub mod messages;
pub mod policies;
pub mod runners;
pub mod services;
pub mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    Boundary, BoundaryExit, CellEntry, CellEnvironment, CellHost, CellIdentity, CellOutcome,
    CellSupervisor, DeploymentCommand, HostBuilder, HostConfig, IsolationMode, RestartSignal,
    ServiceCellEntry, SupervisorHandle,
};
pub use deployment::{
    BlobStore, CellSettings, Deployment, DeploymentPackage, DeploymentPublisher, DeploymentReader,
    HeadPoller, MemoryBlobStore,
};
pub use error::{CellError, DeploymentError, LoadError, RuntimeError, ServiceError, StorageError};
pub use events::{Bus, Event, EventKind};
pub use messages::{
    MemoryFence, MemoryQueueStore, MessagePolicy, QueueStore, QueueWorkItem,
};
pub use policies::{BackoffPolicy, FloodPolicy, JitterPolicy};
pub use runners::{CellScheduler, QueuedServiceRunner, ScheduledServiceRunner};
pub use services::{
    BackgroundService, CellConfig, QueuedFn, QueuedService, QueuedSettings, ScheduledFn,
    ScheduledService, ScheduledSettings, ServiceDescriptor, ServiceKind, ServiceRegistry,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
