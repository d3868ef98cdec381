//! Services hosted by cells: contracts, descriptors and factories.
//!
//! ## Contents
//! - [`QueuedService`], [`ScheduledService`], [`BackgroundService`] service contracts
//! - [`QueuedFn`], [`ScheduledFn`] closure-backed implementations
//! - [`CellConfig`], [`ServiceDescriptor`] the JSON configuration artifact
//! - [`ServiceRegistry`] factories keyed by service type

mod descriptor;
mod registry;
mod service;
mod service_fn;

pub use descriptor::{
    CellConfig, DEFAULT_EXECUTION_TIMEOUT, MAX_EXECUTION_TIMEOUT, MAX_SCHEDULE_INTERVAL, MAX_VISIBILITY_TIMEOUT,
    QueuedSettings, ScheduledSettings, ServiceDescriptor, ServiceKind,
};
pub use registry::ServiceRegistry;
pub use service::{BackgroundService, QueuedService, ScheduledService, ServiceInstance};
pub use service_fn::{QueuedFn, ScheduledFn};
