//! Deployment versioning: content-addressed artifacts, index, head and polling.
//!
//! ## Persisted layout
//! ```text
//! assemblies/<sha256>.json     AssembliesManifest   (immutable)
//! config/<sha256>.json         CellConfig           (immutable)
//! settings/<sha256>.json       CellSettings         (immutable)
//! deployments/index.json       DeploymentIndex      (append-only)
//! deployments/head.json        HeadRecord           (mutable pointer)
//! ```
//!
//! ## Contents
//! - [`BlobStore`] conditional blob storage, [`MemoryBlobStore`]
//! - [`DeploymentPublisher`] writes artifacts, index entries and the head
//! - [`DeploymentReader`] resolves and reads one deployment
//! - [`HeadPoller`] detects head changes from inside a running cell

mod head;
mod index;
mod memory;
mod naming;
mod package;
mod publisher;
mod reader;
mod store;

pub use head::{HEAD_NAME, HeadChange, HeadPoller, HeadRecord, read_head};
pub use index::{DeploymentIndex, INDEX_NAME, IndexEntry};
pub use memory::MemoryBlobStore;
pub use naming::{ArtifactKind, deployment_name, name_for};
pub use package::{AssembliesManifest, CellSettings, Deployment, DeploymentPackage};
pub use publisher::{DeploymentPublisher, Published};
pub use reader::DeploymentReader;
pub use store::{
    BlobStore, ETag, Fetched, MAX_UPDATE_ATTEMPTS, PutOutcome, Resolution, Upserted,
    put_if_absent_or_update,
};
