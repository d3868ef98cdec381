//! # Head pointer and the in-cell head poller.
//!
//! The head record ([`HEAD_NAME`]) names the deployment cells should run.
//! [`HeadPoller`] runs inside a cell and compares the head against the
//! deployment the cell loaded:
//!
//! ```text
//! every interval:
//!   get_if_modified(head, known etag)
//!     ├─ NotModified / Missing ──► keep polling
//!     └─ Modified ──► resolve via index ──► compare artifacts
//!                        ├─ assemblies differ ──► AssembliesChanged ──► restart signal
//!                        ├─ config/settings differ ──► ConfigurationChanged ──► restart signal
//!                        └─ same ──► keep polling
//! ```
//!
//! ## Rules
//! - The poller waits a full interval before its first check, so restart storms
//!   do not multiply head reads.
//! - Only head changes after boot count: a cell pinned to an older deployment
//!   stays on it until the head is moved again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::index::DeploymentIndex;
use super::package::{Deployment, decode, encode};
use super::store::{BlobStore, ETag, Fetched};
use crate::core::{CellEnvironment, RestartSignal};
use crate::error::DeploymentError;
use crate::events::{Event, EventKind};

/// Blob name of the head record.
pub const HEAD_NAME: &str = "deployments/head.json";

/// Stored head pointer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRecord {
    /// Deployment name the head points to.
    pub deployment: String,
    /// When the head was last moved.
    pub updated_at: DateTime<Utc>,
}

impl HeadRecord {
    /// Decodes a stored head record.
    pub fn decode(bytes: &[u8]) -> Result<Self, DeploymentError> {
        decode("deployment head", bytes)
    }

    /// Encodes the record for storage.
    pub fn encode(&self) -> Result<Vec<u8>, DeploymentError> {
        encode("deployment head", self)
    }
}

/// Reads the head and resolves it through the index.
pub async fn read_head(store: &dyn BlobStore) -> Result<(Deployment, ETag), DeploymentError> {
    let (bytes, etag) = store.get(HEAD_NAME).await?.ok_or(DeploymentError::NoHead)?;
    let head = HeadRecord::decode(&bytes)?;
    let deployment = resolve(store, &head.deployment).await?;
    Ok((deployment, etag))
}

async fn resolve(store: &dyn BlobStore, name: &str) -> Result<Deployment, DeploymentError> {
    DeploymentIndex::load(store)
        .await?
        .get(name)
        .ok_or_else(|| DeploymentError::UnknownDeployment {
            name: name.to_string(),
        })
}

/// What a head check found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadChange {
    /// Nothing to do.
    Unchanged,
    /// The head deployment ships different code.
    AssembliesChanged(Deployment),
    /// Same code, different config or settings.
    ConfigurationChanged(Deployment),
}

/// Watches the head on behalf of a running cell.
pub struct HeadPoller {
    store: Arc<dyn BlobStore>,
    loaded: Deployment,
    known: Option<ETag>,
    interval: Duration,
}

impl HeadPoller {
    /// Creates a poller for a cell running `loaded`; `known` is the head tag seen at boot.
    pub fn new(
        store: Arc<dyn BlobStore>,
        loaded: Deployment,
        known: Option<ETag>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            loaded,
            known,
            interval,
        }
    }

    /// Polls the head once.
    pub async fn check(&mut self) -> Result<HeadChange, DeploymentError> {
        let (content, etag) = match self.store.get_if_modified(HEAD_NAME, self.known.as_ref()).await? {
            Fetched::NotModified | Fetched::Missing => return Ok(HeadChange::Unchanged),
            Fetched::Modified { content, etag } => (content, etag),
        };
        let head = HeadRecord::decode(&content)?;
        if head.deployment == self.loaded.name {
            self.known = Some(etag);
            return Ok(HeadChange::Unchanged);
        }
        let target = resolve(self.store.as_ref(), &head.deployment).await?;
        self.known = Some(etag);
        Ok(if target.assemblies != self.loaded.assemblies {
            HeadChange::AssembliesChanged(target)
        } else if target.config != self.loaded.config || target.settings != self.loaded.settings {
            HeadChange::ConfigurationChanged(target)
        } else {
            HeadChange::Unchanged
        })
    }

    /// Polls until a change is found (then raises a restart signal) or `token` is cancelled.
    pub async fn run(mut self, env: CellEnvironment, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = time::sleep(self.interval) => {}
            }
            let (signal, target, change) = match self.check().await {
                Ok(HeadChange::Unchanged) => continue,
                Ok(HeadChange::AssembliesChanged(d)) => (RestartSignal::AssembliesChanged, d, "assemblies"),
                Ok(HeadChange::ConfigurationChanged(d)) => (RestartSignal::ConfigurationChanged, d, "config"),
                Err(e) => {
                    tracing::warn!(cell = env.cell_name(), err = %e, "head poll failed");
                    continue;
                }
            };
            env.bus().publish(
                Event::new(EventKind::DeploymentChanged)
                    .with_cell(env.cell_name())
                    .with_deployment(target.name)
                    .with_reason(change),
            );
            env.request_restart(signal);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::memory::MemoryBlobStore;
    use crate::deployment::package::{AssembliesManifest, CellSettings, DeploymentPackage};
    use crate::deployment::publisher::DeploymentPublisher;
    use crate::services::CellConfig;

    fn package(version: &str, region: &str) -> DeploymentPackage {
        let manifest = AssembliesManifest {
            version: version.into(),
            service_types: vec![],
        };
        let mut settings = CellSettings::new();
        settings.insert("region".into(), region.into());
        DeploymentPackage::new(&manifest, &CellConfig::default(), &settings).unwrap()
    }

    async fn booted(store: &Arc<MemoryBlobStore>) -> HeadPoller {
        let (loaded, etag) = read_head(store.as_ref()).await.unwrap();
        HeadPoller::new(store.clone(), loaded, Some(etag), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn classifies_head_changes() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = DeploymentPublisher::new(store.clone());
        publisher.publish_and_set_head(&package("1", "eu")).await.unwrap();

        let mut poller = booted(&store).await;
        assert_eq!(poller.check().await.unwrap(), HeadChange::Unchanged);

        let reconfigured = package("1", "us");
        publisher.publish_and_set_head(&reconfigured).await.unwrap();
        assert_eq!(
            poller.check().await.unwrap(),
            HeadChange::ConfigurationChanged(reconfigured.deployment())
        );

        let mut poller = booted(&store).await;
        let upgraded = package("2", "us");
        publisher.publish_and_set_head(&upgraded).await.unwrap();
        assert_eq!(
            poller.check().await.unwrap(),
            HeadChange::AssembliesChanged(upgraded.deployment())
        );
    }

    #[tokio::test]
    async fn pinned_cell_ignores_the_unmoved_head() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = DeploymentPublisher::new(store.clone());
        let old = package("1", "eu");
        publisher.publish(&old).await.unwrap();
        publisher.publish_and_set_head(&package("2", "eu")).await.unwrap();

        let (_, etag) = read_head(store.as_ref()).await.unwrap();
        let mut poller = HeadPoller::new(store.clone(), old.deployment(), Some(etag), Duration::from_secs(60));
        assert_eq!(poller.check().await.unwrap(), HeadChange::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn run_raises_restart_signal_on_change() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = DeploymentPublisher::new(store.clone());
        publisher.publish_and_set_head(&package("1", "eu")).await.unwrap();
        let poller = booted(&store).await;

        let env = CellEnvironment::detached("cell");
        let mut rx = env.bus().subscribe();
        let task = tokio::spawn(poller.run(env.clone(), CancellationToken::new()));

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!env.restart_token().is_cancelled());

        publisher.publish_and_set_head(&package("2", "eu")).await.unwrap();
        task.await.unwrap();

        assert!(env.restart_token().is_cancelled());
        assert_eq!(env.take_restart(), Some(RestartSignal::AssembliesChanged));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::DeploymentChanged);
    }
}
