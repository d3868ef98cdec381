//! # Publishing deployments.
//!
//! ```text
//! publish(package)
//!   ├─ put_if_absent(assemblies/…, config/…, settings/…)   content names: duplicates are no-ops
//!   └─ index: add entry unless present                     optimistic update, retried on conflict
//! set_head(name)
//!   └─ head: point to `name` unless already there          optimistic update, retried on conflict
//! ```

use std::sync::Arc;

use chrono::Utc;

use super::head::{HEAD_NAME, HeadRecord};
use super::index::{DeploymentIndex, INDEX_NAME};
use super::naming::name_for;
use super::package::{Deployment, DeploymentPackage};
use super::store::{BlobStore, Resolution, Upserted, put_if_absent_or_update};
use crate::error::DeploymentError;

/// Summary of a [`DeploymentPublisher::publish`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    /// Identity of the published deployment.
    pub deployment: Deployment,
    /// Artifacts that were not stored before this call.
    pub new_artifacts: usize,
    /// Whether the index gained an entry.
    pub indexed: bool,
}

/// Writes deployment content, the index and the head.
#[derive(Clone)]
pub struct DeploymentPublisher {
    store: Arc<dyn BlobStore>,
}

impl DeploymentPublisher {
    /// Creates a publisher over `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Stores the package's artifacts and registers the deployment in the index.
    pub async fn publish(&self, package: &DeploymentPackage) -> Result<Published, DeploymentError> {
        let mut new_artifacts = 0;
        for (kind, content) in package.artifacts() {
            let name = name_for(kind, content);
            if self.store.put_if_absent(&name, content.to_vec()).await? {
                new_artifacts += 1;
            }
        }

        let deployment = package.deployment();
        let upserted = put_if_absent_or_update(self.store.as_ref(), INDEX_NAME, |current| -> Result<Resolution, DeploymentError> {
            let mut index = match current {
                Some(bytes) => DeploymentIndex::decode(bytes)?,
                None => DeploymentIndex::default(),
            };
            if !index.insert(&deployment, Utc::now()) {
                return Ok(Resolution::Skip);
            }
            Ok(Resolution::Apply(index.encode()?))
        })
        .await?;

        let indexed = matches!(upserted, Upserted::Written(_));
        tracing::info!(deployment = %deployment.name, new_artifacts, indexed, "deployment published");
        Ok(Published {
            deployment,
            new_artifacts,
            indexed,
        })
    }

    /// Points the head at an indexed deployment. Returns whether the head moved.
    pub async fn set_head(&self, name: &str) -> Result<bool, DeploymentError> {
        let index = DeploymentIndex::load(self.store.as_ref()).await?;
        if index.get(name).is_none() {
            return Err(DeploymentError::UnknownDeployment {
                name: name.to_string(),
            });
        }
        let upserted = put_if_absent_or_update(self.store.as_ref(), HEAD_NAME, |current| -> Result<Resolution, DeploymentError> {
            if let Some(bytes) = current {
                if HeadRecord::decode(bytes)?.deployment == name {
                    return Ok(Resolution::Skip);
                }
            }
            let record = HeadRecord {
                deployment: name.to_string(),
                updated_at: Utc::now(),
            };
            Ok(Resolution::Apply(record.encode()?))
        })
        .await?;
        Ok(matches!(upserted, Upserted::Written(_)))
    }

    /// Publishes `package` and moves the head to it.
    pub async fn publish_and_set_head(
        &self,
        package: &DeploymentPackage,
    ) -> Result<Published, DeploymentError> {
        let published = self.publish(package).await?;
        self.set_head(&published.deployment.name).await?;
        Ok(published)
    }
}
