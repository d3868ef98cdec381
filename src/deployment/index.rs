//! # Deployment index: append-only registry of published deployments.
//!
//! Stored as JSON under [`INDEX_NAME`]. Entries are never modified or removed,
//! so an index entry is a stable description of a deployment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::package::{Deployment, decode, encode};
use super::store::BlobStore;
use crate::error::DeploymentError;

/// Blob name of the deployment index.
pub const INDEX_NAME: &str = "deployments/index.json";

/// One published deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Assemblies artifact name.
    pub assemblies: String,
    /// Config artifact name.
    pub config: String,
    /// Settings artifact name.
    pub settings: String,
    /// When the deployment was first published.
    pub first_seen: DateTime<Utc>,
}

/// Map of deployment name to its artifacts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIndex {
    #[serde(default)]
    deployments: BTreeMap<String, IndexEntry>,
}

impl DeploymentIndex {
    /// Loads the index; an absent index is empty.
    pub async fn load(store: &dyn BlobStore) -> Result<Self, DeploymentError> {
        match store.get(INDEX_NAME).await? {
            Some((bytes, _)) => Self::decode(&bytes),
            None => Ok(Self::default()),
        }
    }

    /// Decodes a stored index.
    pub fn decode(bytes: &[u8]) -> Result<Self, DeploymentError> {
        decode("deployment index", bytes)
    }

    /// Encodes the index for storage.
    pub fn encode(&self) -> Result<Vec<u8>, DeploymentError> {
        encode("deployment index", self)
    }

    /// Looks a deployment up by name.
    pub fn get(&self, name: &str) -> Option<Deployment> {
        self.deployments.get(name).map(|e| Deployment {
            name: name.to_string(),
            assemblies: e.assemblies.clone(),
            config: e.config.clone(),
            settings: e.settings.clone(),
        })
    }

    /// When `name` was first published.
    pub fn first_seen(&self, name: &str) -> Option<DateTime<Utc>> {
        self.deployments.get(name).map(|e| e.first_seen)
    }

    /// Adds `deployment` unless already present. Returns whether it was added.
    pub fn insert(&mut self, deployment: &Deployment, first_seen: DateTime<Utc>) -> bool {
        if self.deployments.contains_key(&deployment.name) {
            return false;
        }
        self.deployments.insert(
            deployment.name.clone(),
            IndexEntry {
                assemblies: deployment.assemblies.clone(),
                config: deployment.config.clone(),
                settings: deployment.settings.clone(),
                first_seen,
            },
        );
        true
    }

    /// Number of published deployments.
    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    /// Returns true if nothing was published yet.
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}
