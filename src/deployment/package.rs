//! # Deployment content: the three artifacts and their typed forms.
//!
//! A deployment is the triple (assemblies, config, settings):
//! - assemblies: [`AssembliesManifest`], the service types the host binary must provide;
//! - config: [`CellConfig`], the services a cell runs;
//! - settings: [`CellSettings`], free-form key/value settings.
//!
//! All three are stored as JSON. Maps are ordered, so encoding is deterministic
//! and equal content always yields equal names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::naming::{ArtifactKind, deployment_name, name_for};
use crate::error::DeploymentError;
use crate::services::CellConfig;

/// Key/value settings handed to a cell.
pub type CellSettings = BTreeMap<String, String>;

/// Manifest of the code a deployment needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembliesManifest {
    /// Free-form build identifier.
    #[serde(default)]
    pub version: String,
    /// Service type ids that must be registered in the host.
    #[serde(default)]
    pub service_types: Vec<String>,
}

/// Names of a deployment and its artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment name.
    pub name: String,
    /// Assemblies artifact name.
    pub assemblies: String,
    /// Config artifact name.
    pub config: String,
    /// Settings artifact name.
    pub settings: String,
}

impl Deployment {
    /// Builds the deployment identity from its artifact names.
    pub fn from_artifacts(assemblies: String, config: String, settings: String) -> Self {
        Self {
            name: deployment_name(&assemblies, &config, &settings),
            assemblies,
            config,
            settings,
        }
    }
}

/// Encoded artifacts ready for publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentPackage {
    /// Encoded [`AssembliesManifest`].
    pub assemblies: Vec<u8>,
    /// Encoded [`CellConfig`].
    pub config: Vec<u8>,
    /// Encoded [`CellSettings`].
    pub settings: Vec<u8>,
}

impl DeploymentPackage {
    /// Encodes the typed artifacts.
    pub fn new(
        assemblies: &AssembliesManifest,
        config: &CellConfig,
        settings: &CellSettings,
    ) -> Result<Self, DeploymentError> {
        Ok(Self {
            assemblies: encode("assemblies", assemblies)?,
            config: encode("config", config)?,
            settings: encode("settings", settings)?,
        })
    }

    /// Artifacts with their kinds, in publishing order.
    pub fn artifacts(&self) -> [(ArtifactKind, &[u8]); 3] {
        [
            (ArtifactKind::Assemblies, self.assemblies.as_slice()),
            (ArtifactKind::Config, self.config.as_slice()),
            (ArtifactKind::Settings, self.settings.as_slice()),
        ]
    }

    /// Deployment identity of this package.
    pub fn deployment(&self) -> Deployment {
        Deployment::from_artifacts(
            name_for(ArtifactKind::Assemblies, &self.assemblies),
            name_for(ArtifactKind::Config, &self.config),
            name_for(ArtifactKind::Settings, &self.settings),
        )
    }
}

pub(crate) fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, DeploymentError> {
    serde_json::to_vec(value).map_err(|e| DeploymentError::Invalid {
        what,
        error: e.to_string(),
    })
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(
    what: &'static str,
    bytes: &[u8],
) -> Result<T, DeploymentError> {
    serde_json::from_slice(bytes).map_err(|e| DeploymentError::Invalid {
        what,
        error: e.to_string(),
    })
}
