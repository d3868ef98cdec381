//! # Read access to one deployment's content.

use std::sync::Arc;
use std::time::Duration;

use super::head::{HEAD_NAME, HeadPoller, read_head};
use super::index::DeploymentIndex;
use super::naming::{ArtifactKind, name_for};
use super::package::{AssembliesManifest, CellSettings, Deployment, decode};
use super::store::{BlobStore, ETag};
use crate::core::DeploymentCommand;
use crate::error::DeploymentError;
use crate::services::CellConfig;

/// Reads the artifacts of a resolved deployment.
///
/// Every artifact is checked against its content name on read.
#[derive(Clone)]
pub struct DeploymentReader {
    store: Arc<dyn BlobStore>,
    deployment: Deployment,
    head: Option<ETag>,
}

impl DeploymentReader {
    /// Creates a reader for `deployment`; `head` is the head tag observed at resolution.
    pub fn new(store: Arc<dyn BlobStore>, deployment: Deployment, head: Option<ETag>) -> Self {
        Self {
            store,
            deployment,
            head,
        }
    }

    /// Resolves the deployment selected by `command`.
    pub async fn resolve(
        store: Arc<dyn BlobStore>,
        command: &DeploymentCommand,
    ) -> Result<Self, DeploymentError> {
        match command {
            DeploymentCommand::LoadCurrentHeadDeployment => {
                let (deployment, etag) = read_head(store.as_ref()).await?;
                Ok(Self::new(store, deployment, Some(etag)))
            }
            DeploymentCommand::LoadDeployment(name) => {
                let deployment = DeploymentIndex::load(store.as_ref())
                    .await?
                    .get(name)
                    .ok_or_else(|| DeploymentError::UnknownDeployment { name: name.clone() })?;
                let head = store.get(HEAD_NAME).await?.map(|(_, etag)| etag);
                Ok(Self::new(store, deployment, head))
            }
        }
    }

    /// Identity of the deployment.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Raw bytes of one artifact.
    pub async fn artifact(&self, kind: ArtifactKind) -> Result<Vec<u8>, DeploymentError> {
        let name = match kind {
            ArtifactKind::Assemblies => &self.deployment.assemblies,
            ArtifactKind::Config => &self.deployment.config,
            ArtifactKind::Settings => &self.deployment.settings,
            ArtifactKind::Deployment => &self.deployment.name,
        };
        let (bytes, _) = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| DeploymentError::MissingArtifact { name: name.clone() })?;
        if name_for(kind, &bytes) != *name {
            return Err(DeploymentError::Invalid {
                what: "artifact",
                error: format!("content of {name} does not match its name"),
            });
        }
        Ok(bytes)
    }

    /// Decoded assemblies manifest.
    pub async fn assemblies(&self) -> Result<AssembliesManifest, DeploymentError> {
        decode("assemblies", &self.artifact(ArtifactKind::Assemblies).await?)
    }

    /// Decoded cell configuration.
    pub async fn config(&self) -> Result<CellConfig, DeploymentError> {
        decode("config", &self.artifact(ArtifactKind::Config).await?)
    }

    /// Decoded settings.
    pub async fn settings(&self) -> Result<CellSettings, DeploymentError> {
        decode("settings", &self.artifact(ArtifactKind::Settings).await?)
    }

    /// Poller watching the head for changes relative to this deployment.
    pub fn head_poller(&self, interval: Duration) -> HeadPoller {
        HeadPoller::new(
            self.store.clone(),
            self.deployment.clone(),
            self.head.clone(),
            interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::memory::MemoryBlobStore;
    use crate::deployment::package::DeploymentPackage;
    use crate::deployment::publisher::DeploymentPublisher;

    #[tokio::test]
    async fn resolves_head_and_pinned_deployments() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = DeploymentPublisher::new(store.clone());
        let mut settings = CellSettings::new();
        settings.insert("k".into(), "v1".into());
        let manifest = AssembliesManifest {
            version: "7".into(),
            service_types: vec!["echo".into()],
        };
        let v1 = DeploymentPackage::new(&manifest, &CellConfig::default(), &settings).unwrap();
        settings.insert("k".into(), "v2".into());
        let v2 = DeploymentPackage::new(&manifest, &CellConfig::default(), &settings).unwrap();
        publisher.publish(&v1).await.unwrap();
        publisher.publish_and_set_head(&v2).await.unwrap();

        let head = DeploymentReader::resolve(store.clone(), &DeploymentCommand::LoadCurrentHeadDeployment)
            .await
            .unwrap();
        assert_eq!(head.deployment(), &v2.deployment());
        assert_eq!(head.settings().await.unwrap()["k"], "v2");
        assert_eq!(head.assemblies().await.unwrap(), manifest);

        let pinned = DeploymentReader::resolve(
            store.clone(),
            &DeploymentCommand::LoadDeployment(v1.deployment().name),
        )
        .await
        .unwrap();
        assert_eq!(pinned.settings().await.unwrap()["k"], "v1");

        let missing = DeploymentReader::resolve(
            store,
            &DeploymentCommand::LoadDeployment("deployment/unknown".into()),
        )
        .await;
        assert!(matches!(missing, Err(DeploymentError::UnknownDeployment { .. })));
    }
}
