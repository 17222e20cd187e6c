use crate::core::{ApplicationId, ApplicationVersion, ControllerError, Result};
use crate::model::{Application, ApplicationPackage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("no package for {application} at {version}")]
    NotFound { application: String, version: String },

    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}

impl From<ArtifactError> for ControllerError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { .. } => ControllerError::not_found(err.to_string()),
            ArtifactError::Unavailable(message) => ControllerError::Storage(message),
        }
    }
}

/// A store of built application packages.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
    ) -> std::result::Result<Vec<u8>, ArtifactError>;

    async fn put(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
        content: Vec<u8>,
    ) -> std::result::Result<(), ArtifactError>;

    /// Removes every package stored for `application`.
    async fn remove_all(&self, application: &ApplicationId)
    -> std::result::Result<(), ArtifactError>;
}

/// Fetches packages from the store matching how the application is built, falling
/// back to the other one for artifacts stored before the application switched pipeline.
#[derive(Clone)]
pub struct ArtifactResolver {
    application_store: Arc<dyn ArtifactStore>,
    artifact_repository: Arc<dyn ArtifactStore>,
}

impl ArtifactResolver {
    /// `application_store` holds internally built packages, `artifact_repository` external ones.
    pub fn new(
        application_store: Arc<dyn ArtifactStore>,
        artifact_repository: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            application_store,
            artifact_repository,
        }
    }

    pub fn application_store(&self) -> &Arc<dyn ArtifactStore> {
        &self.application_store
    }

    pub async fn get_package(
        &self,
        application: &Application,
        version: &ApplicationVersion,
    ) -> Result<ApplicationPackage> {
        let internally = application.deployment_jobs.deployed_internally;
        let (primary, secondary) = if internally {
            (&self.application_store, &self.artifact_repository)
        } else {
            (&self.artifact_repository, &self.application_store)
        };

        let content = match primary.get(&application.id, version).await {
            Ok(content) => content,
            Err(err) => {
                info!(
                    application = %application.id,
                    version = %version,
                    internally,
                    error = %err,
                    "fetching application package from alternate store"
                );
                secondary.get(&application.id, version).await?
            }
        };
        ApplicationPackage::new(content)
    }
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    packages: RwLock<BTreeMap<(ApplicationId, String), Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.packages.read().await.len()
    }

    fn check_available(&self) -> std::result::Result<(), ArtifactError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArtifactError::Unavailable("store is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
    ) -> std::result::Result<Vec<u8>, ArtifactError> {
        self.check_available()?;
        self.packages
            .read()
            .await
            .get(&(application.clone(), version.id()))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                application: application.to_string(),
                version: version.id(),
            })
    }

    async fn put(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
        content: Vec<u8>,
    ) -> std::result::Result<(), ArtifactError> {
        self.check_available()?;
        self.packages
            .write()
            .await
            .insert((application.clone(), version.id()), content);
        Ok(())
    }

    async fn remove_all(
        &self,
        application: &ApplicationId,
    ) -> std::result::Result<(), ArtifactError> {
        self.check_available()?;
        self.packages
            .write()
            .await
            .retain(|(id, _), _| id != application);
        Ok(())
    }
}
