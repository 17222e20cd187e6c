use crate::core::{ControllerError, Result, Version};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Where the version of the last controller that completed startup is kept.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn read(&self) -> Result<Option<Version>>;

    async fn write(&self, version: &Version) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    version: RwLock<Option<Version>>,
}

impl MemoryVersionStore {
    pub fn new(version: Option<Version>) -> Self {
        Self {
            version: RwLock::new(version),
        }
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn read(&self) -> Result<Option<Version>> {
        Ok(self.version.read().await.clone())
    }

    async fn write(&self, version: &Version) -> Result<()> {
        *self.version.write().await = Some(version.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl VersionStore for FileVersionStore {
    async fn read(&self) -> Result<Option<Version>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => content.trim().parse().map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ControllerError::Storage(format!(
                "Failed to read version marker '{}': {}",
                self.path.display(),
                err
            ))),
        }
    }

    async fn write(&self, version: &Version) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, version.to_string()).await?;
        fs::rename(&tmp, &self.path).await.map_err(|err| {
            ControllerError::Storage(format!(
                "Failed to rename '{}' -> '{}': {}",
                tmp.display(),
                self.path.display(),
                err
            ))
        })
    }
}

/// Stored controller version, as read at startup, versus the running one.
pub struct VersionState {
    store: std::sync::Arc<dyn VersionStore>,
    stored: Option<Version>,
    current: Version,
}

impl VersionState {
    pub async fn load(store: std::sync::Arc<dyn VersionStore>, current: Version) -> Result<Self> {
        let stored = store.read().await?;
        Ok(Self {
            store,
            stored,
            current,
        })
    }

    pub fn stored(&self) -> Option<&Version> {
        self.stored.as_ref()
    }

    pub fn current(&self) -> &Version {
        &self.current
    }

    /// True when the running version differs from the stored one, including on first start.
    pub fn is_upgraded(&self) -> bool {
        self.stored.as_ref() != Some(&self.current)
    }

    pub async fn save_new_version(&self) -> Result<()> {
        self.store.write(&self.current).await
    }
}

impl std::fmt::Display for VersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stored {
            Some(stored) => write!(f, "version {} (stored {})", self.current, stored),
            None => write!(f, "version {} (nothing stored)", self.current),
        }
    }
}
