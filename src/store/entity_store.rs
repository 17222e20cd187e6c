use super::locked::LockedApplication;
use crate::core::{ApplicationId, ControllerError, Result, TenantName};
use crate::model::Application;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Persistent keyed store of applications.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn read(&self, id: &ApplicationId) -> Result<Option<Application>>;

    async fn read_all(&self) -> Result<Vec<Application>>;

    async fn read_all_for_tenant(&self, tenant: &TenantName) -> Result<Vec<Application>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|application| &application.id.tenant == tenant)
            .collect())
    }

    /// Persists the snapshot held by `application`. Requires its lock by construction.
    async fn write(&self, application: &LockedApplication) -> Result<()>;

    async fn remove(&self, id: &ApplicationId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    applications: RwLock<BTreeMap<ApplicationId, Application>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn read(&self, id: &ApplicationId) -> Result<Option<Application>> {
        Ok(self.applications.read().await.get(id).cloned())
    }

    async fn read_all(&self) -> Result<Vec<Application>> {
        Ok(self.applications.read().await.values().cloned().collect())
    }

    async fn write(&self, application: &LockedApplication) -> Result<()> {
        self.applications
            .write()
            .await
            .insert(application.id().clone(), application.get().clone());
        Ok(())
    }

    async fn remove(&self, id: &ApplicationId) -> Result<()> {
        self.applications.write().await.remove(id);
        Ok(())
    }
}

/// One JSON document per application under a directory.
///
/// Writes go to a temporary file in the same directory which is then renamed over
/// the target, so readers never observe a partially written document.
#[derive(Debug, Clone)]
pub struct FileEntityStore {
    dir: PathBuf,
}

impl FileEntityStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|err| {
            ControllerError::Storage(format!(
                "Failed to create application directory '{}': {}",
                dir.display(),
                err
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &ApplicationId) -> PathBuf {
        self.dir.join(format!("{}.json", id.serialized_form()))
    }

    async fn read_file(path: &Path) -> Result<Application> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            ControllerError::Serialization(format!(
                "Failed to parse application file '{}': {}",
                path.display(),
                err
            ))
        })
    }
}

#[async_trait]
impl EntityStore for FileEntityStore {
    async fn read(&self, id: &ApplicationId) -> Result<Option<Application>> {
        let path = self.path_of(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Self::read_file(&path).await.map(Some)
    }

    async fn read_all(&self) -> Result<Vec<Application>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut applications = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            applications.push(Self::read_file(&path).await?);
        }
        applications.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(applications)
    }

    async fn write(&self, application: &LockedApplication) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(application.get())?;
        let dir = self.dir.clone();
        let path = self.path_of(application.id());

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|err| {
                ControllerError::Storage(format!(
                    "Failed to move application file into '{}': {}",
                    path.display(),
                    err
                ))
            })?;
            Ok(())
        })
        .await
        .map_err(|err| ControllerError::Storage(format!("Application write task failed: {err}")))?
    }

    async fn remove(&self, id: &ApplicationId) -> Result<()> {
        match fs::remove_file(self.path_of(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Environment, ZoneId};
    use crate::model::DeclaredZone;
    use crate::store::LockManager;
    use chrono::Utc;

    async fn locked(manager: &LockManager, id: &ApplicationId) -> LockedApplication {
        let lock = manager.lock(id).await.unwrap();
        LockedApplication::new(Application::new(id.clone(), Utc::now()), lock).unwrap()
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new();
        let id = ApplicationId::default_instance("tenant1", "app1");

        {
            let store = FileEntityStore::open(dir.path()).await.unwrap();
            let mut application = locked(&manager, &id).await.get().clone();
            application.deployment_spec.zones =
                vec![DeclaredZone::new(Environment::Prod, Some("us-east-3"))];
            let lock = manager.lock(&id).await.unwrap();
            store
                .write(&LockedApplication::new(application, lock).unwrap())
                .await
                .unwrap();
        }

        let store = FileEntityStore::open(dir.path()).await.unwrap();
        let application = store.read(&id).await.unwrap().unwrap();
        assert!(application
            .deployment_spec
            .includes_zone(&ZoneId::new(Environment::Prod, "us-east-3")));
        assert_eq!(store.read_all().await.unwrap().len(), 1);

        store.remove(&id).await.unwrap();
        assert!(store.read(&id).await.unwrap().is_none());
        store.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn tenant_listing_filters() {
        let store = MemoryEntityStore::new();
        let manager = LockManager::new();
        for id in [
            ApplicationId::default_instance("tenant1", "a"),
            ApplicationId::default_instance("tenant1", "b"),
            ApplicationId::default_instance("tenant2", "a"),
        ] {
            store.write(&locked(&manager, &id).await).await.unwrap();
        }
        let listed = store
            .read_all_for_tenant(&TenantName::from("tenant1"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_document_fails_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEntityStore::open(dir.path()).await.unwrap();
        let manager = LockManager::new();
        let good = ApplicationId::default_instance("tenant1", "app1");
        let bad = ApplicationId::default_instance("tenant1", "app2");
        store.write(&locked(&manager, &good).await).await.unwrap();
        store.write(&locked(&manager, &bad).await).await.unwrap();

        std::fs::write(store.path_of(&bad), b"{\"id\":").unwrap();

        let err = store.read_all().await.unwrap_err();
        assert!(matches!(err, ControllerError::Serialization(_)));
        assert!(store.read(&good).await.unwrap().is_some());
    }
}
