//! The pool of global rotations and their assignment to applications.

pub mod dns;

pub use dns::{GlobalDnsDomains, GlobalDnsName, NameRegistrar};

use crate::core::{ApplicationId, ControllerError, Result, RotationId};
use crate::model::Application;
use crate::store::EntityStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

/// A global rotation: an id and the DNS name traffic for it is routed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    pub id: RotationId,
    pub name: String,
}

impl Rotation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: RotationId::new(id),
            name: name.into(),
        }
    }
}

/// Proof of holding the rotation pool lock.
pub struct RotationLock {
    _guard: OwnedMutexGuard<()>,
}

/// A fixed pool of rotations. Rotations are assigned once and never reclaimed.
///
/// Which rotations are taken is derived from the stored applications, so the pool
/// lock must be held from choosing a rotation until the choice is stored.
pub struct RotationRepository {
    pool: BTreeMap<RotationId, Rotation>,
    lock: Arc<Mutex<()>>,
}

impl RotationRepository {
    pub fn new(rotations: impl IntoIterator<Item = Rotation>) -> Self {
        Self {
            pool: rotations
                .into_iter()
                .map(|rotation| (rotation.id.clone(), rotation))
                .collect(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn lock(&self) -> RotationLock {
        RotationLock {
            _guard: Arc::clone(&self.lock).lock_owned().await,
        }
    }

    pub fn get(&self, id: &RotationId) -> Option<&Rotation> {
        self.pool.get(id)
    }

    pub fn rotations(&self) -> impl Iterator<Item = &Rotation> {
        self.pool.values()
    }

    /// Rotations currently assigned, with the application holding each.
    pub async fn assigned(
        &self,
        applications: &dyn EntityStore,
    ) -> Result<BTreeMap<RotationId, ApplicationId>> {
        Ok(applications
            .read_all()
            .await?
            .into_iter()
            .filter_map(|application| {
                application
                    .rotation
                    .clone()
                    .filter(|rotation| self.pool.contains_key(rotation))
                    .map(|rotation| (rotation, application.id))
            })
            .collect())
    }

    /// Rotations nobody holds, in id order.
    pub async fn available(&self, applications: &dyn EntityStore) -> Result<Vec<Rotation>> {
        let assigned = self.assigned(applications).await?;
        Ok(self
            .pool
            .values()
            .filter(|rotation| !assigned.contains_key(&rotation.id))
            .cloned()
            .collect())
    }

    /// Returns the rotation of `application`, picking the first free one if it has none.
    ///
    /// The caller stores the returned rotation on the application before releasing `_lock`.
    pub async fn get_or_assign_rotation(
        &self,
        application: &Application,
        applications: &dyn EntityStore,
        _lock: &RotationLock,
    ) -> Result<Rotation> {
        if let Some(id) = &application.rotation {
            return self.pool.get(id).cloned().ok_or_else(|| {
                ControllerError::invalid(format!(
                    "{application} has rotation {id}, which does not exist in this system"
                ))
            });
        }

        if application.deployment_spec.global_service_id.is_none() {
            return Err(ControllerError::invalid(format!(
                "{application} has no global service id, so no rotation can be assigned"
            )));
        }
        if application.deployment_spec.production_zones().next().is_none() {
            return Err(ControllerError::invalid(format!(
                "{application} must declare at least one production zone to get a rotation"
            )));
        }

        let rotation = self
            .available(applications)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ControllerError::RotationsExhausted(format!(
                    "all {} rotations are assigned, none left for {}",
                    self.pool.len(),
                    application.id
                ))
            })?;
        info!(application = %application.id, rotation = %rotation.id, "assigning rotation");
        Ok(rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;
    use crate::model::{DeclaredZone, DeploymentSpec};
    use crate::store::{LockManager, LockedApplication, MemoryEntityStore};
    use chrono::Utc;

    fn global_application(name: &str) -> Application {
        let mut application =
            Application::new(ApplicationId::default_instance("tenant1", name), Utc::now());
        application.deployment_spec = DeploymentSpec {
            global_service_id: Some("foo".to_string()),
            zones: vec![DeclaredZone::new(Environment::Prod, Some("us-east-3"))],
            identity_domain: None,
        };
        application
    }

    fn pool() -> RotationRepository {
        RotationRepository::new([
            Rotation::new("rotation-id-01", "rotation-fqdn-01"),
            Rotation::new("rotation-id-02", "rotation-fqdn-02"),
        ])
    }

    #[tokio::test]
    async fn assignment_is_idempotent_and_exhaustible() {
        let repository = pool();
        let store = MemoryEntityStore::new();
        let locks = LockManager::new();

        for (name, expected) in [("a", "rotation-id-01"), ("b", "rotation-id-02")] {
            let application = global_application(name);
            let lock = locks.lock(&application.id).await.unwrap();
            let pool_lock = repository.lock().await;
            let rotation = repository
                .get_or_assign_rotation(&application, &store, &pool_lock)
                .await
                .unwrap();
            assert_eq!(rotation.id.as_str(), expected);

            let locked = LockedApplication::new(application, lock)
                .unwrap()
                .with_rotation(rotation.id.clone());
            store.write(&locked).await.unwrap();

            let again = repository
                .get_or_assign_rotation(locked.get(), &store, &pool_lock)
                .await
                .unwrap();
            assert_eq!(again, rotation);
        }

        let pool_lock = repository.lock().await;
        let err = repository
            .get_or_assign_rotation(&global_application("c"), &store, &pool_lock)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::RotationsExhausted(_)));
        assert_eq!(repository.assigned(&store).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn application_without_global_service_gets_nothing() {
        let repository = pool();
        let store = MemoryEntityStore::new();
        let application = Application::new(ApplicationId::default_instance("t", "a"), Utc::now());
        let pool_lock = repository.lock().await;
        let err = repository
            .get_or_assign_rotation(&application, &store, &pool_lock)
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
