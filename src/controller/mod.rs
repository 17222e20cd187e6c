//! The application controller: every read and mutation of applications goes through here.

mod deploy;
mod endpoints;
mod lifecycle;
mod triggers;

pub use deploy::ActivateResult;

use crate::config::ControllerConfig;
use crate::core::{ApplicationId, Clock, ControllerError, Result, SystemClock, TenantName, Version};
use crate::integration::{
    ArtifactResolver, ArtifactStore, IdentityProvider, MemoryArtifactStore,
    MemoryIdentityProvider, MemoryNameService, MemoryRoutingGenerator, MemoryZoneRuntime,
    NameService, RoutingGenerator, ZoneRegistry, ZoneRuntimeClient,
};
use crate::model::{Application, TenantRegistry};
use crate::rotation::{GlobalDnsDomains, NameRegistrar, RotationRepository};
use crate::store::{ApplicationLock, EntityStore, LockManager, LockedApplication, MemoryEntityStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, event};

/// The collaborators an [`ApplicationController`] is wired with.
#[derive(Clone)]
pub struct ControllerParts {
    pub store: Arc<dyn EntityStore>,
    pub tenants: Arc<TenantRegistry>,
    pub zone_runtime: Arc<dyn ZoneRuntimeClient>,
    /// Packages built by the controller's own pipeline.
    pub application_store: Arc<dyn ArtifactStore>,
    /// Packages built externally.
    pub artifact_repository: Arc<dyn ArtifactStore>,
    pub name_service: Arc<dyn NameService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub routing: Arc<dyn RoutingGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl ControllerParts {
    /// Parts backed entirely by in-process implementations.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryEntityStore::new()),
            tenants: Arc::new(TenantRegistry::new()),
            zone_runtime: Arc::new(MemoryZoneRuntime::new()),
            application_store: Arc::new(MemoryArtifactStore::new()),
            artifact_repository: Arc::new(MemoryArtifactStore::new()),
            name_service: Arc::new(MemoryNameService::new()),
            identity: Arc::new(MemoryIdentityProvider::new()),
            routing: Arc::new(MemoryRoutingGenerator::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Owns the methods and state for controlling applications.
///
/// Any operation which stores an application first acquires the application's lock,
/// then reads, modifies and stores it, and finally releases the lock.
pub struct ApplicationController {
    store: Arc<dyn EntityStore>,
    locks: LockManager,
    tenants: Arc<TenantRegistry>,
    zones: ZoneRegistry,
    artifacts: ArtifactResolver,
    rotations: RotationRepository,
    registrar: NameRegistrar,
    zone_runtime: Arc<dyn ZoneRuntimeClient>,
    identity: Arc<dyn IdentityProvider>,
    routing: Arc<dyn RoutingGenerator>,
    clock: Arc<dyn Clock>,
    system_version: Version,
    dns_domains: GlobalDnsDomains,
    endpoint_suffixes: Vec<String>,
}

impl ApplicationController {
    pub fn new(config: &ControllerConfig, parts: ControllerParts) -> Self {
        let locks = match config.lock_timeout() {
            Some(timeout) => LockManager::new().with_timeout(timeout),
            None => LockManager::new(),
        };
        Self {
            store: parts.store,
            locks,
            tenants: parts.tenants,
            zones: ZoneRegistry::new(config.system.name.clone(), config.zones.iter().cloned()),
            artifacts: ArtifactResolver::new(parts.application_store, parts.artifact_repository),
            rotations: RotationRepository::new(config.rotations.iter().cloned()),
            registrar: NameRegistrar::new(parts.name_service),
            zone_runtime: parts.zone_runtime,
            identity: parts.identity,
            routing: parts.routing,
            clock: parts.clock,
            system_version: config.system.version.clone(),
            dns_domains: config.dns.clone(),
            endpoint_suffixes: config.endpoint_suffixes.clone(),
        }
    }

    pub fn system_version(&self) -> &Version {
        &self.system_version
    }

    pub fn tenants(&self) -> &Arc<TenantRegistry> {
        &self.tenants
    }

    pub fn rotations(&self) -> &RotationRepository {
        &self.rotations
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn artifacts(&self) -> &ArtifactResolver {
        &self.artifacts
    }

    pub fn entity_store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// The application with `id`, if present. Does not lock.
    pub async fn get(&self, id: &ApplicationId) -> Result<Option<Application>> {
        self.store.read(id).await
    }

    pub async fn require(&self, id: &ApplicationId) -> Result<Application> {
        self.get(id)
            .await?
            .ok_or_else(|| ControllerError::not_found(format!("{id} not found")))
    }

    /// All applications, sorted by id.
    pub async fn as_list(&self) -> Result<Vec<Application>> {
        let mut applications = self.store.read_all().await?;
        applications.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(applications)
    }

    pub async fn as_list_for_tenant(&self, tenant: &TenantName) -> Result<Vec<Application>> {
        let mut applications = self.store.read_all_for_tenant(tenant).await?;
        applications.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(applications)
    }

    /// Exclusive right to change the application with `id`, released when dropped.
    pub async fn lock(&self, id: &ApplicationId) -> Result<ApplicationLock> {
        self.locks.lock(id).await
    }

    /// Locks and reads the application, or releases the lock again and returns `None`.
    pub async fn lock_if_present(&self, id: &ApplicationId) -> Result<Option<LockedApplication>> {
        let lock = self.lock(id).await?;
        match self.get(id).await? {
            Some(application) => LockedApplication::new(application, lock).map(Some),
            None => Ok(None),
        }
    }

    /// Locks and reads the application, failing with not-found if it does not exist.
    pub async fn lock_or_throw(&self, id: &ApplicationId) -> Result<LockedApplication> {
        let lock = self.lock(id).await?;
        let application = self.require(id).await?;
        LockedApplication::new(application, lock)
    }

    /// Replaces any previous version of this application.
    pub async fn store(&self, application: &LockedApplication) -> Result<()> {
        self.store.write(application).await
    }

    /// Re-stores every application under its lock, bringing them to the current format.
    pub async fn rewrite_all(&self) -> Result<usize> {
        let start = Instant::now();
        let mut count = 0;
        for application in self.store.read_all().await? {
            if let Some(locked) = self.lock_if_present(&application.id).await? {
                self.store(&locked).await?;
                count += 1;
            }
        }
        event!(
            Level::INFO,
            count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rewrote applications"
        );
        Ok(count)
    }
}
