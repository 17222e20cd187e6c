#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use fleet_controller::controller::{ActivateResult, ApplicationController, ControllerParts};
use fleet_controller::core::{ApplicationId, Environment, ManualClock, Result, ZoneId};
use fleet_controller::integration::{
    DeployOptions, MemoryArtifactStore, MemoryIdentityProvider, MemoryNameService,
    MemoryRoutingGenerator, MemoryZoneRuntime,
};
use fleet_controller::model::{
    ApplicationPackage, DeclaredZone, DeploymentSpec, PackageDocument, Tenant,
    ValidationOverrides,
};
use fleet_controller::rotation::Rotation;
use fleet_controller::store::MemoryEntityStore;
use fleet_controller::ControllerConfig;
use std::sync::Arc;

pub const USER_TENANT: &str = "tenant1";
pub const IDENTITY_TENANT: &str = "tenant2";
pub const IDENTITY_DOMAIN: &str = "domain1";

pub fn prod(region: &str) -> ZoneId {
    ZoneId::new(Environment::Prod, region)
}

pub fn dev(region: &str) -> ZoneId {
    ZoneId::new(Environment::Dev, region)
}

pub fn config() -> ControllerConfig {
    let mut config = ControllerConfig::new()
        .with_zone(prod("us-east-3"))
        .with_zone(prod("us-west-1"))
        .with_zone(prod("eu-west-1"))
        .with_zone(ZoneId::new(Environment::Staging, "us-east-3"))
        .with_zone(ZoneId::new(Environment::Test, "us-east-1"));
    for i in 1..=3 {
        config = config.with_rotation(Rotation::new(
            format!("rotation-id-{i:02}"),
            format!("rotation-fqdn-{i:02}"),
        ));
    }
    config
}

/// A controller wired to in-memory collaborators that tests can inspect and break.
pub struct Fixture {
    pub controller: Arc<ApplicationController>,
    pub store: Arc<MemoryEntityStore>,
    pub zone_runtime: Arc<MemoryZoneRuntime>,
    pub application_store: Arc<MemoryArtifactStore>,
    pub artifact_repository: Arc<MemoryArtifactStore>,
    pub name_service: Arc<MemoryNameService>,
    pub identity: Arc<MemoryIdentityProvider>,
    pub routing: Arc<MemoryRoutingGenerator>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryEntityStore::new());
        let zone_runtime = Arc::new(MemoryZoneRuntime::new());
        let application_store = Arc::new(MemoryArtifactStore::new());
        let artifact_repository = Arc::new(MemoryArtifactStore::new());
        let name_service = Arc::new(MemoryNameService::new());
        let identity = Arc::new(MemoryIdentityProvider::new());
        let routing = Arc::new(MemoryRoutingGenerator::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));

        let parts = ControllerParts {
            store: store.clone(),
            zone_runtime: zone_runtime.clone(),
            application_store: application_store.clone(),
            artifact_repository: artifact_repository.clone(),
            name_service: name_service.clone(),
            identity: identity.clone(),
            routing: routing.clone(),
            clock: clock.clone(),
            ..ControllerParts::in_memory()
        };
        parts.tenants.create(Tenant::user(USER_TENANT)).await.unwrap();
        parts
            .tenants
            .create(Tenant::identity(IDENTITY_TENANT, IDENTITY_DOMAIN))
            .await
            .unwrap();

        Self {
            controller: Arc::new(ApplicationController::new(&config, parts)),
            store,
            zone_runtime,
            application_store,
            artifact_repository,
            name_service,
            identity,
            routing,
            clock,
        }
    }

    pub async fn create(&self, application: &str) -> ApplicationId {
        let id = ApplicationId::default_instance(USER_TENANT, application);
        self.controller.create_application(&id, None).await.unwrap();
        id
    }

    /// Deploys `package` straight to `zone`, bypassing the pipeline.
    pub async fn deploy_directly(
        &self,
        id: &ApplicationId,
        zone: &ZoneId,
        package: ApplicationPackage,
    ) -> Result<ActivateResult> {
        self.controller
            .deploy(id, zone, Some(package), None, DeployOptions::directly())
            .await
    }
}

pub fn spec(regions: &[&str]) -> DeploymentSpec {
    let mut zones = vec![
        DeclaredZone::new(Environment::Test, None),
        DeclaredZone::new(Environment::Staging, None),
    ];
    zones.extend(
        regions
            .iter()
            .map(|&region| DeclaredZone::new(Environment::Prod, Some(region))),
    );
    DeploymentSpec {
        global_service_id: None,
        zones,
        identity_domain: None,
    }
}

pub fn global_spec(regions: &[&str]) -> DeploymentSpec {
    DeploymentSpec {
        global_service_id: Some("foo".to_string()),
        ..spec(regions)
    }
}

pub fn package(spec: DeploymentSpec) -> ApplicationPackage {
    package_with_overrides(spec, None)
}

pub fn package_with_overrides(
    spec: DeploymentSpec,
    overrides: Option<ValidationOverrides>,
) -> ApplicationPackage {
    ApplicationPackage::from_document(&PackageDocument {
        deployment: Some(spec),
        validation_overrides: overrides,
        services: serde_json::json!({ "container": { "nodes": 2 } }),
    })
    .unwrap()
}

/// A package without deployment metadata, as used for development deployments.
pub fn bare_package() -> ApplicationPackage {
    ApplicationPackage::from_document(&PackageDocument::default()).unwrap()
}
