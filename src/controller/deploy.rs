use super::ApplicationController;
use crate::core::{
    ApplicationId, ApplicationVersion, ControllerError, DeploymentId, Environment, Result,
    RevisionId, TenantName, Version, ZoneId,
};
use crate::integration::{
    ConfigChangeActions, DeployOptions, LogEntry, PrepareResponse, ZoneRuntimeError,
};
use crate::model::{
    Application, ApplicationPackage, DeploymentSpec, JobType, Tenant, ValidationId,
};
use crate::rotation::GlobalDnsName;
use crate::store::LockedApplication;
use std::collections::BTreeSet;
use tracing::{Instrument, Level, event, info_span};

/// Outcome of an activation: what was activated and what the zone said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateResult {
    pub revision: RevisionId,
    pub prepare_response: PrepareResponse,
    pub package_size: usize,
}

impl ApplicationController {
    /// Deploys an application to `zone`, creating the application if it does not exist.
    ///
    /// Deployments to manually deployed environments, or with `deploy_directly`, use the given
    /// package and versions. Others must have been triggered by the pipeline, and use the
    /// versions of the triggered run; an untriggered one gets a benign "not expected" result.
    pub async fn deploy(
        &self,
        id: &ApplicationId,
        zone: &ZoneId,
        package: Option<ApplicationPackage>,
        application_version: Option<ApplicationVersion>,
        options: DeployOptions,
    ) -> Result<ActivateResult> {
        let span = info_span!("controller.deploy", application = %id, zone = %zone);
        self.deploy_inner(id, zone, package, application_version, options)
            .instrument(span)
            .await
    }

    async fn deploy_inner(
        &self,
        id: &ApplicationId,
        zone: &ZoneId,
        package: Option<ApplicationPackage>,
        application_version: Option<ApplicationVersion>,
        options: DeployOptions,
    ) -> Result<ActivateResult> {
        if id.instance.is_tester() {
            return Err(ControllerError::invalid(format!("'{id}' is a tester application!")));
        }

        let lock = self.lock(id).await?;
        let mut application = match self.get(id).await? {
            Some(existing) => LockedApplication::new(existing, lock)?,
            None => self.create_locked(id, None, lock).await?,
        };

        let can_deploy_directly = options.deploy_directly || zone.environment.is_manually_deployed();
        let prefer_oldest_version = options.deploy_current_version;

        let (platform, application_version, package) = if can_deploy_directly {
            let platform = options
                .platform_version
                .clone()
                .unwrap_or_else(|| self.system_version.clone());
            let package = match (package, &application_version) {
                (Some(package), _) => package,
                (None, Some(version)) => self.get_application_package(application.get(), version).await?,
                (None, None) => {
                    return Err(ControllerError::invalid(format!(
                        "Application package must be given when deploying to {zone}"
                    )));
                }
            };
            (platform, application_version.unwrap_or_default(), package)
        } else {
            let job_type = JobType::from_zone(zone).ok_or_else(|| {
                ControllerError::invalid(format!("{zone} is not deployed by the pipeline"))
            })?;
            let triggered = match application.get().deployment_jobs.status_of(&job_type) {
                Some(status) if status.expects_deployment() => status.last_triggered.clone(),
                _ => None,
            };
            let Some(triggered) = triggered else {
                return self.unexpected_deployment(application.get(), zone);
            };

            let platform = if prefer_oldest_version {
                triggered.source_platform.clone().unwrap_or(triggered.platform.clone())
            } else {
                triggered.platform.clone()
            };
            let version = if prefer_oldest_version {
                triggered
                    .source_application
                    .clone()
                    .unwrap_or(triggered.application.clone())
            } else {
                triggered.application.clone()
            };

            let package = self.get_application_package(application.get(), &version).await?;
            validate_run(application.get(), zone, &platform, &version)?;
            (platform, version, package)
        };

        self.verify_identity_configuration(&id.tenant, &package).await?;

        if !prefer_oldest_version && !application.get().deployment_jobs.deployed_internally {
            application = self.store_with_updated_config(application, &package).await?;
        }

        application = self.with_rotation(application, zone).await?;
        let mut rotation_names = BTreeSet::new();
        let mut dns_aliases = BTreeSet::new();
        if let Some(rotation) = &application.get().rotation {
            rotation_names.insert(rotation.to_string());
            dns_aliases.extend(GlobalDnsName::new(id, &self.dns_domains).all());
        }

        let options = options.with_version(platform.clone());
        let result = self
            .activate(id, &package, zone, &options, &dns_aliases, &rotation_names)
            .await?;

        let application =
            application.with_new_deployment(zone.clone(), application_version, platform, self.clock.now());
        self.store(&application).await?;
        event!(Level::INFO, revision = %result.revision, "deployed");
        Ok(result)
    }

    /// Fetches the package of `version` from the artifact store(s).
    pub async fn get_application_package(
        &self,
        application: &Application,
        version: &ApplicationVersion,
    ) -> Result<ApplicationPackage> {
        self.artifacts.get_package(application, version).await
    }

    /// Stores the deployment spec and validation overrides from the package, and cleans up
    /// deployments and jobs the new spec no longer references.
    async fn store_with_updated_config(
        &self,
        application: LockedApplication,
        package: &ApplicationPackage,
    ) -> Result<LockedApplication> {
        if !package.has_deployment_metadata() {
            return Ok(application);
        }
        let spec = package
            .deployment_spec()
            .cloned()
            .unwrap_or_else(|| application.get().deployment_spec.clone());
        self.validate_spec(&spec)?;
        let overrides = package
            .validation_overrides()
            .cloned()
            .unwrap_or_else(|| application.get().validation_overrides.clone());

        let application = application
            .with_deployment_spec(spec)
            .with_validation_overrides(overrides);
        let application = self.without_deleted_deployments(application).await?;
        let application = without_unreferenced_jobs(application);

        self.store(&application).await?;
        Ok(application)
    }

    /// Every production zone of the spec must exist in this system.
    fn validate_spec(&self, spec: &DeploymentSpec) -> Result<()> {
        for declared in spec.production_zones() {
            let known = declared
                .zone_id()
                .is_some_and(|zone| self.zones.has_zone(&zone));
            if !known {
                return Err(ControllerError::invalid(format!(
                    "Zone {declared} in deployment spec was not found in this system!"
                )));
            }
        }
        Ok(())
    }

    async fn without_deleted_deployments(
        &self,
        application: LockedApplication,
    ) -> Result<LockedApplication> {
        let removed: Vec<ZoneId> = application
            .get()
            .production_deployments()
            .filter(|deployment| !application.get().deployment_spec.includes_zone(&deployment.zone))
            .map(|deployment| deployment.zone.clone())
            .collect();
        if removed.is_empty() {
            return Ok(application);
        }

        if !application
            .get()
            .validation_overrides
            .allows(ValidationId::DeploymentRemoval, self.clock.now())
        {
            let regions: Vec<&str> = removed.iter().map(|zone| zone.region.as_str()).collect();
            return Err(ControllerError::invalid(format!(
                "{}: {} is deployed in {}, but does not include {} in its deployment spec. {}",
                ValidationId::DeploymentRemoval,
                application.get(),
                regions.join(", "),
                if removed.len() > 1 { "these zones" } else { "this zone" },
                ValidationId::DeploymentRemoval.allow_message()
            )));
        }

        let mut application = application;
        for zone in &removed {
            application = self.deactivate_locked(application, zone).await?;
        }
        Ok(application)
    }

    /// Makes sure the application has a global rotation, if eligible, and that DNS points at it.
    async fn with_rotation(
        &self,
        application: LockedApplication,
        zone: &ZoneId,
    ) -> Result<LockedApplication> {
        if zone.environment != Environment::Prod
            || application.get().deployment_spec.global_service_id.is_none()
        {
            return Ok(application);
        }

        let pool_lock = self.rotations.lock().await;
        let rotation = self
            .rotations
            .get_or_assign_rotation(application.get(), self.store.as_ref(), &pool_lock)
            .await?;
        let application = application.with_rotation(rotation.id.clone());
        // Kept even if the deployment fails.
        self.store(&application).await?;

        let names = GlobalDnsName::new(application.id(), &self.dns_domains);
        self.registrar.register_all(&rotation, &names).await;
        Ok(application)
    }

    async fn activate(
        &self,
        id: &ApplicationId,
        package: &ApplicationPackage,
        zone: &ZoneId,
        options: &DeployOptions,
        dns_aliases: &BTreeSet<String>,
        rotation_names: &BTreeSet<String>,
    ) -> Result<ActivateResult> {
        let deployment = DeploymentId::new(id.clone(), zone.clone());
        let prepared = self
            .zone_runtime
            .prepare_and_activate(&deployment, options, dns_aliases, rotation_names, package.content())
            .await?;
        Ok(ActivateResult {
            revision: package.revision_id(),
            prepare_response: prepared.prepare_response,
            package_size: package.content().len(),
        })
    }

    fn unexpected_deployment(&self, application: &Application, zone: &ZoneId) -> Result<ActivateResult> {
        let message = format!(
            "Ignoring deployment of {application} to {zone} as a deployment is not currently expected"
        );
        event!(Level::WARN, "{}", message);
        Ok(ActivateResult {
            revision: RevisionId::new("0"),
            prepare_response: PrepareResponse {
                message: String::new(),
                log: vec![LogEntry {
                    time: self.clock.now().timestamp_millis(),
                    level: "WARNING".to_string(),
                    message,
                }],
                config_change_actions: ConfigChangeActions::default(),
            },
            package_size: 0,
        })
    }

    /// The package may only name an identity domain its tenant is registered under.
    async fn verify_identity_configuration(
        &self,
        tenant: &TenantName,
        package: &ApplicationPackage,
    ) -> Result<()> {
        let Some(domain) = package
            .deployment_spec()
            .and_then(|spec| spec.identity_domain.as_deref())
        else {
            return Ok(());
        };

        match self.tenants.get(tenant).await {
            None => Err(ControllerError::invalid("Tenant does not exist")),
            Some(Tenant::User { .. }) => Err(ControllerError::invalid(format!(
                "Identity domain defined in the deployment spec, but no identity domain for tenant ({tenant}). \
                 Services with an identity cannot be launched from personal tenants"
            ))),
            Some(Tenant::Identity {
                domain: tenant_domain,
                ..
            }) if tenant_domain != domain => Err(ControllerError::invalid(format!(
                "Identity domain in the deployment spec: [{domain}] must match tenant domain: [{tenant_domain}]"
            ))),
            Some(Tenant::Identity { .. }) => Ok(()),
        }
    }

    /// Re-activates each recorded deployment of the application from what its zone has
    /// active, at the platform version it was recorded with.
    ///
    /// Returns `false` when there was nothing to redeploy.
    pub async fn redeploy(&self, id: &ApplicationId) -> Result<bool> {
        let Some(mut application) = self.lock_if_present(id).await? else {
            return Ok(false);
        };
        let deployments: Vec<_> = application.get().deployments.values().cloned().collect();
        if deployments.is_empty() {
            return Ok(false);
        }

        for deployment in deployments {
            let deployment_id = DeploymentId::new(id.clone(), deployment.zone.clone());
            match self
                .zone_runtime
                .reactivate(&deployment_id, &deployment.version)
                .await
            {
                Ok(()) => {}
                Err(ZoneRuntimeError::NotFound(_)) => {
                    event!(
                        Level::WARN,
                        application = %id,
                        zone = %deployment.zone,
                        "zone has nothing active for recorded deployment"
                    );
                    continue;
                }
                Err(err) => {
                    // Zones already reactivated keep their new activation time.
                    self.store(&application).await?;
                    return Err(err.into());
                }
            }
            application = application.with_new_deployment(
                deployment.zone,
                deployment.application_version,
                deployment.version,
                self.clock.now(),
            );
        }
        self.store(&application).await?;
        Ok(true)
    }
}

/// Rejects downgrades of an existing production deployment.
fn validate_run(
    application: &Application,
    zone: &ZoneId,
    platform: &Version,
    version: &ApplicationVersion,
) -> Result<()> {
    let Some(deployment) = application.deployment_in(zone) else {
        return Ok(());
    };
    if zone.environment.is_production()
        && (platform < &deployment.version || version < &deployment.application_version)
    {
        return Err(ControllerError::invalid(format!(
            "Rejecting deployment of {application} to {zone}, as the requested versions \
             (platform: {platform}, application: {version}) are older than the currently deployed \
             (platform: {}, application: {}).",
            deployment.version, deployment.application_version
        )));
    }
    Ok(())
}

/// Drops production job statuses for zones the spec no longer lists.
fn without_unreferenced_jobs(application: LockedApplication) -> LockedApplication {
    let unreferenced: Vec<JobType> = application
        .get()
        .deployment_jobs
        .production_jobs()
        .filter(|job| {
            job.production_zone()
                .is_none_or(|zone| !application.get().deployment_spec.includes_zone(&zone))
        })
        .cloned()
        .collect();
    unreferenced
        .iter()
        .fold(application, |application, job| application.without_deployment_job(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn production_downgrades_are_rejected() {
        let zone = ZoneId::new(Environment::Prod, "us-east-3");
        let mut application =
            Application::new(ApplicationId::default_instance("t", "a"), Utc::now());
        application.deployments.insert(
            zone.clone(),
            crate::model::Deployment::new(
                zone.clone(),
                ApplicationVersion::unknown(),
                Version::new(6, 2, 0),
                Utc::now(),
            ),
        );
        let unknown = ApplicationVersion::unknown();

        assert!(validate_run(&application, &zone, &Version::new(6, 1, 0), &unknown)
            .unwrap_err()
            .is_invalid_argument());
        assert!(validate_run(&application, &zone, &Version::new(6, 2, 0), &unknown).is_ok());
        assert!(validate_run(&application, &zone, &Version::new(6, 3, 0), &unknown).is_ok());

        let staging = ZoneId::new(Environment::Staging, "us-east-3");
        assert!(validate_run(&application, &staging, &Version::new(1, 0, 0), &unknown).is_ok());
    }
}
