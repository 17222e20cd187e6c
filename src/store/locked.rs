use super::lock::ApplicationLock;
use crate::core::{ApplicationId, ApplicationVersion, ControllerError, Result, RotationId, Version, ZoneId};
use crate::model::{
    Application, Change, Deployment, DeploymentSpec, JobError, JobRun, JobStatus, JobType,
    ValidationOverrides,
};
use chrono::{DateTime, Utc};

/// An application snapshot paired with the lock of its id.
///
/// This is the only value the entity store accepts for writes. Every `with_*`
/// method consumes the handle and returns a modified one holding the same lock.
#[derive(Debug)]
pub struct LockedApplication {
    application: Application,
    lock: ApplicationLock,
}

impl LockedApplication {
    pub fn new(application: Application, lock: ApplicationLock) -> Result<Self> {
        if !lock.covers(&application.id) {
            return Err(ControllerError::Lock(format!(
                "Lock on {} does not cover {}",
                lock.id(),
                application.id
            )));
        }
        Ok(Self { application, lock })
    }

    pub fn id(&self) -> &ApplicationId {
        &self.application.id
    }

    pub fn get(&self) -> &Application {
        &self.application
    }

    /// Drops the snapshot and keeps holding the lock.
    pub fn into_lock(self) -> ApplicationLock {
        self.lock
    }

    pub fn with_deployment_spec(mut self, spec: DeploymentSpec) -> Self {
        self.application.deployment_spec = spec;
        self
    }

    pub fn with_validation_overrides(mut self, overrides: ValidationOverrides) -> Self {
        self.application.validation_overrides = overrides;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationId) -> Self {
        self.application.rotation = Some(rotation);
        self
    }

    /// Records a new activation in `zone`, keeping the metrics and activity of what it replaces.
    pub fn with_new_deployment(
        mut self,
        zone: ZoneId,
        application_version: ApplicationVersion,
        version: Version,
        at: DateTime<Utc>,
    ) -> Self {
        let mut deployment = Deployment::new(zone.clone(), application_version, version, at);
        if let Some(previous) = self.application.deployments.remove(&zone) {
            deployment.metrics = previous.metrics;
            deployment.activity = previous.activity;
        }
        self.application.deployments.insert(zone, deployment);
        self
    }

    pub fn without_deployment_in(mut self, zone: &ZoneId) -> Self {
        self.application.deployments.remove(zone);
        self
    }

    pub fn without_deployment_job(mut self, job_type: &JobType) -> Self {
        self.application.deployment_jobs.job_status.remove(job_type);
        self
    }

    pub fn with_job_triggering(mut self, job_type: JobType, run: JobRun) -> Self {
        let status = self
            .application
            .deployment_jobs
            .job_status
            .remove(&job_type)
            .unwrap_or_else(|| JobStatus::initial(job_type.clone()));
        self.application
            .deployment_jobs
            .job_status
            .insert(job_type, status.with_triggering(run));
        self
    }

    pub fn with_job_completion(
        mut self,
        job_type: &JobType,
        error: Option<JobError>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let status = self
            .application
            .deployment_jobs
            .status_of(job_type)
            .cloned()
            .ok_or_else(|| {
                ControllerError::invalid(format!(
                    "{} of {} completed without being triggered",
                    job_type, self.application.id
                ))
            })?;
        let status = status.with_completion(error, at)?;
        self.application
            .deployment_jobs
            .job_status
            .insert(job_type.clone(), status);
        Ok(self)
    }

    pub fn with_project_id(mut self, project_id: u64) -> Self {
        self.application.deployment_jobs.project_id = Some(project_id);
        self
    }

    pub fn with_deployed_internally(mut self, internally: bool) -> Self {
        self.application.deployment_jobs.deployed_internally = internally;
        self
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.application.change = change;
        self
    }

    pub fn with_outstanding_change(mut self, change: Change) -> Self {
        self.application.outstanding_change = change;
        self
    }
}
