use super::ApplicationController;
use crate::core::{ApplicationId, ApplicationVersion, Result};
use crate::model::{Change, JobError, JobRun, JobType};
use tracing::info;

impl ApplicationController {
    /// Records that the pipeline triggered `job_type` with the versions of `run`.
    pub async fn notify_job_triggered(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        run: JobRun,
    ) -> Result<()> {
        let locked = self.lock_or_throw(id).await?;
        info!(
            application = %id,
            job = %job_type,
            platform = %run.platform,
            version = %run.application,
            reason = %run.reason,
            "job triggered"
        );
        let locked = locked.with_job_triggering(job_type, run);
        self.store(&locked).await
    }

    /// Records completion of the last triggered run of `job_type`.
    ///
    /// A successful component job which built `built` starts rolling that version out,
    /// or queues it as the outstanding change while another change is in progress.
    pub async fn notify_job_completion(
        &self,
        id: &ApplicationId,
        job_type: &JobType,
        error: Option<JobError>,
        built: Option<ApplicationVersion>,
    ) -> Result<()> {
        let locked = self.lock_or_throw(id).await?;
        let mut locked = locked.with_job_completion(job_type, error, self.clock.now())?;

        if let (JobType::Component, None, Some(version)) = (job_type, error, built) {
            let change = Change::of_application(version);
            locked = if locked.get().change.is_present() {
                locked.with_outstanding_change(change)
            } else {
                locked.with_change(change)
            };
        }
        info!(application = %id, job = %job_type, ?error, "job completed");
        self.store(&locked).await
    }
}
