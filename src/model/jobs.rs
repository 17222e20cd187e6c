use crate::core::{ApplicationVersion, ControllerError, Environment, RegionName, Version, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A step of the build pipeline. Every job except `Component` deploys to one zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobType {
    Component,
    SystemTest,
    StagingTest,
    Production(RegionName),
}

impl JobType {
    /// The job deploying to `zone`, if that zone is deployed by the pipeline at all.
    pub fn from_zone(zone: &ZoneId) -> Option<Self> {
        match zone.environment {
            Environment::Test => Some(Self::SystemTest),
            Environment::Staging => Some(Self::StagingTest),
            Environment::Prod => Some(Self::Production(zone.region.clone())),
            Environment::Dev | Environment::Perf => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production(_))
    }

    pub fn production_zone(&self) -> Option<ZoneId> {
        match self {
            Self::Production(region) => Some(ZoneId::new(Environment::Prod, region.as_str())),
            _ => None,
        }
    }

    pub fn job_name(&self) -> String {
        match self {
            Self::Component => "component".to_string(),
            Self::SystemTest => "system-test".to_string(),
            Self::StagingTest => "staging-test".to_string(),
            Self::Production(region) => format!("production-{region}"),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_name())
    }
}

impl FromStr for JobType {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "component" => Ok(Self::Component),
            "system-test" => Ok(Self::SystemTest),
            "staging-test" => Ok(Self::StagingTest),
            other => match other.strip_prefix("production-") {
                Some(region) if !region.is_empty() => Ok(Self::Production(RegionName::from(region))),
                _ => Err(ControllerError::invalid(format!("Unknown job type '{other}'"))),
            },
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.job_name()
    }
}

/// One run of a job: the versions it deployed, and the versions it upgraded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: u64,
    pub platform: Version,
    pub application: ApplicationVersion,
    #[serde(default)]
    pub source_platform: Option<Version>,
    #[serde(default)]
    pub source_application: Option<ApplicationVersion>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl JobRun {
    pub fn triggering(
        id: u64,
        platform: Version,
        application: ApplicationVersion,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            platform,
            application,
            source_platform: None,
            source_application: None,
            reason: reason.into(),
            at,
        }
    }

    pub fn with_source(mut self, platform: Version, application: ApplicationVersion) -> Self {
        self.source_platform = Some(platform);
        self.source_application = Some(application);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobError {
    Unknown,
    OutOfCapacity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_type: JobType,
    #[serde(default)]
    pub last_triggered: Option<JobRun>,
    #[serde(default)]
    pub last_completed: Option<JobRun>,
    #[serde(default)]
    pub last_success: Option<JobRun>,
    #[serde(default)]
    pub first_failing: Option<JobRun>,
    #[serde(default)]
    pub error: Option<JobError>,
}

impl JobStatus {
    pub fn initial(job_type: JobType) -> Self {
        Self {
            job_type,
            last_triggered: None,
            last_completed: None,
            last_success: None,
            first_failing: None,
            error: None,
        }
    }

    pub fn with_triggering(mut self, run: JobRun) -> Self {
        self.last_triggered = Some(run);
        self
    }

    /// Records completion of the last triggered run at `at`.
    pub fn with_completion(
        mut self,
        error: Option<JobError>,
        at: DateTime<Utc>,
    ) -> Result<Self, ControllerError> {
        let triggered = self.last_triggered.clone().ok_or_else(|| {
            ControllerError::invalid(format!("{} completed without being triggered", self.job_type))
        })?;
        let completed = JobRun { at, ..triggered };

        match error {
            None => {
                self.last_success = Some(completed.clone());
                self.first_failing = None;
            }
            Some(_) => {
                if self.first_failing.is_none() {
                    self.first_failing = Some(completed.clone());
                }
            }
        }
        self.error = error;
        self.last_completed = Some(completed);
        Ok(self)
    }

    /// Whether the last trigger has not been followed by a later completion.
    pub fn expects_deployment(&self) -> bool {
        match (&self.last_triggered, &self.last_completed) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(triggered), Some(completed)) => completed.at <= triggered.at,
        }
    }
}

/// Pipeline state of an application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentJobs {
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub job_status: BTreeMap<JobType, JobStatus>,
    /// Set when packages are built by the controller's own pipeline rather than an external one.
    #[serde(default)]
    pub deployed_internally: bool,
}

impl DeploymentJobs {
    pub fn status_of(&self, job_type: &JobType) -> Option<&JobStatus> {
        self.job_status.get(job_type)
    }

    pub fn production_jobs(&self) -> impl Iterator<Item = &JobType> {
        self.job_status.keys().filter(|job| job.is_production())
    }
}
