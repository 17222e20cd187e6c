use super::deployment_spec::{DeploymentSpec, ValidationOverrides};
use super::jobs::DeploymentJobs;
use crate::core::{ApplicationId, ApplicationVersion, RotationId, Version, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Usage figures reported for a deployment. Carried over across redeployments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    pub queries_per_second: f64,
    pub writes_per_second: f64,
    pub document_count: f64,
    pub query_latency_millis: f64,
    pub write_latency_millis: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentActivity {
    pub last_queried: Option<DateTime<Utc>>,
    pub last_written: Option<DateTime<Utc>>,
}

/// What runs in one zone, and since when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub zone: ZoneId,
    pub version: Version,
    pub application_version: ApplicationVersion,
    pub deploy_time: DateTime<Utc>,
    #[serde(default)]
    pub metrics: DeploymentMetrics,
    #[serde(default)]
    pub activity: DeploymentActivity,
}

impl Deployment {
    pub fn new(
        zone: ZoneId,
        application_version: ApplicationVersion,
        version: Version,
        deploy_time: DateTime<Utc>,
    ) -> Self {
        Self {
            zone,
            version,
            application_version,
            deploy_time,
            metrics: DeploymentMetrics::default(),
            activity: DeploymentActivity::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    pub query_service_quality: f64,
    pub writing_service_quality: f64,
}

/// Platform and/or application version an application should roll out to next.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub platform: Option<Version>,
    #[serde(default)]
    pub application: Option<ApplicationVersion>,
}

impl Change {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of_platform(version: Version) -> Self {
        Self {
            platform: Some(version),
            application: None,
        }
    }

    pub fn of_application(version: ApplicationVersion) -> Self {
        Self {
            platform: None,
            application: Some(version),
        }
    }

    pub fn is_present(&self) -> bool {
        self.platform.is_some() || self.application.is_some()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.platform, &self.application) {
            (None, None) => write!(f, "no change"),
            (Some(platform), None) => write!(f, "upgrade to {platform}"),
            (None, Some(application)) => write!(f, "application change to {application}"),
            (Some(platform), Some(application)) => {
                write!(f, "upgrade to {platform}, application change to {application}")
            }
        }
    }
}

/// Aggregate root for everything the controller knows about one application instance.
///
/// Values of this type are snapshots. Changes go through
/// [`LockedApplication`](crate::store::LockedApplication) so they are only ever
/// made while holding the application's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deployment_spec: DeploymentSpec,
    #[serde(default)]
    pub validation_overrides: ValidationOverrides,
    #[serde(default)]
    pub deployments: BTreeMap<ZoneId, Deployment>,
    #[serde(default)]
    pub deployment_jobs: DeploymentJobs,
    #[serde(default)]
    pub change: Change,
    #[serde(default)]
    pub outstanding_change: Change,
    #[serde(default)]
    pub rotation: Option<RotationId>,
    #[serde(default)]
    pub metrics: ApplicationMetrics,
}

impl Application {
    pub fn new(id: ApplicationId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            deployment_spec: DeploymentSpec::empty(),
            validation_overrides: ValidationOverrides::empty(),
            deployments: BTreeMap::new(),
            deployment_jobs: DeploymentJobs::default(),
            change: Change::empty(),
            outstanding_change: Change::empty(),
            rotation: None,
            metrics: ApplicationMetrics::default(),
        }
    }

    pub fn production_deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments
            .values()
            .filter(|deployment| deployment.zone.environment.is_production())
    }

    pub fn deployment_in(&self, zone: &ZoneId) -> Option<&Deployment> {
        self.deployments.get(zone)
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application '{}'", self.id)
    }
}
