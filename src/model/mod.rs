pub mod application;
pub mod deployment_spec;
pub mod jobs;
pub mod package;
pub mod tenant;

pub use application::{
    Application, ApplicationMetrics, Change, Deployment, DeploymentActivity, DeploymentMetrics,
};
pub use deployment_spec::{
    DeclaredZone, DeploymentSpec, ValidationId, ValidationOverride, ValidationOverrides,
};
pub use jobs::{DeploymentJobs, JobError, JobRun, JobStatus, JobType};
pub use package::{ApplicationPackage, PackageDocument};
pub use tenant::{Tenant, TenantRegistry};
