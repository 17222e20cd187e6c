pub mod clock;
pub mod error;
pub mod ids;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ControllerError, Result};
pub use ids::{
    ApplicationId, ApplicationName, DeploymentId, Environment, Hostname, InstanceName,
    RegionName, RevisionId, RotationId, TenantName, ZoneId,
};
pub use version::{ApplicationVersion, SourceRevision, Version};
