//! Collaborators the controller talks to, each behind a narrow trait with an in-memory fake.

pub mod artifacts;
pub mod identity;
pub mod name_service;
pub mod routing;
pub mod zone_runtime;
pub mod zones;

pub use artifacts::{ArtifactError, ArtifactResolver, ArtifactStore, MemoryArtifactStore};
pub use identity::{AccessToken, IdentityError, IdentityProvider, MemoryIdentityProvider};
pub use name_service::{
    MemoryNameService, NameService, NameServiceError, Record, RecordId, RecordType,
};
pub use routing::{MemoryRoutingGenerator, RoutingEndpoint, RoutingError, RoutingGenerator};
pub use zone_runtime::{
    ActivePackage, ConfigChangeActions, DeployOptions, EndpointStatus, LogEntry,
    MemoryZoneRuntime, Node, NodeState, PrepareResponse, PreparedActivation, RotationStatus,
    ZoneRuntimeClient, ZoneRuntimeError, ZoneRuntimeResult,
};
pub use zones::ZoneRegistry;
