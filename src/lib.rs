// ============================================================================
// Fleet Controller Library
// ============================================================================
//
// Control plane for hosted applications: it owns the desired and actual deployment
// state of every application, guards every mutation with a per-application lock,
// drives packages into zones, assigns global rotations and redeploys everything
// after the controller itself is upgraded.

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod core;
pub mod integration;
pub mod model;
pub mod rotation;
pub mod store;

// Re-export main types for convenience
pub use bootstrap::{
    BootstrapCoordinator, BootstrapMode, BootstrapOutcome, BootstrapPolicy, HealthState,
    RedeployFailurePolicy, ServiceStatus, StatusServer,
};
pub use config::ControllerConfig;
pub use controller::{ActivateResult, ApplicationController, ControllerParts};
pub use crate::core::{
    ApplicationId, ApplicationVersion, ControllerError, DeploymentId, Environment, Result,
    Version, ZoneId,
};
pub use model::{Application, ApplicationPackage, Tenant};
pub use store::{LockedApplication, VersionState};
