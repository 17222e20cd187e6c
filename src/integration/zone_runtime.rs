use crate::core::{
    ApplicationId, ControllerError, DeploymentId, Hostname, Version, ZoneId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZoneRuntimeError {
    #[error("{0} not found in zone")]
    NotFound(DeploymentId),

    #[error("zone call for {deployment} failed: {message}")]
    Remote {
        deployment: DeploymentId,
        message: String,
    },
}

impl ZoneRuntimeError {
    pub fn remote(deployment: &DeploymentId, message: impl Into<String>) -> Self {
        Self::Remote {
            deployment: deployment.clone(),
            message: message.into(),
        }
    }
}

impl From<ZoneRuntimeError> for ControllerError {
    fn from(err: ZoneRuntimeError) -> Self {
        match err {
            ZoneRuntimeError::NotFound(deployment) => {
                ControllerError::not_found(format!("Deployment {deployment} not found"))
            }
            ZoneRuntimeError::Remote {
                deployment,
                message,
            } => ControllerError::RemoteExecution {
                deployment: deployment.to_string(),
                message,
            },
        }
    }
}

pub type ZoneRuntimeResult<T> = std::result::Result<T, ZoneRuntimeError>;

/// Options passed through to the zone when preparing a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    pub deploy_directly: bool,
    pub platform_version: Option<Version>,
    pub ignore_validation_errors: bool,
    pub deploy_current_version: bool,
}

impl DeployOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn directly() -> Self {
        Self {
            deploy_directly: true,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.platform_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: i64,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeActions {
    pub restart_actions: Vec<String>,
    pub refeed_actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub message: String,
    pub log: Vec<LogEntry>,
    pub config_change_actions: ConfigChangeActions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedActivation {
    pub prepare_response: PrepareResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Parked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: Hostname,
    pub state: NodeState,
    /// Platform version the node runs, if it has reported one.
    pub current_version: Option<Version>,
    pub wanted_version: Option<Version>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStatus {
    In,
    Out,
    Unknown,
}

/// Whether a global endpoint sends traffic to a deployment, and who decided so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub status: RotationStatus,
    pub reason: String,
    pub agent: String,
    pub epoch: i64,
}

impl EndpointStatus {
    pub fn new(
        status: RotationStatus,
        reason: impl Into<String>,
        agent: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            agent: agent.into(),
            epoch: at.timestamp(),
        }
    }
}

/// Client for the runtime of one or more execution zones.
#[async_trait]
pub trait ZoneRuntimeClient: Send + Sync {
    /// Uploads, prepares and activates a package for the deployment.
    async fn prepare_and_activate(
        &self,
        deployment: &DeploymentId,
        options: &DeployOptions,
        dns_aliases: &BTreeSet<String>,
        rotation_names: &BTreeSet<String>,
        package: &[u8],
    ) -> ZoneRuntimeResult<PreparedActivation>;

    /// Activates the package the zone already has active, on `platform`.
    async fn reactivate(&self, deployment: &DeploymentId, platform: &Version)
    -> ZoneRuntimeResult<()>;

    async fn deactivate(&self, deployment: &DeploymentId) -> ZoneRuntimeResult<()>;

    async fn is_suspended(&self, deployment: &DeploymentId) -> ZoneRuntimeResult<bool>;

    /// Schedules a restart of all nodes of the deployment, or only `hostname`.
    async fn restart(
        &self,
        deployment: &DeploymentId,
        hostname: Option<&Hostname>,
    ) -> ZoneRuntimeResult<()>;

    async fn list_nodes(
        &self,
        zone: &ZoneId,
        application: &ApplicationId,
        states: &[NodeState],
    ) -> ZoneRuntimeResult<Vec<Node>>;

    async fn global_rotation_status(
        &self,
        deployment: &DeploymentId,
        endpoint: &str,
    ) -> ZoneRuntimeResult<EndpointStatus>;

    async fn set_global_rotation_status(
        &self,
        deployment: &DeploymentId,
        endpoint: &str,
        status: &EndpointStatus,
    ) -> ZoneRuntimeResult<()>;
}

/// What a zone has active for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePackage {
    pub content: Vec<u8>,
    pub platform: Version,
    pub options: DeployOptions,
    pub dns_aliases: BTreeSet<String>,
    pub rotation_names: BTreeSet<String>,
    pub activations: u32,
}

#[derive(Debug, Default)]
struct ZoneState {
    active: BTreeMap<DeploymentId, ActivePackage>,
    nodes: BTreeMap<(ZoneId, ApplicationId), Vec<Node>>,
    suspended: BTreeSet<DeploymentId>,
    restarts: Vec<(DeploymentId, Option<Hostname>)>,
    rotation_status: BTreeMap<(DeploymentId, String), EndpointStatus>,
    failing: BTreeSet<ApplicationId>,
    failing_deployments: BTreeSet<DeploymentId>,
    remaining_failures: BTreeMap<ApplicationId, u32>,
}

/// In-process zone runtime that records what it is asked to do.
#[derive(Debug, Default)]
pub struct MemoryZoneRuntime {
    state: Mutex<ZoneState>,
    activation_delay: std::sync::Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryZoneRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every activation of `application` fails until [`Self::recover`] is called.
    pub async fn fail_always(&self, application: &ApplicationId) {
        self.state.lock().await.failing.insert(application.clone());
    }

    /// Every activation of this one deployment fails until [`Self::recover`] is called.
    pub async fn fail_deployment(&self, deployment: &DeploymentId) {
        self.state
            .lock()
            .await
            .failing_deployments
            .insert(deployment.clone());
    }

    /// The next `times` activations of `application` fail.
    pub async fn fail_times(&self, application: &ApplicationId, times: u32) {
        self.state
            .lock()
            .await
            .remaining_failures
            .insert(application.clone(), times);
    }

    pub async fn recover(&self, application: &ApplicationId) {
        let mut state = self.state.lock().await;
        state.failing.remove(application);
        state.remaining_failures.remove(application);
        state
            .failing_deployments
            .retain(|deployment| &deployment.application != application);
    }

    /// Activations take at least this long, so overlapping calls can be observed.
    pub fn set_activation_delay(&self, delay: Duration) {
        *self
            .activation_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Largest number of activations observed running at the same time.
    pub fn max_concurrent_activations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn active(&self, deployment: &DeploymentId) -> Option<ActivePackage> {
        self.state.lock().await.active.get(deployment).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn set_nodes(&self, zone: &ZoneId, application: &ApplicationId, nodes: Vec<Node>) {
        self.state
            .lock()
            .await
            .nodes
            .insert((zone.clone(), application.clone()), nodes);
    }

    pub async fn suspend(&self, deployment: &DeploymentId) {
        self.state.lock().await.suspended.insert(deployment.clone());
    }

    pub async fn restarts(&self) -> Vec<(DeploymentId, Option<Hostname>)> {
        self.state.lock().await.restarts.clone()
    }

    async fn check_failure(&self, deployment: &DeploymentId) -> ZoneRuntimeResult<()> {
        let mut state = self.state.lock().await;
        let application = &deployment.application;
        if state.failing.contains(application) || state.failing_deployments.contains(deployment) {
            return Err(ZoneRuntimeError::remote(deployment, "activation failed"));
        }
        if let Some(remaining) = state.remaining_failures.get_mut(application) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ZoneRuntimeError::remote(deployment, "activation failed"));
            }
        }
        Ok(())
    }

    async fn simulate_work(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self
            .activation_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ZoneRuntimeClient for MemoryZoneRuntime {
    async fn prepare_and_activate(
        &self,
        deployment: &DeploymentId,
        options: &DeployOptions,
        dns_aliases: &BTreeSet<String>,
        rotation_names: &BTreeSet<String>,
        package: &[u8],
    ) -> ZoneRuntimeResult<PreparedActivation> {
        self.simulate_work().await;
        self.check_failure(deployment).await?;

        let platform = options
            .platform_version
            .clone()
            .ok_or_else(|| ZoneRuntimeError::remote(deployment, "no platform version given"))?;

        let mut state = self.state.lock().await;
        let activations = state
            .active
            .get(deployment)
            .map(|active| active.activations + 1)
            .unwrap_or(1);
        state.active.insert(
            deployment.clone(),
            ActivePackage {
                content: package.to_vec(),
                platform: platform.clone(),
                options: options.clone(),
                dns_aliases: dns_aliases.clone(),
                rotation_names: rotation_names.clone(),
                activations,
            },
        );

        Ok(PreparedActivation {
            prepare_response: PrepareResponse {
                message: format!("Activated {deployment} on {platform}"),
                log: Vec::new(),
                config_change_actions: ConfigChangeActions::default(),
            },
        })
    }

    async fn reactivate(
        &self,
        deployment: &DeploymentId,
        platform: &Version,
    ) -> ZoneRuntimeResult<()> {
        self.simulate_work().await;
        self.check_failure(deployment).await?;

        let mut state = self.state.lock().await;
        let active = state
            .active
            .get_mut(deployment)
            .ok_or_else(|| ZoneRuntimeError::NotFound(deployment.clone()))?;
        active.platform = platform.clone();
        active.activations += 1;
        Ok(())
    }

    async fn deactivate(&self, deployment: &DeploymentId) -> ZoneRuntimeResult<()> {
        self.state
            .lock()
            .await
            .active
            .remove(deployment)
            .map(|_| ())
            .ok_or_else(|| ZoneRuntimeError::NotFound(deployment.clone()))
    }

    async fn is_suspended(&self, deployment: &DeploymentId) -> ZoneRuntimeResult<bool> {
        let state = self.state.lock().await;
        if !state.active.contains_key(deployment) {
            return Err(ZoneRuntimeError::NotFound(deployment.clone()));
        }
        Ok(state.suspended.contains(deployment))
    }

    async fn restart(
        &self,
        deployment: &DeploymentId,
        hostname: Option<&Hostname>,
    ) -> ZoneRuntimeResult<()> {
        self.state
            .lock()
            .await
            .restarts
            .push((deployment.clone(), hostname.cloned()));
        Ok(())
    }

    async fn list_nodes(
        &self,
        zone: &ZoneId,
        application: &ApplicationId,
        states: &[NodeState],
    ) -> ZoneRuntimeResult<Vec<Node>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .get(&(zone.clone(), application.clone()))
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|node| states.contains(&node.state))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn global_rotation_status(
        &self,
        deployment: &DeploymentId,
        endpoint: &str,
    ) -> ZoneRuntimeResult<EndpointStatus> {
        self.state
            .lock()
            .await
            .rotation_status
            .get(&(deployment.clone(), endpoint.to_string()))
            .cloned()
            .ok_or_else(|| ZoneRuntimeError::NotFound(deployment.clone()))
    }

    async fn set_global_rotation_status(
        &self,
        deployment: &DeploymentId,
        endpoint: &str,
        status: &EndpointStatus,
    ) -> ZoneRuntimeResult<()> {
        self.state
            .lock()
            .await
            .rotation_status
            .insert((deployment.clone(), endpoint.to_string()), status.clone());
        Ok(())
    }
}
