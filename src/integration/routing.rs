use crate::core::DeploymentId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

/// An endpoint the routing layer has set up for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEndpoint {
    /// Full URL of the endpoint.
    pub endpoint: String,
    /// Host serving it.
    pub hostname: String,
    /// Whether this is the deployment's leg of a global rotation.
    pub global: bool,
}

impl RoutingEndpoint {
    pub fn new(endpoint: impl Into<String>, hostname: impl Into<String>, global: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            hostname: hostname.into(),
            global,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("routing generator failed: {0}")]
pub struct RoutingError(pub String);

#[async_trait]
pub trait RoutingGenerator: Send + Sync {
    async fn endpoints(&self, deployment: &DeploymentId) -> Result<Vec<RoutingEndpoint>, RoutingError>;
}

#[derive(Debug, Default)]
pub struct MemoryRoutingGenerator {
    endpoints: RwLock<BTreeMap<DeploymentId, Vec<RoutingEndpoint>>>,
    unavailable: AtomicBool,
}

impl MemoryRoutingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_endpoints(&self, deployment: DeploymentId, endpoints: Vec<RoutingEndpoint>) {
        self.endpoints.write().await.insert(deployment, endpoints);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoutingGenerator for MemoryRoutingGenerator {
    async fn endpoints(&self, deployment: &DeploymentId) -> Result<Vec<RoutingEndpoint>, RoutingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RoutingError("routing generator is down".to_string()));
        }
        Ok(self
            .endpoints
            .read()
            .await
            .get(deployment)
            .cloned()
            .unwrap_or_default())
    }
}
