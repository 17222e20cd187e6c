use super::ApplicationController;
use crate::core::{ApplicationId, ControllerError, DeploymentId, Result, Version};
use crate::integration::{EndpointStatus, NodeState};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;
use url::Url;

impl ApplicationController {
    /// The oldest platform version on any active or reserved production node of the
    /// application, or the system version when there is none.
    pub async fn oldest_installed_platform(&self, id: &ApplicationId) -> Result<Version> {
        let Some(application) = self.get(id).await? else {
            return Ok(self.system_version.clone());
        };

        let mut oldest: Option<Version> = None;
        for deployment in application.production_deployments() {
            let nodes = self
                .zone_runtime
                .list_nodes(&deployment.zone, id, &[NodeState::Active, NodeState::Reserved])
                .await?;
            for version in nodes.into_iter().filter_map(|node| node.current_version) {
                if oldest.as_ref().is_none_or(|current| version < *current) {
                    oldest = Some(version);
                }
            }
        }
        Ok(oldest.unwrap_or_else(|| self.system_version.clone()))
    }

    /// Sets the status of the deployment in its global rotation.
    ///
    /// Returns the endpoints that were changed, which is empty when the deployment has no
    /// global endpoint.
    pub async fn set_global_rotation_status(
        &self,
        deployment: &DeploymentId,
        status: EndpointStatus,
    ) -> Result<Vec<String>> {
        let Some(endpoint) = self.canonical_global_endpoint(deployment).await? else {
            return Ok(Vec::new());
        };
        self.zone_runtime
            .set_global_rotation_status(deployment, &endpoint, &status)
            .await?;
        Ok(vec![endpoint])
    }

    /// Status of the deployment in its global rotation, keyed by endpoint.
    pub async fn global_rotation_status(
        &self,
        deployment: &DeploymentId,
    ) -> Result<BTreeMap<String, EndpointStatus>> {
        let mut result = BTreeMap::new();
        if let Some(endpoint) = self.canonical_global_endpoint(deployment).await? {
            let status = self
                .zone_runtime
                .global_rotation_status(deployment, &endpoint)
                .await?;
            result.insert(endpoint, status);
        }
        Ok(result)
    }

    /// The service endpoint the deployment's global rotation maps to, with the
    /// configured domain suffixes removed.
    ///
    /// A global endpoint is matched to the zone endpoint served by the same host.
    pub(super) async fn canonical_global_endpoint(
        &self,
        deployment: &DeploymentId,
    ) -> Result<Option<String>> {
        let endpoints = self.routing.endpoints(deployment).await.map_err(|err| {
            ControllerError::RemoteExecution {
                deployment: deployment.to_string(),
                message: err.to_string(),
            }
        })?;

        let mut global_hosts = HashSet::new();
        let mut canonical_by_host = HashMap::new();
        for endpoint in endpoints {
            let host = Url::parse(&endpoint.endpoint)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .ok_or_else(|| ControllerError::RemoteExecution {
                    deployment: deployment.to_string(),
                    message: format!(
                        "Unexpected endpoint '{}' returned from the routing generator",
                        endpoint.endpoint
                    ),
                })?;
            let canonical = self
                .endpoint_suffixes
                .iter()
                .fold(host, |host, suffix| host.replace(suffix.as_str(), ""));

            if endpoint.global {
                global_hosts.insert(endpoint.hostname.clone());
            } else {
                canonical_by_host.insert(endpoint.hostname.clone(), canonical);
            }

            if global_hosts.contains(&endpoint.hostname) {
                if let Some(canonical) = canonical_by_host.get(&endpoint.hostname) {
                    return Ok(Some(canonical.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Endpoints of the deployment, or `None` if the routing layer could not say.
    pub async fn deployment_endpoints(&self, deployment: &DeploymentId) -> Result<Option<Vec<Url>>> {
        let exists = match self.get(&deployment.application).await? {
            Some(application) => application.deployments.contains_key(&deployment.zone),
            None => deployment.application.instance.is_tester(),
        };
        if !exists {
            return Err(ControllerError::not_found(format!(
                "Deployment {deployment} does not exist"
            )));
        }

        let endpoints = match self.routing.endpoints(deployment).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                warn!(deployment = %deployment, error = %err, "failed to get endpoint information");
                return Ok(None);
            }
        };
        let parsed: std::result::Result<Vec<Url>, _> = endpoints
            .iter()
            .map(|endpoint| Url::parse(&endpoint.endpoint))
            .collect();
        match parsed {
            Ok(urls) => Ok(Some(urls)),
            Err(err) => {
                warn!(deployment = %deployment, error = %err, "routing generator returned an invalid endpoint");
                Ok(None)
            }
        }
    }
}
