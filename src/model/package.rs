use super::deployment_spec::{DeploymentSpec, ValidationOverrides};
use crate::core::{ControllerError, Result, RevisionId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Controller-visible metadata of a package document. Other keys belong to the zone runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_overrides: Option<ValidationOverrides>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub services: serde_json::Value,
}

/// An immutable application package as uploaded by a deployer or fetched from an artifact store.
#[derive(Debug, Clone)]
pub struct ApplicationPackage {
    content: Vec<u8>,
    hash: String,
    deployment_spec: Option<DeploymentSpec>,
    validation_overrides: Option<ValidationOverrides>,
}

impl ApplicationPackage {
    pub fn new(content: Vec<u8>) -> Result<Self> {
        let document: PackageDocument = serde_json::from_slice(&content).map_err(|err| {
            ControllerError::invalid(format!("Application package could not be parsed: {err}"))
        })?;
        let hash = format!("{:x}", Sha256::digest(&content));
        Ok(Self {
            content,
            hash,
            deployment_spec: document.deployment,
            validation_overrides: document.validation_overrides,
        })
    }

    pub fn from_document(document: &PackageDocument) -> Result<Self> {
        Self::new(serde_json::to_vec(document)?)
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn revision_id(&self) -> RevisionId {
        RevisionId::new(self.hash.clone())
    }

    /// Deployment specification, when the package declares one.
    pub fn deployment_spec(&self) -> Option<&DeploymentSpec> {
        self.deployment_spec.as_ref()
    }

    pub fn validation_overrides(&self) -> Option<&ValidationOverrides> {
        self.validation_overrides.as_ref()
    }

    /// Whether the package carries deployment metadata the controller should store.
    pub fn has_deployment_metadata(&self) -> bool {
        self.deployment_spec.is_some() || self.validation_overrides.is_some()
    }
}
