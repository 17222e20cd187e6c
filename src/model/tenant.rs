use crate::core::{ControllerError, Result, TenantName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Tenants come in two kinds: those backed by an identity domain, and personal user tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Tenant {
    Identity { name: TenantName, domain: String },
    User { name: TenantName },
}

impl Tenant {
    pub fn identity(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self::Identity {
            name: TenantName::new(name),
            domain: domain.into(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::User {
            name: TenantName::new(name),
        }
    }

    pub fn name(&self) -> &TenantName {
        match self {
            Self::Identity { name, .. } | Self::User { name } => name,
        }
    }

    pub fn identity_domain(&self) -> Option<&str> {
        match self {
            Self::Identity { domain, .. } => Some(domain),
            Self::User { .. } => None,
        }
    }
}

/// Known tenants. Tenant management itself lives outside the controller; this is its read model.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: RwLock<BTreeMap<TenantName, Tenant>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, tenant: Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(tenant.name()) {
            return Err(ControllerError::invalid(format!(
                "Tenant '{}' already exists",
                tenant.name()
            )));
        }
        tenants.insert(tenant.name().clone(), tenant);
        Ok(())
    }

    pub async fn get(&self, name: &TenantName) -> Option<Tenant> {
        self.tenants.read().await.get(name).cloned()
    }

    pub async fn require(&self, name: &TenantName) -> Result<Tenant> {
        self.get(name)
            .await
            .ok_or_else(|| ControllerError::not_found(format!("Tenant '{name}' does not exist")))
    }

    pub async fn delete(&self, name: &TenantName) -> Result<Tenant> {
        self.tenants
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ControllerError::not_found(format!("Tenant '{name}' does not exist")))
    }

    pub async fn list(&self) -> Vec<Tenant> {
        self.tenants.read().await.values().cloned().collect()
    }
}
