use super::Rotation;
use crate::core::ApplicationId;
use crate::integration::{NameService, NameServiceError, RecordType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Domains the three global DNS name forms are placed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalDnsDomains {
    pub primary: String,
    pub secure: String,
    pub alternate: String,
}

impl Default for GlobalDnsDomains {
    fn default() -> Self {
        Self {
            primary: "global.apps.internal".to_string(),
            secure: "global.apps.cloud".to_string(),
            alternate: "global.apps.cloud".to_string(),
        }
    }
}

/// The public names of an application's global endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDnsName {
    application: ApplicationId,
    domains: GlobalDnsDomains,
}

impl GlobalDnsName {
    pub fn new(application: &ApplicationId, domains: &GlobalDnsDomains) -> Self {
        Self {
            application: application.clone(),
            domains: domains.clone(),
        }
    }

    fn instance_prefix(&self) -> String {
        if self.application.instance.is_default() {
            String::new()
        } else {
            format!("{}--", self.application.instance)
        }
    }

    /// `app--tenant.<primary>`
    pub fn dns_name(&self) -> String {
        format!(
            "{}{}--{}.{}",
            self.instance_prefix(),
            self.application.application,
            self.application.tenant,
            self.domains.primary
        )
    }

    /// `app--tenant.<secure>`
    pub fn secure_dns_name(&self) -> String {
        format!(
            "{}{}--{}.{}",
            self.instance_prefix(),
            self.application.application,
            self.application.tenant,
            self.domains.secure
        )
    }

    /// `app.tenant.<alternate>`
    pub fn alternate_dns_name(&self) -> String {
        format!(
            "{}{}.{}.{}",
            self.instance_prefix(),
            self.application.application,
            self.application.tenant,
            self.domains.alternate
        )
    }

    pub fn all(&self) -> [String; 3] {
        [
            self.dns_name(),
            self.secure_dns_name(),
            self.alternate_dns_name(),
        ]
    }
}

/// Points DNS names at rotations.
#[derive(Clone)]
pub struct NameRegistrar {
    name_service: Arc<dyn NameService>,
}

impl NameRegistrar {
    pub fn new(name_service: Arc<dyn NameService>) -> Self {
        Self { name_service }
    }

    /// Makes `dns_name` a CNAME for the rotation, creating or correcting records as needed.
    ///
    /// Failures are logged and otherwise ignored; the next deployment reconciles again.
    pub async fn register_rotation_in_dns(&self, rotation: &Rotation, dns_name: &str) {
        if let Err(err) = self.reconcile(rotation, dns_name).await {
            warn!(
                rotation = %rotation.id,
                dns_name,
                error = %err,
                "failed to register CNAME"
            );
        }
    }

    pub async fn register_all(&self, rotation: &Rotation, names: &GlobalDnsName) {
        for dns_name in names.all() {
            self.register_rotation_in_dns(rotation, &dns_name).await;
        }
    }

    async fn reconcile(&self, rotation: &Rotation, dns_name: &str) -> Result<(), NameServiceError> {
        let records = self
            .name_service
            .find_records(RecordType::Cname, dns_name)
            .await?;

        if records.is_empty() {
            let id = self.name_service.create_cname(dns_name, &rotation.name).await?;
            info!(record = %id, dns_name, target = %rotation.name, "registered CNAME");
            return Ok(());
        }

        for record in records.iter().filter(|record| record.data != rotation.name) {
            self.name_service.update_record(&record.id, &rotation.name).await?;
            info!(record = %record.id, dns_name, target = %rotation.name, "updated CNAME");
        }
        Ok(())
    }
}
