use crate::core::{Environment, RegionName, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A zone declared in a deployment specification. Non-production zones may omit the region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredZone {
    pub environment: Environment,
    #[serde(default)]
    pub region: Option<RegionName>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DeclaredZone {
    pub fn new(environment: Environment, region: Option<&str>) -> Self {
        Self {
            environment,
            region: region.map(RegionName::from),
            active: true,
        }
    }

    pub fn deploys_to(&self, environment: Environment, region: Option<&RegionName>) -> bool {
        if self.environment != environment {
            return false;
        }
        match region {
            None => true,
            Some(region) => self.region.as_ref() == Some(region),
        }
    }

    pub fn zone_id(&self) -> Option<ZoneId> {
        self.region
            .as_ref()
            .map(|region| ZoneId::new(self.environment, region.as_str()))
    }
}

impl fmt::Display for DeclaredZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}.{}", self.environment, region),
            None => write!(f, "{}", self.environment),
        }
    }
}

/// Declares where an application runs and under which constraints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Service id exposed through a global rotation, when the application wants one.
    #[serde(default)]
    pub global_service_id: Option<String>,
    #[serde(default)]
    pub zones: Vec<DeclaredZone>,
    /// Identity domain the application's services launch under.
    #[serde(default)]
    pub identity_domain: Option<String>,
}

impl DeploymentSpec {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn includes(&self, environment: Environment, region: Option<&RegionName>) -> bool {
        self.zones
            .iter()
            .any(|zone| zone.deploys_to(environment, region))
    }

    pub fn includes_zone(&self, zone: &ZoneId) -> bool {
        self.includes(zone.environment, Some(&zone.region))
    }

    pub fn production_zones(&self) -> impl Iterator<Item = &DeclaredZone> {
        self.zones
            .iter()
            .filter(|zone| zone.environment.is_production())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationId {
    DeploymentRemoval,
    GlobalEndpointChange,
    ClusterSizeReduction,
}

impl ValidationId {
    pub fn value(self) -> &'static str {
        match self {
            Self::DeploymentRemoval => "deployment-removal",
            Self::GlobalEndpointChange => "global-endpoint-change",
            Self::ClusterSizeReduction => "cluster-size-reduction",
        }
    }

    pub fn allow_message(self) -> String {
        format!(
            "To allow this, add a '{}' validation override to the application package",
            self.value()
        )
    }
}

impl fmt::Display for ValidationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// A time-bounded permission for an otherwise rejected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOverride {
    pub id: ValidationId,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationOverrides {
    overrides: Vec<ValidationOverride>,
}

impl ValidationOverrides {
    pub fn new(overrides: Vec<ValidationOverride>) -> Self {
        Self { overrides }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `id` is overridden and the override is still in effect at `now`.
    pub fn allows(&self, id: ValidationId, now: DateTime<Utc>) -> bool {
        self.overrides
            .iter()
            .any(|o| o.id == id && now < o.until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn includes_matches_environment_and_region() {
        let spec = DeploymentSpec {
            zones: vec![
                DeclaredZone::new(Environment::Test, None),
                DeclaredZone::new(Environment::Prod, Some("us-east-3")),
            ],
            ..DeploymentSpec::default()
        };
        assert!(spec.includes(Environment::Test, None));
        assert!(spec.includes_zone(&ZoneId::new(Environment::Prod, "us-east-3")));
        assert!(!spec.includes_zone(&ZoneId::new(Environment::Prod, "us-west-1")));
        assert_eq!(spec.production_zones().count(), 1);
    }

    #[test]
    fn overrides_expire() {
        let now = Utc::now();
        let overrides = ValidationOverrides::new(vec![ValidationOverride {
            id: ValidationId::DeploymentRemoval,
            until: now + Duration::days(1),
        }]);
        assert!(overrides.allows(ValidationId::DeploymentRemoval, now));
        assert!(!overrides.allows(ValidationId::DeploymentRemoval, now + Duration::days(2)));
        assert!(!overrides.allows(ValidationId::GlobalEndpointChange, now));
    }
}
