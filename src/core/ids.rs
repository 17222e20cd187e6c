// ============================================================================
// Identifiers
// ============================================================================

use super::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Name of a tenant owning applications.
    TenantName
);
string_id!(ApplicationName);
string_id!(
    /// Instance of an application. Only `default` is created through the controller.
    InstanceName
);
string_id!(RegionName);
string_id!(
    /// Identifier of a global rotation in the pool.
    RotationId
);
string_id!(
    /// Identity of an activated application package (its content hash).
    RevisionId
);
string_id!(Hostname);

impl InstanceName {
    pub fn default_instance() -> Self {
        Self("default".to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }

    /// Tester instances are reserved for the pipeline's test runners.
    pub fn is_tester(&self) -> bool {
        self.0.ends_with("-t")
    }
}

/// Globally unique key of an application: (tenant, application, instance).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    pub tenant: TenantName,
    pub application: ApplicationName,
    pub instance: InstanceName,
}

impl ApplicationId {
    pub fn new(
        tenant: impl Into<String>,
        application: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            tenant: TenantName::new(tenant),
            application: ApplicationName::new(application),
            instance: InstanceName::new(instance),
        }
    }

    pub fn default_instance(tenant: impl Into<String>, application: impl Into<String>) -> Self {
        Self::new(tenant, application, "default")
    }

    /// Id of the tester application paired with this one.
    pub fn tester(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            application: self.application.clone(),
            instance: InstanceName::new(format!("{}-t", self.instance)),
        }
    }

    /// The same id with dashes in the application name replaced by underscores.
    pub fn dash_to_underscore(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            application: ApplicationName::new(self.application.as_str().replace('-', "_")),
            instance: self.instance.clone(),
        }
    }

    /// Colon separated form, safe for file names and log fields.
    pub fn serialized_form(&self) -> String {
        format!("{}:{}:{}", self.tenant, self.application, self.instance)
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.tenant, self.application, self.instance)
    }
}

impl FromStr for ApplicationId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [tenant, application, instance]
                if !tenant.is_empty() && !application.is_empty() && !instance.is_empty() =>
            {
                Ok(Self::new(*tenant, *application, *instance))
            }
            _ => Err(ControllerError::invalid(format!(
                "Application ids must be on the form 'tenant:application:instance', but was '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Staging,
    Dev,
    Perf,
    Prod,
}

impl Environment {
    /// Environments where users deploy by hand rather than through the pipeline.
    pub fn is_manually_deployed(self) -> bool {
        matches!(self, Self::Dev | Self::Perf)
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Prod)
    }

    pub fn value(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Dev => "dev",
            Self::Perf => "perf",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

impl FromStr for Environment {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "staging" => Ok(Self::Staging),
            "dev" => Ok(Self::Dev),
            "perf" => Ok(Self::Perf),
            "prod" => Ok(Self::Prod),
            other => Err(ControllerError::invalid(format!("Unknown environment '{other}'"))),
        }
    }
}

/// An execution zone: environment plus region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneId {
    pub environment: Environment,
    pub region: RegionName,
}

impl ZoneId {
    pub fn new(environment: Environment, region: impl Into<String>) -> Self {
        Self {
            environment,
            region: RegionName::new(region),
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.environment, self.region)
    }
}

impl FromStr for ZoneId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (environment, region) = s
            .split_once('.')
            .ok_or_else(|| ControllerError::invalid(format!("Invalid zone id '{s}'")))?;
        if region.is_empty() {
            return Err(ControllerError::invalid(format!("Invalid zone id '{s}'")));
        }
        Ok(Self::new(environment.parse()?, region))
    }
}

impl TryFrom<String> for ZoneId {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ZoneId> for String {
    fn from(value: ZoneId) -> Self {
        value.to_string()
    }
}

/// Key used when talking to a zone's runtime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeploymentId {
    pub application: ApplicationId,
    pub zone: ZoneId,
}

impl DeploymentId {
    pub fn new(application: ApplicationId, zone: ZoneId) -> Self {
        Self { application, zone }
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.application, self.zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_id_round_trips_through_its_string_form() {
        let zone: ZoneId = "prod.us-east-3".parse().unwrap();
        assert_eq!(zone, ZoneId::new(Environment::Prod, "us-east-3"));
        assert_eq!(zone.to_string(), "prod.us-east-3");
        assert!("prod".parse::<ZoneId>().is_err());
        assert!("moon.base".parse::<ZoneId>().is_err());
    }

    #[test]
    fn tester_and_default_instances() {
        let id = ApplicationId::default_instance("tenant1", "app-one");
        assert!(id.instance.is_default());
        assert!(!id.instance.is_tester());
        assert!(id.tester().instance.is_tester());
        assert_eq!(id.dash_to_underscore().application.as_str(), "app_one");
    }

    #[test]
    fn application_id_parses_serialized_form() {
        let id = ApplicationId::new("t", "a", "i");
        assert_eq!(id.serialized_form().parse::<ApplicationId>().unwrap(), id);
        assert!("t:a".parse::<ApplicationId>().is_err());
    }

    #[test]
    fn manually_deployed_environments() {
        assert!(Environment::Dev.is_manually_deployed());
        assert!(Environment::Perf.is_manually_deployed());
        assert!(!Environment::Prod.is_manually_deployed());
        assert!(Environment::Prod.is_production());
    }
}
