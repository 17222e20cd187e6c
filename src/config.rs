use crate::bootstrap::BootstrapPolicy;
use crate::core::{ControllerError, Result, Version, ZoneId};
use crate::model::Tenant;
use crate::rotation::{GlobalDnsDomains, Rotation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DATA_DIR_ENV: &str = "FLEET_CONTROLLER_DATA_DIR";
pub const BIND_ADDR_ENV: &str = "FLEET_CONTROLLER_BIND_ADDR";

/// Identity and versions of the system this controller runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    /// Platform version deployed when nothing else is requested.
    pub version: Version,
    /// Version of the running controller, compared against the stored marker at startup.
    pub controller_version: Version,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            version: Version::new(7, 0, 0),
            controller_version: env!("CARGO_PKG_VERSION")
                .parse()
                .unwrap_or_else(|_| Version::new(0, 1, 0)),
        }
    }
}

/// Controller configuration
///
/// Loaded from a JSON file, then overridden from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub system: SystemConfig,

    /// Zones that exist in this system.
    pub zones: Vec<ZoneId>,

    /// Tenants known at startup.
    pub tenants: Vec<Tenant>,

    /// The rotation pool.
    pub rotations: Vec<Rotation>,

    pub dns: GlobalDnsDomains,

    /// Suffixes stripped from endpoint hosts to get canonical endpoint names.
    pub endpoint_suffixes: Vec<String>,

    /// Maximum time to wait for an application lock. Waits forever when unset.
    pub lock_timeout_ms: Option<u64>,

    pub bootstrap: BootstrapPolicy,

    /// Address of the status listener.
    pub bind_addr: String,

    /// Where applications and the version marker are stored.
    pub data_dir: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            zones: Vec::new(),
            tenants: Vec::new(),
            rotations: Vec::new(),
            dns: GlobalDnsDomains::default(),
            endpoint_suffixes: vec![".apps.internal".to_string(), ".apps.cloud".to_string()],
            lock_timeout_ms: None,
            bootstrap: BootstrapPolicy::default(),
            bind_addr: "127.0.0.1:19071".to_string(),
            data_dir: PathBuf::from("fleet-data"),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            ControllerError::Storage(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                err
            ))
        })?;
        serde_json::from_str(&content).map_err(|err| {
            ControllerError::Serialization(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                err
            ))
        })
    }

    /// Applies `FLEET_CONTROLLER_DATA_DIR` and `FLEET_CONTROLLER_BIND_ADDR` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup(BIND_ADDR_ENV).filter(|v| !v.is_empty()) {
            self.bind_addr = addr;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bootstrap.parallelism == 0 {
            return Err(ControllerError::invalid("bootstrap.parallelism must be at least 1"));
        }
        if let Some(rotation) = self.rotations.iter().find(|r| r.name.trim().is_empty()) {
            return Err(ControllerError::invalid(format!(
                "rotation {} has an empty DNS target",
                rotation.id
            )));
        }
        if self.bind_addr.trim().is_empty() {
            return Err(ControllerError::invalid("bind_addr must be set"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn applications_dir(&self) -> PathBuf {
        self.data_dir.join("applications")
    }

    pub fn version_file(&self) -> PathBuf {
        self.data_dir.join("controller.version")
    }

    pub fn with_zone(mut self, zone: ZoneId) -> Self {
        self.zones.push(zone);
        self
    }

    pub fn with_tenant(mut self, tenant: Tenant) -> Self {
        self.tenants.push(tenant);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotations.push(rotation);
        self
    }

    pub fn with_system_version(mut self, version: Version) -> Self {
        self.system.version = version;
        self
    }

    pub fn with_controller_version(mut self, version: Version) -> Self {
        self.system.controller_version = version;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_bootstrap(mut self, policy: BootstrapPolicy) -> Self {
        self.bootstrap = policy;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;
    use std::collections::HashMap;

    #[test]
    fn file_values_and_defaults_combine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        std::fs::write(
            &path,
            r#"{
                "system": { "version": "7.1" },
                "zones": ["prod.us-east-3", "test.us-east-1"],
                "tenants": [{ "kind": "identity", "name": "tenant1", "domain": "domain1" }],
                "rotations": [{ "id": "rotation-id-01", "name": "rotation-fqdn-01" }],
                "bootstrap": { "parallelism": 2, "mode": "inline" }
            }"#,
        )
        .unwrap();

        let config = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(config.system.version, Version::new(7, 1, 0));
        assert!(config.zones.contains(&ZoneId::new(Environment::Prod, "us-east-3")));
        assert_eq!(config.tenants, vec![Tenant::identity("tenant1", "domain1")]);
        assert_eq!(config.bootstrap.parallelism, 2);
        assert_eq!(config.bootstrap.sleep_when_failing_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> =
            HashMap::from([(DATA_DIR_ENV, "/var/fleet"), (BIND_ADDR_ENV, "0.0.0.0:8080")]);
        let config = ControllerConfig::new()
            .with_overrides(|key| env.get(key).map(|value| value.to_string()));
        assert_eq!(config.data_dir, PathBuf::from("/var/fleet"));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut config = ControllerConfig::new();
        config.bootstrap.parallelism = 0;
        assert!(config.validate().unwrap_err().is_invalid_argument());

        let config = ControllerConfig::new().with_rotation(Rotation::new("r1", " "));
        assert!(config.validate().is_err());
    }
}
