use crate::core::{ApplicationName, ControllerError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;

/// Bearer token from the identity provider, proving the caller may administer a domain.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<IdentityError> for ControllerError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(message) => ControllerError::invalid(message),
            IdentityError::Unavailable(message) => ControllerError::RemoteExecution {
                deployment: "identity provider".to_string(),
                message,
            },
        }
    }
}

pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

/// Registers applications under the identity domain of their tenant.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn add_application(
        &self,
        domain: &str,
        application: &ApplicationName,
        token: &AccessToken,
    ) -> IdentityResult<()>;

    async fn delete_application(
        &self,
        domain: &str,
        application: &ApplicationName,
        token: &AccessToken,
    ) -> IdentityResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    applications: RwLock<BTreeSet<(String, ApplicationName)>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_registered(&self, domain: &str, application: &ApplicationName) -> bool {
        self.applications
            .read()
            .await
            .contains(&(domain.to_string(), application.clone()))
    }

    fn check_token(token: &AccessToken) -> IdentityResult<()> {
        if token.as_str().is_empty() {
            return Err(IdentityError::Rejected("empty access token".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn add_application(
        &self,
        domain: &str,
        application: &ApplicationName,
        token: &AccessToken,
    ) -> IdentityResult<()> {
        Self::check_token(token)?;
        self.applications
            .write()
            .await
            .insert((domain.to_string(), application.clone()));
        Ok(())
    }

    async fn delete_application(
        &self,
        domain: &str,
        application: &ApplicationName,
        token: &AccessToken,
    ) -> IdentityResult<()> {
        Self::check_token(token)?;
        let removed = self
            .applications
            .write()
            .await
            .remove(&(domain.to_string(), application.clone()));
        if !removed {
            return Err(IdentityError::Rejected(format!(
                "application '{application}' is not registered in '{domain}'"
            )));
        }
        Ok(())
    }
}
