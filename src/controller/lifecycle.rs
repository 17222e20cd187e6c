use super::ApplicationController;
use crate::core::{ApplicationId, ControllerError, DeploymentId, Hostname, Result, ZoneId};
use crate::integration::{AccessToken, ZoneRuntimeError};
use crate::model::{Application, Change, Tenant};
use crate::store::{ApplicationLock, LockedApplication};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

lazy_static! {
    static ref APPLICATION_NAME: Regex =
        Regex::new("^[a-z0-9][a-z0-9_-]{0,63}$").expect("application name pattern compiles");
}

fn validate_application_name(name: &str) -> Result<()> {
    if APPLICATION_NAME.is_match(name) {
        return Ok(());
    }
    Err(ControllerError::invalid(format!(
        "Application name '{name}' must match {}",
        APPLICATION_NAME.as_str()
    )))
}

fn normalized(name: &str) -> String {
    name.replace('-', "_")
}

impl ApplicationController {
    /// Creates a new application for an existing tenant.
    ///
    /// Identity tenants must pass an access token, used to register the application
    /// with the identity provider.
    pub async fn create_application(
        &self,
        id: &ApplicationId,
        token: Option<&AccessToken>,
    ) -> Result<Application> {
        let lock = self.lock(id).await?;
        let locked = self.create_locked(id, token, lock).await?;
        Ok(locked.get().clone())
    }

    /// Creates and stores an application while the caller holds its lock.
    pub(super) async fn create_locked(
        &self,
        id: &ApplicationId,
        token: Option<&AccessToken>,
        lock: ApplicationLock,
    ) -> Result<LockedApplication> {
        if !id.instance.is_default() {
            return Err(ControllerError::invalid(
                "Only the instance name 'default' is supported at the moment",
            ));
        }
        if id.instance.is_tester() {
            return Err(ControllerError::invalid(format!("'{id}' is a tester application!")));
        }

        // Names differing only in dashes and underscores are created under one shared lock.
        let canonical = id.dash_to_underscore();
        let _twin_lock = if canonical != *id {
            Some(self.lock(&canonical).await?)
        } else {
            None
        };

        let siblings = self.as_list_for_tenant(&id.tenant).await?;
        if !siblings
            .iter()
            .any(|application| application.id.application == id.application)
        {
            validate_application_name(id.application.as_str())?;
        }

        let tenant = self.tenants.get(&id.tenant).await.ok_or_else(|| {
            ControllerError::not_found(format!(
                "Could not create '{id}': This tenant does not exist"
            ))
        })?;
        if self.get(id).await?.is_some() {
            return Err(ControllerError::invalid(format!(
                "Could not create '{id}': Application already exists"
            )));
        }
        let twin = siblings.iter().find(|application| {
            application.id.instance == id.instance
                && application.id.application != id.application
                && normalized(application.id.application.as_str())
                    == normalized(id.application.as_str())
        });
        if let Some(twin) = twin {
            return Err(ControllerError::invalid(format!(
                "Could not create '{id}': Application {} already exists",
                twin.id
            )));
        }

        match &tenant {
            Tenant::Identity { domain, .. } => {
                let token = token.ok_or_else(|| {
                    ControllerError::invalid(format!(
                        "Could not create '{id}': No access token provided"
                    ))
                })?;
                self.identity
                    .add_application(domain, &id.application, token)
                    .await?;
            }
            Tenant::User { .. } => {}
        }

        let locked = LockedApplication::new(Application::new(id.clone(), self.clock.now()), lock)?;
        self.store(&locked).await?;
        info!(application = %id, "created application");
        Ok(locked)
    }

    /// Deletes every instance of the application. None may have deployments.
    pub async fn delete_application(
        &self,
        id: &ApplicationId,
        token: Option<&AccessToken>,
    ) -> Result<()> {
        let instances: Vec<ApplicationId> = self
            .as_list_for_tenant(&id.tenant)
            .await?
            .into_iter()
            .map(|application| application.id)
            .filter(|instance| instance.application == id.application)
            .collect();
        if instances.is_empty() {
            return Err(ControllerError::not_found(format!(
                "Could not delete application '{id}': Application not found"
            )));
        }

        for instance in instances {
            let locked = self.lock_or_throw(&instance).await?;
            if !locked.get().deployments.is_empty() {
                return Err(ControllerError::invalid(format!(
                    "Could not delete '{}': It has active deployments",
                    locked.get()
                )));
            }

            let tenant = self.tenants.require(&instance.tenant).await?;
            match &tenant {
                Tenant::Identity { domain, .. } => {
                    let token = token.ok_or_else(|| {
                        ControllerError::invalid(format!(
                            "Could not delete '{}': No access token provided",
                            locked.get()
                        ))
                    })?;
                    if instance.instance.is_default() {
                        self.identity
                            .delete_application(domain, &instance.application, token)
                            .await?;
                    }
                }
                Tenant::User { .. } => {}
            }

            self.store.remove(&instance).await?;
            let application_store = self.artifacts.application_store();
            application_store.remove_all(&instance).await?;
            application_store.remove_all(&instance.tester()).await?;
            info!(application = %instance, "deleted application");
        }
        Ok(())
    }

    /// Deactivates the application in `zone` and forgets the deployment.
    pub async fn deactivate(&self, id: &ApplicationId, zone: &ZoneId) -> Result<()> {
        let locked = self.lock_or_throw(id).await?;
        let locked = self.deactivate_locked(locked, zone).await?;
        self.store(&locked).await
    }

    /// Deactivates without storing. A deployment already gone from the zone is fine.
    pub(super) async fn deactivate_locked(
        &self,
        application: LockedApplication,
        zone: &ZoneId,
    ) -> Result<LockedApplication> {
        let deployment = DeploymentId::new(application.id().clone(), zone.clone());
        match self.zone_runtime.deactivate(&deployment).await {
            Ok(()) | Err(ZoneRuntimeError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        info!(application = %application.id(), zone = %zone, "deactivated deployment");
        Ok(application.without_deployment_in(zone))
    }

    /// Whether the deployment is currently out of traffic. Unknown deployments are not suspended.
    pub async fn is_suspended(&self, deployment: &DeploymentId) -> Result<bool> {
        match self.zone_runtime.is_suspended(deployment).await {
            Ok(suspended) => Ok(suspended),
            Err(ZoneRuntimeError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Schedules a restart of all nodes in the deployment, or only of `hostname`.
    pub async fn restart(&self, deployment: &DeploymentId, hostname: Option<&Hostname>) -> Result<()> {
        self.zone_runtime
            .restart(deployment, hostname)
            .await
            .map_err(Into::into)
    }

    /// Replaces the change the application is rolling out.
    pub async fn force_change(&self, id: &ApplicationId, change: Change) -> Result<()> {
        if !change.is_present() {
            return Err(ControllerError::invalid(format!(
                "Cannot force an empty change on {id}"
            )));
        }
        let locked = self.lock_or_throw(id).await?;
        let locked = locked
            .with_change(change.clone())
            .with_outstanding_change(Change::empty());
        self.store(&locked).await?;
        info!(application = %id, change = %change, "forced change");
        Ok(())
    }

    /// Cancels the ongoing change, optionally keeping its application part.
    pub async fn cancel_change(&self, id: &ApplicationId, keep_application_change: bool) -> Result<()> {
        let locked = self.lock_or_throw(id).await?;
        let remaining = if keep_application_change {
            match &locked.get().change.application {
                Some(application) => Change::of_application(application.clone()),
                None => Change::empty(),
            }
        } else {
            Change::empty()
        };
        let locked = locked.with_change(remaining);
        self.store(&locked).await?;
        info!(application = %id, keep_application_change, "cancelled change");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_names() {
        assert!(validate_application_name("app1").is_ok());
        assert!(validate_application_name("my-app_2").is_ok());
        assert!(validate_application_name("App").is_err());
        assert!(validate_application_name("-app").is_err());
        assert!(validate_application_name("").is_err());
    }
}
