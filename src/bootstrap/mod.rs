//! Startup of the controller process: redeploy everything after an upgrade, then serve.
//!
//! The process reports `initializing` until every application has been redeployed on the
//! new version and the listener is running, and only then goes `up` and into rotation.

pub mod health;
pub mod policy;
pub mod redeploy;
pub mod server;

pub use health::{HealthState, ServiceStatus};
pub use policy::{BootstrapMode, BootstrapPolicy, RedeployFailurePolicy};
pub use redeploy::{ApplicationRedeployer, Redeployer};
pub use server::{RpcServer, StatusServer};

use crate::core::{ApplicationId, ControllerError, Result};
use crate::store::VersionState;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Serving. `redeployed` is whether this start followed an upgrade.
    Up { redeployed: bool },
    /// Gave up redeploying; the process stays `initializing` and never serves.
    RedeployFailed { not_redeployed: BTreeSet<ApplicationId> },
    /// Shut down before startup finished.
    Stopped,
}

pub struct BootstrapCoordinator {
    redeployer: Redeployer,
    server: Arc<dyn RpcServer>,
    version_state: VersionState,
    health: Arc<HealthState>,
    policy: BootstrapPolicy,
    server_task: Mutex<Option<JoinHandle<Result<()>>>>,
    background: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl BootstrapCoordinator {
    pub fn new(
        target: Arc<dyn ApplicationRedeployer>,
        server: Arc<dyn RpcServer>,
        version_state: VersionState,
        health: Arc<HealthState>,
        policy: BootstrapPolicy,
    ) -> Self {
        health.initializing();
        Self {
            redeployer: Redeployer::new(target, policy.clone()),
            server,
            version_state,
            health,
            policy,
            server_task: Mutex::new(None),
            background: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn status(&self) -> ServiceStatus {
        self.health.status()
    }

    pub fn version_state(&self) -> &VersionState {
        &self.version_state
    }

    pub fn not_redeployed(&self) -> BTreeSet<ApplicationId> {
        self.redeployer.not_redeployed()
    }

    /// Starts according to the configured mode.
    ///
    /// Returns the outcome only in inline mode; a background start reports through the
    /// health state.
    pub async fn launch(self: &Arc<Self>) -> Result<Option<BootstrapOutcome>> {
        match self.policy.mode {
            BootstrapMode::Inline => self.start().await.map(Some),
            BootstrapMode::Background => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move { this.run_in_background(stop_rx).await });
                *self.stop_tx.lock()? = Some(stop_tx);
                *self.background.lock()? = Some(handle);
                Ok(None)
            }
            BootstrapMode::InitializeOnly => Ok(None),
        }
    }

    /// Redeploys if the controller version changed, starts the listener, goes up, and
    /// finally records the running version.
    pub async fn start(&self) -> Result<BootstrapOutcome> {
        let upgraded = self.version_state.is_upgraded();
        if upgraded {
            info!(version = %self.version_state, "controller version changed, redeploying applications");
            let redeployed = match self.redeployer.redeploy_all().await {
                Ok(redeployed) => redeployed,
                Err(err) => {
                    error!(error = %err, "failed to list applications to redeploy");
                    false
                }
            };
            if self.redeployer.is_stopped() {
                info!("shutdown requested during startup");
                return Ok(BootstrapOutcome::Stopped);
            }
            if !redeployed {
                let not_redeployed = self.redeployer.not_redeployed();
                error!(
                    count = not_redeployed.len(),
                    applications = ?not_redeployed,
                    "applications were not redeployed"
                );
                match self.policy.on_redeploy_failure {
                    RedeployFailurePolicy::Exit => std::process::exit(1),
                    RedeployFailurePolicy::Continue => {
                        return Ok(BootstrapOutcome::RedeployFailed { not_redeployed });
                    }
                }
            }
        } else {
            info!(version = %self.version_state, "no version change, skipping redeploy");
        }

        if self.redeployer.is_stopped() {
            return Ok(BootstrapOutcome::Stopped);
        }
        self.start_server().await?;
        self.health.up();
        info!("controller is up");

        if upgraded {
            self.version_state.save_new_version().await?;
        }
        Ok(BootstrapOutcome::Up { redeployed: upgraded })
    }

    /// Goes down, stops the listener and waits for the startup task.
    pub async fn shutdown(&self) -> Result<()> {
        self.redeployer.stop();
        self.health.down();
        self.server.stop();
        let stop_tx = self.stop_tx.lock()?.take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        let server_task = self.server_task.lock()?.take();
        if let Some(handle) = server_task {
            match handle.await {
                Ok(result) => result?,
                Err(err) => warn!(error = %err, "listener task failed"),
            }
        }

        let background = self.background.lock()?.take();
        if let Some(handle) = background {
            if let Err(err) = handle.await {
                warn!(error = %err, "startup task failed");
            }
        }
        info!("controller shut down");
        Ok(())
    }

    async fn run_in_background(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        let outcome = tokio::select! {
            outcome = self.start() => outcome,
            _ = &mut stop_rx => return,
        };
        match outcome {
            Ok(BootstrapOutcome::Up { .. }) => {
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = sleep(SERVER_POLL_INTERVAL) => {
                            if !self.server.is_running() {
                                break;
                            }
                        }
                    }
                }
                self.health.down();
            }
            Ok(BootstrapOutcome::RedeployFailed { .. } | BootstrapOutcome::Stopped) => {}
            Err(err) => error!(error = %err, "controller failed to start"),
        }
    }

    async fn start_server(&self) -> Result<()> {
        let server = self.server.clone();
        let handle = tokio::spawn(async move { server.run().await });
        *self.server_task.lock()? = Some(handle);

        let deadline = Instant::now() + self.policy.server_start_timeout();
        while !self.server.is_running() {
            let finished = self
                .server_task
                .lock()?
                .take_if(|handle| handle.is_finished());
            if let Some(handle) = finished {
                return match handle.await {
                    Ok(Err(err)) => Err(err),
                    Ok(Ok(())) => Err(ControllerError::FatalStartup(
                        "listener stopped before it started serving".to_string(),
                    )),
                    Err(err) => Err(ControllerError::FatalStartup(err.to_string())),
                };
            }
            if Instant::now() >= deadline {
                return Err(ControllerError::FatalStartup(format!(
                    "listener did not start within {} ms",
                    self.policy.server_start_timeout_ms
                )));
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

impl Drop for BootstrapCoordinator {
    fn drop(&mut self) {
        self.redeployer.stop();
        self.server.stop();
        if let Ok(mut stop_tx) = self.stop_tx.lock() {
            if let Some(stop_tx) = stop_tx.take() {
                let _ = stop_tx.send(());
            }
        }
        if let Ok(mut background) = self.background.lock() {
            if let Some(handle) = background.take() {
                handle.abort();
            }
        }
    }
}
