use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_controller::bootstrap::{BootstrapCoordinator, HealthState, StatusServer};
use fleet_controller::controller::{ApplicationController, ControllerParts};
use fleet_controller::store::{FileEntityStore, FileVersionStore, VersionState};
use fleet_controller::{BootstrapOutcome, ControllerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleet-controller", version, about = "Hosted application control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until interrupted.
    Serve {
        /// JSON configuration file; defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Re-store every application in the current format and exit.
    RewriteAll {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Serve { config } => serve(load_config(config)?).await,
        Command::RewriteAll { config } => {
            let config = load_config(config)?;
            let controller = build_controller(&config).await?;
            let count = controller
                .rewrite_all()
                .await
                .context("failed to rewrite applications")?;
            info!(count, "rewrite finished");
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ControllerConfig::new(),
    }
    .with_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn build_controller(config: &ControllerConfig) -> Result<Arc<ApplicationController>> {
    let mut parts = ControllerParts::in_memory();
    parts.store = Arc::new(
        FileEntityStore::open(config.applications_dir())
            .await
            .with_context(|| format!("failed to open {}", config.applications_dir().display()))?,
    );
    for tenant in &config.tenants {
        parts
            .tenants
            .create(tenant.clone())
            .await
            .with_context(|| format!("failed to register tenant {}", tenant.name()))?;
    }
    Ok(Arc::new(ApplicationController::new(config, parts)))
}

async fn serve(config: ControllerConfig) -> Result<()> {
    let controller = build_controller(&config).await?;
    let version_state = VersionState::load(
        Arc::new(FileVersionStore::new(config.version_file())),
        config.system.controller_version.clone(),
    )
    .await
    .context("failed to read the stored controller version")?;

    let health = Arc::new(HealthState::new());
    let server = Arc::new(StatusServer::new(config.bind_addr.clone(), health.clone()));
    let coordinator = Arc::new(BootstrapCoordinator::new(
        controller,
        server,
        version_state,
        health,
        config.bootstrap.clone(),
    ));

    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        system = %config.system.name,
        "fleet controller starting"
    );

    match coordinator.launch().await.context("controller failed to start")? {
        Some(BootstrapOutcome::RedeployFailed { not_redeployed }) => {
            error!(count = not_redeployed.len(), "serving disabled until applications redeploy");
        }
        Some(BootstrapOutcome::Up { .. } | BootstrapOutcome::Stopped) | None => {}
    }

    shutdown_signal().await;
    coordinator.shutdown().await.context("shutdown failed")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleet_controller=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
