//! BareMetalHost Controller
//!
//! Drives bare-metal servers through their lifecycle against an Ironic
//! provisioning backend: registration, inspection, preparation (RAID and
//! firmware), provisioning, power management, deprovisioning and deletion.

mod action_result;
mod actions;
mod backoff;
mod config;
mod controller;
mod credentials;
mod error;
mod events;
mod host_state_machine;
mod reconcile_info;
mod reconciler;
mod watcher;


use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Both kube and reqwest need a process-wide rustls provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting BareMetalHost Controller");

    let config = Config::from_env()?;
    config.log();

    let controller = Controller::new(&config).await?;
    controller.run().await?;

    Ok(())
}
