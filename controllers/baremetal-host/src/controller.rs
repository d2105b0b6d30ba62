//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the provisioning backend and the driver registry together and
//! runs the BareMetalHost watcher.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::watch_hosts;
use bmc::DriverRegistry;
use crds::BareMetalHost;
use ironic_client::IronicClient;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for BareMetalHost management.
#[derive(Debug)]
pub struct Controller {
    host_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching hosts.
    pub async fn new(config: &Config) -> Result<Self, ControllerError> {
        info!("Initializing BareMetalHost Controller");

        let kube_client = Client::try_default().await?;

        let ironic = IronicClient::new(
            config.ironic_endpoint.clone(),
            config.ironic_auth.clone(),
            config.ironic.clone(),
        )?;

        let registry = DriverRegistry::with_default_drivers();
        info!("Registered BMC drivers: {}", registry.schemes().join(", "));

        let hosts: Api<BareMetalHost> = match &config.namespace {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let reconciler = Arc::new(Reconciler::new(kube_client, Arc::new(ironic), registry));
        let concurrency = config.concurrency;
        let host_watcher = tokio::spawn(async move { watch_hosts(hosts, reconciler, concurrency).await });

        Ok(Self { host_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("BareMetalHost Controller running");

        self.host_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("BareMetalHost watcher panicked: {}", e)))??;

        Ok(())
    }
}
