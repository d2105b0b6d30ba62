//! BareMetalHost watcher.
//!
//! Runs the kube_runtime `Controller` over BareMetalHost resources, which
//! handles reconnection, requeues and the per-host worker limit.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::BareMetalHost;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Delay before retrying a host whose pass failed on the transport channel
const ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Watch BareMetalHosts and reconcile them until the stream ends.
///
/// At most `concurrency` hosts are reconciled at once; the same host is
/// never reconciled twice concurrently.
pub async fn watch_hosts(
    api: Api<BareMetalHost>,
    reconciler: Arc<Reconciler>,
    concurrency: u16,
) -> Result<(), ControllerError> {
    info!("Starting BareMetalHost watcher");

    let error_policy = |host: Arc<BareMetalHost>, error: &ControllerError, _ctx: Arc<Reconciler>| {
        error!("Reconciliation error for BareMetalHost {}: {}", host.name_any(), error);
        Action::requeue(ERROR_REQUEUE_DELAY)
    };

    let reconcile = |host: Arc<BareMetalHost>, ctx: Arc<Reconciler>| async move {
        ctx.reconcile_host(&host).await
    };

    // Short debounce batches the burst of events our own patches cause
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled BareMetalHost {}", obj.name),
                Err(e) => error!("Controller error for BareMetalHost: {}", e),
            }
        })
        .await;

    Ok(())
}
