//! Reconciliation of BareMetalHost resources.
//!
//! The reconciler resolves credentials, checks that the provisioning backend
//! is reachable, runs one state-machine pass and then applies what the pass
//! recorded: status, consumed annotations, finalizer removal and events.

use crate::action_result::ActionResult;
use crate::credentials::{self, BmcConnection};
use crate::error::{ControllerError, CredentialsError};
use crate::events::{EventSink, KubeEventSink};
use crate::host_state_machine::HostStateMachine;
use crate::reconcile_info::{HostEvent, ReconcileInfo};
use bmc::{Credentials, DriverRegistry};
use crds::{
    BAREMETALHOST_FINALIZER, BareMetalHost, BareMetalHostStatus, ErrorType, OperationalStatus,
    PAUSED_ANNOTATION, ProvisioningState,
};
use ironic_client::{HostData, ProvisionerTrait};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Retry delay after a host-level error that may fix itself
pub const HOST_ERROR_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Retry delay while the provisioning backend is unavailable
pub const PROVISIONER_NOT_READY_RETRY_DELAY: Duration = Duration::from_secs(30);

const CONTROLLER_NAME: &str = "baremetal-host-controller";

/// Reconciles BareMetalHost resources.
pub struct Reconciler {
    client: Client,
    prov: Arc<dyn ProvisionerTrait>,
    registry: DriverRegistry,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("drivers", &self.registry.schemes())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, prov: Arc<dyn ProvisionerTrait>, registry: DriverRegistry) -> Self {
        Self {
            events: Arc::new(KubeEventSink::new(client.clone(), CONTROLLER_NAME)),
            client,
            prov,
            registry,
        }
    }

    /// Reconcile one host.
    pub async fn reconcile_host(&self, host: &BareMetalHost) -> Result<Action, ControllerError> {
        let name = host.name_any();
        let namespace = host.namespace().unwrap_or_default();
        let api: Api<BareMetalHost> = Api::namespaced(self.client.clone(), &namespace);
        let writer = KubeHostWriter { api: api.clone() };

        debug!("Reconciling BareMetalHost {}/{}", namespace, name);

        if host.annotation(PAUSED_ANNOTATION).is_some() {
            info!("BareMetalHost {}/{} is paused, no work to do", namespace, name);
            return Ok(Action::await_change());
        }

        if !host.is_deleting() && !host.has_finalizer() {
            info!("adding finalizer to BareMetalHost {}/{}", namespace, name);
            let mut finalizers = host.finalizers().to_vec();
            finalizers.push(BAREMETALHOST_FINALIZER.to_string());
            api.patch(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({ "metadata": { "finalizers": finalizers } })),
            )
            .await?;
            return Ok(Action::requeue(Duration::ZERO));
        }

        let initial_state = host.status_or_default().provisioning.state;

        let connection = match initial_state {
            ProvisioningState::None | ProvisioningState::Unmanaged => None,
            _ => match credentials::build_and_validate(&self.client, &self.registry, host).await {
                Ok(connection) => Some(connection),
                Err(ControllerError::Credentials(e)) if host.is_deleting() => {
                    info!("BMC credentials unusable, continuing deletion without them: {}", e);
                    None
                }
                Err(ControllerError::Credentials(e)) => {
                    return credentials_error(&writer, self.events.as_ref(), host, e).await;
                }
                Err(e) => return Err(e),
            },
        };

        match self.prov.try_init().await {
            Ok(true) => {}
            Ok(false) => {
                info!("provisioner is not ready, retrying in {:?}", PROVISIONER_NOT_READY_RETRY_DELAY);
                return Ok(Action::requeue(PROVISIONER_NOT_READY_RETRY_DELAY));
            }
            Err(e) => {
                info!("provisioner is not ready ({}), retrying in {:?}", e, PROVISIONER_NOT_READY_RETRY_DELAY);
                return Ok(Action::requeue(PROVISIONER_NOT_READY_RETRY_DELAY));
            }
        }

        let have_creds = connection.is_some();
        let (host_data, credentials_status) = build_host_data(host, connection);
        let mut info = ReconcileInfo::new(host.clone(), credentials_status);
        let mut machine = HostStateMachine::new(self.prov.as_ref(), host_data, have_creds);

        let result = machine.reconcile_state(&mut info).await;
        debug!("BareMetalHost {}/{} pass finished with {}", namespace, name, result.kind());

        let dirty = result.dirty();
        let action = match result {
            ActionResult::Error(source) => {
                return Err(ControllerError::Action {
                    state: initial_state.as_str().to_string(),
                    source,
                });
            }
            other => other.into_action(&mut rand::thread_rng())?,
        };

        apply_pass(&writer, self.events.as_ref(), host, &mut info, dirty).await?;

        info!("BareMetalHost {}/{} done, requeue: {:?}", namespace, name, action);
        Ok(action)
    }
}

/// Writes host status and metadata back to the cluster.
#[async_trait::async_trait]
trait HostWriter: Send + Sync {
    async fn save_status(&self, host: &BareMetalHost, status: &mut BareMetalHostStatus) -> Result<(), ControllerError>;

    async fn patch_metadata(&self, host: &BareMetalHost, metadata: Value) -> Result<(), ControllerError>;
}

struct KubeHostWriter {
    api: Api<BareMetalHost>,
}

#[async_trait::async_trait]
impl HostWriter for KubeHostWriter {
    async fn save_status(&self, host: &BareMetalHost, status: &mut BareMetalHostStatus) -> Result<(), ControllerError> {
        status.last_updated = Some(chrono::Utc::now());

        let old = serde_json::to_value(host.status_or_default())?;
        let new = serde_json::to_value(&*status)?;
        let patch = json!({ "status": merge_patch(&old, &new) });

        self.api
            .patch_status(&host.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_metadata(&self, host: &BareMetalHost, metadata: Value) -> Result<(), ControllerError> {
        self.api
            .patch(
                &host.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&json!({ "metadata": metadata })),
            )
            .await?;
        Ok(())
    }
}

/// Apply what a pass recorded: status when dirty, then metadata, then events.
///
/// Events go out on every pass, dirty or not.
async fn apply_pass(
    writer: &dyn HostWriter,
    events: &dyn EventSink,
    host: &BareMetalHost,
    info: &mut ReconcileInfo,
    dirty: bool,
) -> Result<(), ControllerError> {
    if dirty {
        info!(
            "saving BareMetalHost {} status: operational status {:?}, provisioning state {:?}",
            host.name_any(),
            info.status.operational_status,
            info.status.provisioning.state.as_str()
        );
        writer.save_status(host, &mut info.status).await?;
    }
    if let Some(metadata) = metadata_patch(info) {
        writer.patch_metadata(host, metadata).await?;
    }
    events.publish(host, &info.events).await;
    Ok(())
}

/// Record a credentials problem on the host.
///
/// Only a missing Secret is retried; every other problem waits for the
/// host or the Secret to change. The warning event goes out either way.
async fn credentials_error(
    writer: &dyn HostWriter,
    events: &dyn EventSink,
    host: &BareMetalHost,
    err: CredentialsError,
) -> Result<Action, ControllerError> {
    let mut status = host.status_or_default();
    let changed = set_error_condition(&mut status, ErrorType::RegistrationError, &err.to_string());

    info!("BMC credentials problem on BareMetalHost {}: {}", host.name_any(), err);
    if changed {
        writer.save_status(host, &mut status).await?;
    }
    events
        .publish(
            host,
            &[HostEvent {
                reason: "BMCCredentialError".to_string(),
                message: err.to_string(),
                warning: true,
            }],
        )
        .await;

    if err.requeue() {
        return Ok(Action::requeue(HOST_ERROR_RETRY_DELAY));
    }
    Ok(Action::await_change())
}

/// Metadata merge patch for consumed annotations and finalizer removal.
fn metadata_patch(info: &ReconcileInfo) -> Option<Value> {
    let mut metadata = Map::new();

    if !info.removed_annotations.is_empty() {
        let annotations: Map<String, Value> = info
            .removed_annotations
            .iter()
            .map(|key| (key.clone(), Value::Null))
            .collect();
        metadata.insert("annotations".to_string(), Value::Object(annotations));
    }

    if info.finalizer_removed {
        let finalizers: Vec<&String> = info
            .host
            .finalizers()
            .iter()
            .filter(|f| *f != BAREMETALHOST_FINALIZER)
            .collect();
        metadata.insert("finalizers".to_string(), json!(finalizers));
    }

    (!metadata.is_empty()).then_some(Value::Object(metadata))
}

/// Backend identity of the host, and the credentials fingerprint if any.
fn build_host_data(
    host: &BareMetalHost,
    connection: Option<BmcConnection>,
) -> (HostData, Option<crds::CredentialsStatus>) {
    let (credentials, status, access) = match connection {
        Some(c) => (c.credentials, Some(c.status), Some(Arc::from(c.access))),
        None => (Credentials::default(), None, None),
    };
    let host_data = HostData {
        namespace: host.namespace().unwrap_or_default(),
        name: host.name_any(),
        uid: host.uid().unwrap_or_default(),
        provisioning_id: host.status_or_default().provisioning.id,
        boot_mac: host.boot_mac().map(str::to_string),
        credentials,
        bmc_access: access,
    };
    (host_data, status)
}

/// Record an error on a status, reporting whether anything changed.
fn set_error_condition(status: &mut BareMetalHostStatus, error_type: ErrorType, message: &str) -> bool {
    if status.operational_status == OperationalStatus::Error
        && status.error_type == Some(error_type)
        && status.error_message == message
    {
        return false;
    }
    status.operational_status = OperationalStatus::Error;
    status.error_type = Some(error_type);
    status.error_message = message.to_string();
    status.error_count += 1;
    true
}

/// JSON merge patch turning `old` into `new`.
///
/// Keys missing from `new` are nulled so stale nested fields are dropped.
fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, value) in new {
                match old.get(key) {
                    Some(previous) if previous == value => {}
                    Some(previous) => {
                        patch.insert(key.clone(), merge_patch(previous, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        statuses: Mutex<Vec<BareMetalHostStatus>>,
        metadata: Mutex<Vec<Value>>,
    }

    #[async_trait::async_trait]
    impl HostWriter for RecordingWriter {
        async fn save_status(&self, _host: &BareMetalHost, status: &mut BareMetalHostStatus) -> Result<(), ControllerError> {
            self.statuses.lock().unwrap().push(status.clone());
            Ok(())
        }

        async fn patch_metadata(&self, _host: &BareMetalHost, metadata: Value) -> Result<(), ControllerError> {
            self.metadata.lock().unwrap().push(metadata);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<HostEvent>>,
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, _host: &BareMetalHost, events: &[HostEvent]) {
            self.events.lock().unwrap().extend_from_slice(events);
        }
    }

    fn test_host() -> BareMetalHost {
        let mut host = BareMetalHost::new("host-0", crds::BareMetalHostSpec::default());
        host.metadata.namespace = Some("metal".to_string());
        host
    }

    #[test]
    fn test_merge_patch_nulls_removed_keys() {
        let old = json!({
            "provisioning": { "image": { "url": "http://a", "checksum": "abc" }, "id": "x" },
            "poweredOn": true
        });
        let new = json!({
            "provisioning": { "image": { "url": "http://b" }, "id": "x" },
            "poweredOn": true
        });
        assert_eq!(
            merge_patch(&old, &new),
            json!({ "provisioning": { "image": { "url": "http://b", "checksum": null } } }),
            "Unchanged keys should be left out and removed ones nulled"
        );
    }

    #[test]
    fn test_merge_patch_replaces_arrays_and_nulls() {
        let old = json!({ "hardware": { "nics": [1, 2] }, "errorType": "inspection error" });
        let new = json!({ "hardware": { "nics": [3] }, "errorType": null });
        assert_eq!(
            merge_patch(&old, &new),
            json!({ "hardware": { "nics": [3] }, "errorType": null })
        );
    }

    #[test]
    fn test_set_error_condition_counts_once() {
        let mut status = BareMetalHostStatus::default();
        assert!(set_error_condition(&mut status, ErrorType::RegistrationError, "No BMC CredentialsName defined"));
        assert!(!set_error_condition(&mut status, ErrorType::RegistrationError, "No BMC CredentialsName defined"));
        assert_eq!(status.error_count, 1, "Repeating the same error should not count again");
        assert_eq!(status.operational_status, OperationalStatus::Error);
    }

    #[test]
    fn test_build_host_data_without_connection() {
        let mut host = BareMetalHost::new("host-0", crds::BareMetalHostSpec::default());
        host.metadata.namespace = Some("metal".to_string());
        host.spec.boot_mac_address = Some("00:11:22:33:44:55".to_string());

        let (data, status) = build_host_data(&host, None);
        assert!(status.is_none());
        assert!(data.bmc_access.is_none());
        assert_eq!(data.node_name(), "metal~host-0");
        assert_eq!(data.boot_mac.as_deref(), Some("00:11:22:33:44:55"));
    }

    #[tokio::test]
    async fn test_apply_pass_publishes_events_when_not_dirty() {
        let host = test_host();
        let mut info = ReconcileInfo::new(host.clone(), None);
        info.events.push(HostEvent {
            reason: "InvalidAnnotationValue".to_string(),
            message: "could not parse reboot annotation".to_string(),
            warning: true,
        });
        let writer = RecordingWriter::default();
        let sink = RecordingSink::default();

        apply_pass(&writer, &sink, &host, &mut info, false).await.unwrap();

        assert!(writer.statuses.lock().unwrap().is_empty(), "A clean pass should not save status");
        assert!(writer.metadata.lock().unwrap().is_empty(), "Nothing consumed, nothing to patch");
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1, "Events of a clean pass should still be published");
        assert_eq!(events[0].reason, "InvalidAnnotationValue");
    }

    #[tokio::test]
    async fn test_apply_pass_saves_then_publishes_when_dirty() {
        let host = test_host();
        let mut info = ReconcileInfo::new(host.clone(), None);
        info.status.provisioning.state = ProvisioningState::Registering;
        info.events.push(HostEvent {
            reason: "Registered".to_string(),
            message: "Registered new host".to_string(),
            warning: false,
        });
        info.removed_annotations.insert("reboot.metal3.io".to_string());
        let writer = RecordingWriter::default();
        let sink = RecordingSink::default();

        apply_pass(&writer, &sink, &host, &mut info, true).await.unwrap();

        let statuses = writer.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1, "A dirty pass should save status once");
        assert_eq!(statuses[0].provisioning.state, ProvisioningState::Registering);
        assert!(statuses[0].last_updated.is_none(), "The recording writer does not stamp status");
        assert_eq!(
            writer.metadata.lock().unwrap().as_slice(),
            &[json!({ "annotations": { "reboot.metal3.io": null } })],
            "Consumed annotations should be removed"
        );
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credentials_error_publishes_before_requeue() {
        let host = test_host();
        let writer = RecordingWriter::default();
        let sink = RecordingSink::default();

        let action = credentials_error(&writer, &sink, &host, CredentialsError::ResolveBmcSecretRef)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(HOST_ERROR_RETRY_DELAY), "A missing Secret should be retried");
        let statuses = writer.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].error_type, Some(ErrorType::RegistrationError));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1, "The missing Secret should be reported as an event");
        assert_eq!(events[0].reason, "BMCCredentialError");
        assert!(events[0].warning);
        assert_eq!(events[0].message, "BMC CredentialsName secret doesn't exist");
    }

    #[tokio::test]
    async fn test_credentials_error_waits_for_change() {
        let mut host = test_host();
        let mut status = BareMetalHostStatus::default();
        set_error_condition(&mut status, ErrorType::RegistrationError, "Empty BMC address");
        host.status = Some(status);
        let writer = RecordingWriter::default();
        let sink = RecordingSink::default();

        let action = credentials_error(&writer, &sink, &host, CredentialsError::EmptyBmcAddress)
            .await
            .unwrap();

        assert_eq!(action, Action::await_change(), "An invalid host waits for an edit");
        assert!(writer.statuses.lock().unwrap().is_empty(), "The same error should not be saved again");
        assert_eq!(sink.events.lock().unwrap()[0].reason, "BMCCredentialError");
    }
}
