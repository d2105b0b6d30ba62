//! Host provisioning state machine.
//!
//! One pass runs a fixed sequence of checks (capacity, deletion, detach,
//! registration) and then the handler for the host's current provisioning
//! state. Handlers pick the next state; the transition itself is applied
//! once at the end of the pass, after a final capacity check for states
//! that load the backend.

use crate::action_result::ActionResult;
use crate::reconcile_info::ReconcileInfo;
use crds::{
    DETACHED_ANNOTATION, DetachedAnnotationArguments, DetachedDeleteAction, ErrorType,
    OperationalStatus, ProvisioningState, custom_deploy_method, image_url,
};
use ironic_client::{HostData, ProvisionerTrait};
use tracing::{debug, info};

/// Failures tolerated before deletion moves on without the backend
const MAX_DELETE_ATTEMPTS: u32 = 3;

/// Drives one host through one reconcile pass.
pub struct HostStateMachine<'a> {
    pub(crate) prov: &'a dyn ProvisionerTrait,
    pub(crate) host_data: HostData,
    pub(crate) have_creds: bool,
    pub(crate) next_state: ProvisioningState,
}

impl std::fmt::Debug for HostStateMachine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStateMachine")
            .field("host", &self.host_data.node_name())
            .field("have_creds", &self.have_creds)
            .field("next_state", &self.next_state)
            .finish_non_exhaustive()
    }
}

impl<'a> HostStateMachine<'a> {
    pub fn new(prov: &'a dyn ProvisionerTrait, host_data: HostData, have_creds: bool) -> Self {
        Self {
            prov,
            host_data,
            have_creds,
            next_state: ProvisioningState::None,
        }
    }

    /// Run one pass for the host held by `info`.
    pub async fn reconcile_state(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let initial_state = info.status.provisioning.state;
        self.next_state = initial_state;

        let result = self.run_pass(initial_state, info).await;

        match self.update_host_state_from(initial_state, info).await {
            Some(overridden) => overridden,
            None => result,
        }
    }

    async fn run_pass(&mut self, initial_state: ProvisioningState, info: &mut ReconcileInfo) -> ActionResult {
        if let Some(result) = self.check_delayed_host(info).await {
            return result;
        }

        if self.check_initiate_delete(info) {
            info!("Initiating host deletion");
            return ActionResult::Complete;
        }

        if let Some(result) = self.check_detached_host(info).await {
            return result;
        }

        if let Some(result) = self.ensure_registered(info).await {
            return result;
        }

        self.handle_state(initial_state, info).await
    }

    async fn handle_state(&mut self, state: ProvisioningState, info: &mut ReconcileInfo) -> ActionResult {
        debug!("Running handler for state {:?}", state.as_str());
        match state {
            ProvisioningState::None => self.handle_none(info),
            ProvisioningState::Unmanaged => self.handle_unmanaged(info),
            ProvisioningState::Registering => self.handle_registering(info),
            ProvisioningState::Inspecting => self.handle_inspecting(info).await,
            ProvisioningState::ExternallyProvisioned => self.handle_externally_provisioned(info).await,
            ProvisioningState::Preparing => self.handle_preparing(info).await,
            ProvisioningState::Ready | ProvisioningState::Available => self.handle_available(info).await,
            ProvisioningState::Provisioning => self.handle_provisioning(info).await,
            ProvisioningState::Provisioned => self.handle_provisioned(info).await,
            ProvisioningState::Deprovisioning => self.handle_deprovisioning(info).await,
            ProvisioningState::PoweringOffBeforeDelete => self.handle_powering_off_before_delete(info).await,
            ProvisioningState::Deleting => self.action_deleting(info).await,
        }
    }

    /// Mark the host delayed when the backend is at capacity.
    async fn ensure_capacity(&self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        match self.prov.has_capacity(&self.host_data).await {
            Err(e) => Some(ActionResult::Error(e)),
            Ok(false) => Some(info.record_action_delayed()),
            Ok(true) => None,
        }
    }

    async fn update_host_state_from(
        &self,
        initial_state: ProvisioningState,
        info: &mut ReconcileInfo,
    ) -> Option<ActionResult> {
        if self.next_state == initial_state {
            return None;
        }

        if loads_backend(self.next_state)
            && let Some(result) = self.ensure_capacity(info).await
        {
            return Some(result);
        }

        info!(
            "changing provisioning state of {}: {:?} -> {:?}",
            self.host_data.node_name(),
            initial_state.as_str(),
            self.next_state.as_str()
        );
        info.status.provisioning.state = self.next_state;

        if matches!(
            self.next_state,
            ProvisioningState::Registering | ProvisioningState::Inspecting | ProvisioningState::Provisioning
        ) && update_boot_mode_status(info)
        {
            info!("saving boot mode {:?}", info.status.provisioning.boot_mode);
        }
        None
    }

    async fn check_delayed_host(&self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        if info.status.operational_status == OperationalStatus::Delayed {
            if let Some(result) = self.ensure_capacity(info).await {
                return Some(result);
            }
            // A slot is free again
            info.clear_error();
            return Some(ActionResult::update_now());
        }

        // A host may sit in a busy state before the backend counts it
        if loads_backend(info.status.provisioning.state) {
            return self.ensure_capacity(info).await;
        }
        None
    }

    fn check_initiate_delete(&mut self, info: &ReconcileInfo) -> bool {
        if !info.host.is_deleting() {
            return false;
        }

        let registration_failing = info.status.error_type == Some(ErrorType::RegistrationError)
            && info.status.error_count > MAX_DELETE_ATTEMPTS;

        match self.next_state {
            ProvisioningState::Registering | ProvisioningState::Unmanaged | ProvisioningState::None => {
                // Nothing to power off yet
                self.next_state = ProvisioningState::Deleting;
            }
            ProvisioningState::Provisioning | ProvisioningState::Provisioned => {
                if info.status.operational_status == OperationalStatus::Detached {
                    if delay_delete_for_detached_host(info) {
                        info!("Delaying detached host deletion");
                        return false;
                    }
                    // A detached host cannot be powered off
                    self.next_state = ProvisioningState::Deleting;
                } else {
                    self.next_state = ProvisioningState::Deprovisioning;
                }
            }
            ProvisioningState::Deprovisioning | ProvisioningState::PoweringOffBeforeDelete => {
                if registration_failing {
                    self.next_state = ProvisioningState::Deleting;
                    return true;
                }
                return false;
            }
            ProvisioningState::Deleting => return false,
            _ => self.next_state = ProvisioningState::PoweringOffBeforeDelete,
        }
        true
    }

    async fn check_detached_host(&mut self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        if info.host.annotation(DETACHED_ANNOTATION).is_some()
            && matches!(
                info.status.provisioning.state,
                ProvisioningState::Provisioned
                    | ProvisioningState::ExternallyProvisioned
                    | ProvisioningState::Ready
                    | ProvisioningState::Available
            )
        {
            return Some(self.detach_host(info).await);
        }

        if info.has_error_type(ErrorType::DetachError) {
            info.clear_error();
            info.status.error_count = 0;
            info!("removed detach error");
            return Some(ActionResult::update_now());
        }

        if info.status.operational_status == OperationalStatus::Detached {
            let status = if info.status.error_type.is_some() {
                OperationalStatus::Error
            } else {
                OperationalStatus::Ok
            };
            info.set_operational_status(status);
            info!("removed detached status");
            return Some(ActionResult::update_now());
        }
        None
    }

    async fn ensure_registered(&mut self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        // Without credentials registration would always fail; deletion goes on without it
        if !self.have_creds {
            return None;
        }

        if matches!(
            self.next_state,
            ProvisioningState::None | ProvisioningState::Unmanaged | ProvisioningState::Deleting
        ) {
            return None;
        }

        match self.register_host(info).await {
            Some(ActionResult::Complete) => Some(ActionResult::update_now()),
            other => other,
        }
    }

    fn handle_none(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if info.host.has_bmc_details() {
            self.next_state = ProvisioningState::Registering;
        } else {
            info.publish_event("Discovered", "Discovered host with no BMC details");
            info.set_operational_status(OperationalStatus::Discovered);
            self.next_state = ProvisioningState::Unmanaged;
        }
        ActionResult::Complete
    }

    fn handle_unmanaged(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let result = self.action_unmanaged(info);
        if result.is_complete() {
            self.next_state = ProvisioningState::Registering;
        }
        result
    }

    fn handle_registering(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        // Reaching the handler means registration with the current
        // credentials worked. Credential changes later re-register in place.
        self.next_state = if info.host.spec.externally_provisioned {
            ProvisioningState::ExternallyProvisioned
        } else if info.host.inspection_disabled() {
            ProvisioningState::Preparing
        } else {
            ProvisioningState::Inspecting
        };
        info.status.error_count = 0;
        ActionResult::Complete
    }

    async fn handle_inspecting(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let result = self.action_inspecting(info).await;
        if result.is_complete() {
            self.next_state = ProvisioningState::Preparing;
            info.status.error_count = 0;
        }
        result
    }

    async fn handle_externally_provisioned(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if info.host.spec.externally_provisioned {
            return self.action_manage_steady_state(info).await;
        }

        self.next_state = if needs_hardware_inspection(info) && !info.host.inspection_disabled() {
            ProvisioningState::Inspecting
        } else {
            ProvisioningState::Preparing
        };
        ActionResult::Complete
    }

    async fn handle_preparing(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let result = self.action_preparing(info).await;
        if result.is_complete() {
            info.status.error_count = 0;
            self.next_state = ProvisioningState::Available;
        }
        result
    }

    async fn handle_available(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if info.host.spec.externally_provisioned {
            self.next_state = ProvisioningState::ExternallyProvisioned;
            crate::actions::clear_host_provisioning_settings(&mut info.status);
            return ActionResult::Complete;
        }

        if info.host.inspection_requested() {
            self.next_state = ProvisioningState::Inspecting;
            return ActionResult::Complete;
        }

        let (dirty, _) = crate::actions::host_provisioning_settings(info);
        if dirty {
            self.next_state = ProvisioningState::Preparing;
            return ActionResult::Complete;
        }

        let result = self.action_manage_available(info).await;
        if result.is_complete() {
            self.next_state = ProvisioningState::Provisioning;
        }
        result
    }

    async fn handle_provisioning(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if info.status.error_type.is_some() || provisioning_cancelled(info) {
            self.next_state = ProvisioningState::Deprovisioning;
            return ActionResult::Complete;
        }

        let result = self.action_provisioning(info).await;
        if result.is_complete() {
            self.next_state = ProvisioningState::Provisioned;
            info.status.error_count = 0;
        }
        result
    }

    async fn handle_provisioned(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if provisioning_cancelled(info) {
            self.next_state = ProvisioningState::Deprovisioning;
            return ActionResult::Complete;
        }
        self.action_manage_steady_state(info).await
    }

    async fn handle_deprovisioning(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let result = self.action_deprovisioning(info).await;

        if !info.host.is_deleting() {
            if result.is_complete() {
                self.next_state = ProvisioningState::Available;
                info.status.error_count = 0;
            }
            return result;
        }

        if result.is_complete() {
            self.next_state = ProvisioningState::PoweringOffBeforeDelete;
            info.status.error_count = 0;
        } else if result.failed_count().is_some_and(|count| count > MAX_DELETE_ATTEMPTS) {
            info!(
                "Giving up on host clean up after 3 attempts. The host may still be operational \
                 and cause issues in your clusters. You should clean it up manually now."
            );
            self.next_state = ProvisioningState::PoweringOffBeforeDelete;
            return ActionResult::Complete;
        } else if result.needs_registration() && !self.have_creds {
            // Not registered and no way to register: nothing to clean
            self.next_state = ProvisioningState::Deleting;
            return ActionResult::Complete;
        }
        result
    }

    async fn handle_powering_off_before_delete(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let result = self.action_power_off_before_deleting(info).await;

        if result.is_complete() {
            self.next_state = ProvisioningState::Deleting;
            info.status.error_count = 0;
            info.status.powered_on = false;
        } else if result.failed_count().is_some_and(|count| count > MAX_DELETE_ATTEMPTS)
            || (result.needs_registration() && !self.have_creds)
        {
            info!("Giving up on host power off, moving on to deletion");
            self.next_state = ProvisioningState::Deleting;
            return ActionResult::Complete;
        }
        result
    }
}

/// States whose entry is limited by backend capacity.
fn loads_backend(state: ProvisioningState) -> bool {
    matches!(
        state,
        ProvisioningState::Inspecting | ProvisioningState::Provisioning | ProvisioningState::Deprovisioning
    )
}

fn update_boot_mode_status(info: &mut ReconcileInfo) -> bool {
    let boot_mode = info.host.spec.boot_mode;
    if info.status.provisioning.boot_mode == boot_mode {
        return false;
    }
    info.status.provisioning.boot_mode = boot_mode;
    true
}

/// Whether deletion waits while the host is detached.
///
/// A detached host whose annotation is gone may be re-attached, so its
/// deletion waits too. An unparsable annotation does not delay.
fn delay_delete_for_detached_host(info: &ReconcileInfo) -> bool {
    match info.host.annotation(DETACHED_ANNOTATION) {
        None => info.status.operational_status == OperationalStatus::Detached,
        Some(value) => serde_json::from_str::<DetachedAnnotationArguments>(value)
            .is_ok_and(|args| args.delete_action == DetachedDeleteAction::Delay),
    }
}

/// True once something else already runs on the host or it has no inventory.
fn needs_hardware_inspection(info: &ReconcileInfo) -> bool {
    if info.host.spec.externally_provisioned || was_provisioned(info) {
        return false;
    }
    info.status.hardware.is_none()
}

fn was_provisioned(info: &ReconcileInfo) -> bool {
    image_url(info.status.provisioning.image.as_ref()).is_some()
        || custom_deploy_method(info.status.provisioning.custom_deploy.as_ref()).is_some()
}

/// Whether the deployed image or custom deploy no longer matches the spec.
pub(crate) fn provisioning_cancelled(info: &ReconcileInfo) -> bool {
    let spec = &info.host.spec;
    let provisioning = &info.status.provisioning;
    let status_image = image_url(provisioning.image.as_ref());
    let status_method = custom_deploy_method(provisioning.custom_deploy.as_ref());

    if let Some(spec_method) = custom_deploy_method(spec.custom_deploy.as_ref()) {
        if status_method.is_some_and(|m| m != spec_method) {
            return true;
        }
        // Same custom deploy; only an image that went away or changed matters
        return status_image.is_some() && image_url(spec.image.as_ref()) != status_image;
    }
    if status_method.is_some() {
        return true;
    }

    image_provisioning_cancelled(info)
}

fn image_provisioning_cancelled(info: &ReconcileInfo) -> bool {
    let Some(spec_url) = image_url(info.host.spec.image.as_ref()) else {
        return true;
    };
    match image_url(info.status.provisioning.image.as_ref()) {
        None => false,
        Some(status_url) => spec_url != status_url,
    }
}
