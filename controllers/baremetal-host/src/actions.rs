//! Backend actions run by the state machine.
//!
//! Each action calls one or two provisioner operations and maps the
//! [`OperationResult`] onto an [`ActionResult`]: transport failures become
//! `Error`, failures reported for the host are recorded on its status, and
//! pending work becomes `Continue`, or `Update` when status changed on the way.

use crate::action_result::ActionResult;
use crate::host_state_machine::HostStateMachine;
use crate::reconcile_info::ReconcileInfo;
use crds::{
    BareMetalHostStatus, ErrorType, OperationalStatus, ProvisioningState, RaidConfig, RebootMode,
    ServicingPolicy, custom_deploy_method, image_url, REBOOT_ANNOTATION_PREFIX,
    INSPECT_ANNOTATION,
};
use ironic_client::{
    AdoptData, InspectData, ManagementAccessData, OperationResult, PrepareData, ProvisionData,
    ServicingData,
};
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval for hosts waiting for BMC details or detached
pub const UNMANAGED_RETRY_DELAY: Duration = Duration::from_secs(600);

/// Poll interval for hosts in a steady state
pub const POWER_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before re-checking a host that just finished servicing
pub const SUB_RESOURCE_NOT_READY_RETRY_DELAY: Duration = Duration::from_secs(60);

const SOFT_POWER_OFF_FAILURE_PREFIX: &str =
    "Continuing with hard poweroff after soft poweroff fails. More details: ";

const NO_RAID_INTERFACE: &str = "no-raid";

/// `Update` when `dirty`, `Continue` otherwise.
fn pending(result: &OperationResult, dirty: bool) -> ActionResult {
    if dirty {
        ActionResult::Update(result.requeue_after)
    } else {
        ActionResult::Continue(result.requeue_after)
    }
}

impl HostStateMachine<'_> {
    /// Register the host with the backend, refreshing BMC settings.
    ///
    /// Returns `None` when nothing changed and the state handler may run.
    pub(crate) async fn register_host(&mut self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        let mut dirty = false;

        let credentials_changed = info.status.tried_credentials != info.credentials;
        if credentials_changed {
            info!("new credentials for {}", self.host_data.node_name());
            info.status.tried_credentials = info.credentials.clone();
            dirty = true;
        }

        if let Some(message) = self.raid_capability_error(info) {
            return Some(info.record_action_failure(ErrorType::RegistrationError, &message));
        }

        let data = ManagementAccessData {
            boot_mode: info.status.provisioning.boot_mode,
            automated_cleaning_mode: info.host.spec.automated_cleaning_mode,
            state: info.status.provisioning.state,
            operational_status: info.status.operational_status,
            current_image: current_image(info),
            has_custom_deploy: has_custom_deploy(info),
            cpu_architecture: info.host.spec.architecture.clone(),
            disable_power_off: info.host.spec.disable_power_off,
        };
        let restart = info.has_error_type(ErrorType::RegistrationError);

        let (result, provisioning_id) = match self
            .prov
            .register(&self.host_data, &data, credentials_changed, restart)
            .await
        {
            Ok(registered) => registered,
            Err(e) => return Some(ActionResult::Error(e)),
        };

        if result.is_failed() {
            return Some(info.record_action_failure(ErrorType::RegistrationError, &result.error_message));
        }

        if !provisioning_id.is_empty() && info.status.provisioning.id != provisioning_id {
            info!("setting provisioning id {}", provisioning_id);
            info.status.provisioning.id.clone_from(&provisioning_id);
            self.host_data.provisioning_id = provisioning_id;
            if info.status.provisioning.state == ProvisioningState::Preparing {
                clear_host_provisioning_settings(&mut info.status);
            }
            dirty = true;
        }

        if result.dirty {
            info!("host not ready");
            dirty |= info.clear_error();
            return Some(pending(&result, dirty));
        }

        if update_root_device_hints(info) {
            info!("updating root device hints");
            return Some(ActionResult::update_now());
        }

        let registered_new_credentials = info.status.good_credentials != info.credentials;
        if registered_new_credentials {
            info!("updating credentials success status fields");
            info.status.good_credentials = info.credentials.clone();
            info.publish_event("BMCAccessValidated", "Verified access to BMC");
            dirty = true;
        }

        if info.has_error_type(ErrorType::RegistrationError) || registered_new_credentials {
            info!("clearing previous error message");
            dirty |= info.clear_error();
        }

        dirty.then_some(ActionResult::Complete)
    }

    /// Hardware RAID on a driver without a RAID interface cannot work.
    fn raid_capability_error(&self, info: &ReconcileInfo) -> Option<String> {
        let access = self.host_data.bmc_access.as_ref()?;
        let wants_hardware_raid = info
            .host
            .spec
            .raid
            .as_ref()
            .is_some_and(|raid| !raid.hardware().is_empty());
        (wants_hardware_raid && access.raid_interface() == NO_RAID_INTERFACE)
            .then(|| format!("BMC driver {} does not support configuring RAID", access.bmc_type()))
    }

    pub(crate) fn action_unmanaged(&self, info: &ReconcileInfo) -> ActionResult {
        if info.host.has_bmc_details() {
            return ActionResult::Complete;
        }
        ActionResult::Continue(UNMANAGED_RETRY_DELAY)
    }

    pub(crate) async fn action_inspecting(&self, info: &mut ReconcileInfo) -> ActionResult {
        info!("inspecting hardware");

        if info.host.inspection_disabled() {
            info.publish_event("InspectionSkipped", "disabled by user");
            return ActionResult::Complete;
        }

        let refresh = info.host.inspection_requested();
        let (force_reboot, _) = info.reboot_requested(true);
        let data = InspectData {
            boot_mode: info.status.provisioning.boot_mode,
        };

        let inspected = match self
            .prov
            .inspect_hardware(
                &self.host_data,
                &data,
                info.has_error_type(ErrorType::InspectionError),
                refresh,
                force_reboot,
            )
            .await
        {
            Ok(inspected) => inspected,
            Err(e) => return ActionResult::Error(e),
        };

        let result = inspected.result;
        if result.is_failed() {
            return info.record_action_failure(ErrorType::InspectionError, &result.error_message);
        }

        if inspected.started {
            let mut removed = info.remove_annotation(INSPECT_ANNOTATION);
            removed |= info.clear_reboot_annotations();
            if removed {
                return ActionResult::continue_now();
            }
        }

        let Some(details) = inspected.details.filter(|_| !result.dirty) else {
            let dirty = info.clear_error();
            return pending(&result, dirty);
        };

        info.clear_error();
        info.status.hardware = Some(details);
        ActionResult::Complete
    }

    pub(crate) async fn action_preparing(&self, info: &mut ReconcileInfo) -> ActionResult {
        info!("preparing");

        let (mut unprepared, target) = host_provisioning_settings(info);
        let mut data = PrepareData {
            target_raid_config: target.provisioning.raid.clone(),
            actual_raid_config: info.status.provisioning.raid.clone(),
            root_device_hints: target.provisioning.root_device_hints.clone(),
            firmware_config: target.provisioning.firmware.clone(),
        };

        let restart = info.has_error_type(ErrorType::PreparationError);
        if restart {
            // The previous attempt may have left anything behind
            data.actual_raid_config = None;
            unprepared = true;
        }

        let (result, started) = match self
            .prov
            .prepare(&self.host_data, &data, unprepared, restart)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => return ActionResult::Error(e),
        };

        if result.is_failed() {
            if unprepared {
                clear_host_provisioning_settings(&mut info.status);
            }
            return info.record_action_failure(ErrorType::PreparationError, &result.error_message);
        }

        let mut dirty = false;
        if unprepared && started {
            info.status.provisioning.raid = target.provisioning.raid;
            info.status.provisioning.root_device_hints = target.provisioning.root_device_hints;
            info.status.provisioning.firmware = target.provisioning.firmware;
            dirty = true;
        }
        if started && info.clear_error() {
            dirty = true;
        }

        if result.dirty {
            return pending(&result, dirty);
        }
        ActionResult::Complete
    }

    pub(crate) async fn action_provisioning(&self, info: &mut ReconcileInfo) -> ActionResult {
        let (force_reboot, _) = info.reboot_requested(true);
        info!("provisioning");

        let data = ProvisionData {
            image: info.host.spec.image.clone().unwrap_or_default(),
            custom_deploy: info.host.spec.custom_deploy.clone(),
            boot_mode: info.status.provisioning.boot_mode,
            root_device_hints: info.status.provisioning.root_device_hints.clone(),
        };

        let result = match self.prov.provision(&self.host_data, &data, force_reboot).await {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };

        if result.is_failed() {
            return info.record_action_failure(ErrorType::ProvisioningError, &result.error_message);
        }

        if info.clear_reboot_annotations() {
            info!("removing reboot annotations");
            return ActionResult::continue_now();
        }

        if result.dirty {
            let dirty = info.clear_error();
            return pending(&result, dirty);
        }

        // The backend finished; record what was deployed
        let provisioning = &mut info.status.provisioning;
        if info.host.spec.image.is_some() && provisioning.image != info.host.spec.image {
            info!("updating deployed image in status");
            provisioning.image.clone_from(&info.host.spec.image);
        }
        if info.host.spec.custom_deploy.is_some() && provisioning.custom_deploy != info.host.spec.custom_deploy {
            info!("updating custom deploy in status");
            provisioning.custom_deploy.clone_from(&info.host.spec.custom_deploy);
        }
        ActionResult::Complete
    }

    pub(crate) async fn action_deprovisioning(&self, info: &mut ReconcileInfo) -> ActionResult {
        if image_url(info.status.provisioning.image.as_ref()).is_some()
            || info.status.provisioning.custom_deploy.is_some()
        {
            // Adopt first so the backend knows what it is tearing down
            if let Some(result) = self.adopt(info).await {
                return result;
            }
        }

        info!("deprovisioning");

        let result = match self
            .prov
            .deprovision(
                &self.host_data,
                info.has_error_type(ErrorType::ProvisioningError),
                info.host.spec.automated_cleaning_mode,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };

        if result.is_failed() {
            return info.record_action_failure(ErrorType::ProvisioningError, &result.error_message);
        }

        if result.dirty {
            let dirty = info.clear_error();
            return pending(&result, dirty);
        }

        if info.clear_reboot_annotations() {
            info!("removing reboot annotations");
            return ActionResult::continue_now();
        }

        info.status.provisioning.image = None;
        info.status.provisioning.custom_deploy = None;
        clear_host_provisioning_settings(&mut info.status);
        ActionResult::Complete
    }

    /// Adopt the host; `None` once the backend owns it.
    async fn adopt(&self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        let data = AdoptData {
            state: info.status.provisioning.state,
        };
        let restart = info.has_error_type(ErrorType::ProvisionedRegistrationError);

        let result = match self.prov.adopt(&self.host_data, &data, restart).await {
            Ok(result) => result,
            Err(e) => return Some(ActionResult::Error(e)),
        };

        if result.is_failed() {
            return Some(info.record_action_failure(ErrorType::ProvisionedRegistrationError, &result.error_message));
        }
        if result.dirty {
            let dirty = info.clear_error();
            return Some(pending(&result, dirty));
        }
        None
    }

    /// Keep a provisioned host adopted and in the requested power state.
    pub(crate) async fn action_manage_steady_state(&self, info: &mut ReconcileInfo) -> ActionResult {
        if let Some(result) = self.adopt(info).await {
            return result;
        }
        self.manage_host_power(info).await
    }

    /// Start provisioning once an image is set, otherwise manage power.
    pub(crate) async fn action_manage_available(&self, info: &mut ReconcileInfo) -> ActionResult {
        if needs_provisioning(info) {
            info.clear_error();
            return ActionResult::Complete;
        }
        self.manage_host_power(info).await
    }

    async fn manage_host_power(&self, info: &mut ReconcileInfo) -> ActionResult {
        let hardware_state = match self.prov.update_hardware_state(&self.host_data).await {
            Ok(state) => state,
            Err(e) => return ActionResult::Error(e),
        };

        if let Some(powered_on) = hardware_state.powered_on
            && powered_on != info.status.powered_on
        {
            info!("updating power status to {}", powered_on);
            info.status.powered_on = powered_on;
            if info.status.operational_status == OperationalStatus::Error
                && info.has_error_type(ErrorType::PowerManagementError)
            {
                info.clear_error();
            }
            return ActionResult::update_now();
        }

        let mut desired_power_on = info.host.spec.online;
        let is_provisioned = matches!(
            info.status.provisioning.state,
            ProvisioningState::Provisioned | ProvisioningState::ExternallyProvisioned
        );

        // A plain reboot request is fulfilled once the host is down
        if !info.status.powered_on && info.remove_annotation(REBOOT_ANNOTATION_PREFIX) {
            info!("removing reboot annotation");
            return ActionResult::continue_now();
        }

        if (is_provisioned && !info.status.powered_on && desired_power_on)
            || info.status.operational_status == OperationalStatus::Servicing
            || info.has_error_type(ErrorType::ServicingError)
        {
            if let Some(result) = self.service_host(info).await {
                return result;
            }
        }

        let (reboot, mut power_off_mode) = info.reboot_requested(!is_provisioned);
        if reboot {
            desired_power_on = false;
        }

        if info.status.powered_on == desired_power_on {
            debug!("power state {} matches, nothing to do", desired_power_on);
            return ActionResult::Continue(POWER_POLL_INTERVAL);
        }

        info!(
            "power state change needed: expected {}, actual {}, reboot {}",
            desired_power_on, info.status.powered_on, reboot
        );

        let force = info.has_error_type(ErrorType::PowerManagementError);
        let result = if desired_power_on {
            self.prov.power_on(&self.host_data, force).await
        } else {
            if info.status.error_count > 0 {
                power_off_mode = RebootMode::Hard;
            }
            self.prov
                .power_off(
                    &self.host_data,
                    power_off_mode,
                    force,
                    info.host.spec.automated_cleaning_mode,
                )
                .await
        };
        let result = match result {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };

        if info.host.spec.disable_power_off && info.remove_annotation(REBOOT_ANNOTATION_PREFIX) {
            info!("removing reboot annotation");
            return ActionResult::continue_now();
        }

        if result.is_failed() {
            let message = if !desired_power_on && power_off_mode == RebootMode::Soft && !force {
                format!("{SOFT_POWER_OFF_FAILURE_PREFIX}{}", result.error_message)
            } else {
                result.error_message
            };
            return info.record_action_failure(ErrorType::PowerManagementError, &message);
        }

        if result.dirty {
            let dirty = info.clear_error();
            return pending(&result, dirty);
        }

        // The power change went through
        info.status.powered_on = info.host.spec.online;
        info.status.error_count = 0;
        ActionResult::Update(POWER_POLL_INTERVAL)
    }

    /// Apply firmware settings while a provisioned host is down.
    ///
    /// Returns `None` when there is nothing to service and power
    /// management may go on.
    async fn service_host(&self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        let servicing_allowed = info.host.spec.servicing_policy == ServicingPolicy::OnReboot;
        let firmware_dirty = servicing_allowed && info.status.provisioning.firmware != info.host.spec.firmware;
        let in_servicing = info.status.operational_status == OperationalStatus::Servicing;

        if !firmware_dirty && !in_servicing && !info.has_error_type(ErrorType::ServicingError) {
            return None;
        }

        if !in_servicing {
            info!("servicing host");
            info.set_operational_status(OperationalStatus::Servicing);
            return Some(ActionResult::update_now());
        }

        let data = ServicingData {
            firmware_config: if firmware_dirty {
                info.host.spec.firmware.clone()
            } else {
                None
            },
        };
        let restart = info.has_error_type(ErrorType::ServicingError);

        let (result, started) = match self
            .prov
            .service(&self.host_data, &data, firmware_dirty, restart)
            .await
        {
            Ok(serviced) => serviced,
            Err(e) => return Some(ActionResult::Error(e)),
        };

        if result.is_failed() {
            // Try the whole update again next time
            info.status.provisioning.firmware = None;
            return Some(info.record_action_failure(ErrorType::ServicingError, &result.error_message));
        }

        let mut dirty = info.clear_error_with_status(OperationalStatus::Servicing);
        if started && firmware_dirty {
            info.status.provisioning.firmware.clone_from(&info.host.spec.firmware);
            dirty = true;
        }
        if dirty {
            return Some(ActionResult::Update(result.requeue_after));
        }
        if result.dirty {
            return Some(ActionResult::Continue(result.requeue_after));
        }

        if info.clear_error_with_status(OperationalStatus::Ok) {
            info!("servicing finished");
            return Some(ActionResult::Update(SUB_RESOURCE_NOT_READY_RETRY_DELAY));
        }
        None
    }

    pub(crate) async fn action_power_off_before_deleting(&self, info: &mut ReconcileInfo) -> ActionResult {
        if info.host.spec.disable_power_off {
            info!("Skipping host powered off as Power Off has been disabled");
            return ActionResult::Complete;
        }

        info!("host ready to be powered off");
        let result = match self
            .prov
            .power_off(
                &self.host_data,
                RebootMode::Hard,
                info.has_error_type(ErrorType::PowerManagementError),
                info.host.spec.automated_cleaning_mode,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };

        if result.is_failed() {
            return info.record_action_failure(ErrorType::PowerManagementError, &result.error_message);
        }
        if result.dirty {
            let dirty = info.clear_error();
            return pending(&result, dirty);
        }
        ActionResult::Complete
    }

    pub(crate) async fn action_deleting(&self, info: &mut ReconcileInfo) -> ActionResult {
        info!("marked to be deleted");

        if !info.host.has_finalizer() {
            info!("ready to be deleted");
            return ActionResult::DeleteComplete;
        }

        let result = match self.prov.delete(&self.host_data).await {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };
        if result.dirty {
            return ActionResult::Continue(result.requeue_after);
        }

        info!("cleanup is complete, removed finalizer");
        info.finalizer_removed = true;
        ActionResult::DeleteComplete
    }

    /// Remove the host from the backend while leaving it running.
    pub(crate) async fn detach_host(&self, info: &mut ReconcileInfo) -> ActionResult {
        let result = match self.prov.detach(&self.host_data).await {
            Ok(result) => result,
            Err(e) => return ActionResult::Error(e),
        };

        if result.is_failed() {
            return info.record_action_failure(ErrorType::DetachError, &result.error_message);
        }

        if result.dirty {
            if info.has_error_type(ErrorType::DetachError) && info.clear_error() {
                return ActionResult::Update(result.requeue_after);
            }
            return ActionResult::Continue(result.requeue_after);
        }

        if info.has_error_type(ErrorType::DetachError) {
            info.clear_error();
            info.status.error_count = 0;
        }
        if info.set_operational_status(OperationalStatus::Detached) {
            info!("host is detached, removed from provisioner");
            return ActionResult::Update(UNMANAGED_RETRY_DELAY);
        }
        ActionResult::Continue(UNMANAGED_RETRY_DELAY)
    }
}

/// Image the backend should consider deployed, if any.
fn current_image(info: &ReconcileInfo) -> Option<crds::Image> {
    if image_url(info.status.provisioning.image.as_ref()).is_some() {
        return info.status.provisioning.image.clone();
    }
    if matches!(
        info.status.provisioning.state,
        ProvisioningState::Provisioning | ProvisioningState::ExternallyProvisioned
    ) && image_url(info.host.spec.image.as_ref()).is_some()
    {
        return info.host.spec.image.clone();
    }
    None
}

fn has_custom_deploy(info: &ReconcileInfo) -> bool {
    if custom_deploy_method(info.status.provisioning.custom_deploy.as_ref()).is_some() {
        return true;
    }
    matches!(
        info.status.provisioning.state,
        ProvisioningState::Provisioning | ProvisioningState::ExternallyProvisioned
    ) && custom_deploy_method(info.host.spec.custom_deploy.as_ref()).is_some()
}

/// Whether an available host has been given something to deploy.
fn needs_provisioning(info: &ReconcileInfo) -> bool {
    if !info.host.spec.online {
        return false;
    }
    let provisioning = &info.status.provisioning;
    if image_url(info.host.spec.image.as_ref()).is_some() && image_url(provisioning.image.as_ref()).is_none() {
        return true;
    }
    custom_deploy_method(info.host.spec.custom_deploy.as_ref()).is_some()
        && custom_deploy_method(provisioning.custom_deploy.as_ref()).is_none()
}

fn update_root_device_hints(info: &mut ReconcileInfo) -> bool {
    if info.status.provisioning.root_device_hints == info.host.spec.root_device_hints {
        return false;
    }
    info.status
        .provisioning
        .root_device_hints
        .clone_from(&info.host.spec.root_device_hints);
    true
}

/// Status with the spec's provisioning settings applied, and whether
/// anything differs from the current status.
pub(crate) fn host_provisioning_settings(info: &ReconcileInfo) -> (bool, BareMetalHostStatus) {
    let mut status = info.status.clone();
    let spec = &info.host.spec;
    let mut dirty = false;

    if status.provisioning.root_device_hints != spec.root_device_hints {
        status.provisioning.root_device_hints.clone_from(&spec.root_device_hints);
        dirty = true;
    }

    // Removing RAID from the spec clears software RAID but leaves any
    // hardware volumes alone
    let spec_raid = match (&spec.raid, &status.provisioning.raid) {
        (None, Some(current)) => Some(cleared_raid(current)),
        (Some(raid), Some(current)) if *raid == RaidConfig::default() => Some(cleared_raid(current)),
        (raid, _) => raid.clone(),
    };
    if status.provisioning.raid != spec_raid {
        status.provisioning.raid = spec_raid;
        dirty = true;
    }

    if status.provisioning.firmware != spec.firmware {
        status.provisioning.firmware.clone_from(&spec.firmware);
        dirty = true;
    }

    (dirty, status)
}

fn cleared_raid(current: &RaidConfig) -> RaidConfig {
    RaidConfig {
        hardware_raid_volumes: current.hardware_raid_volumes.clone().filter(|v| !v.is_empty()),
        software_raid_volumes: Some(Vec::new()),
    }
}

/// Forget the settings applied during preparation.
pub(crate) fn clear_host_provisioning_settings(status: &mut BareMetalHostStatus) {
    let provisioning = &mut status.provisioning;
    provisioning.root_device_hints = None;
    if let Some(raid) = provisioning.raid.as_mut() {
        raid.software_raid_volumes = None;
    }
    provisioning.firmware = None;
}
