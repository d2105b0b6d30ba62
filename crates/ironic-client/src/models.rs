//! Provisioning backend models
//!
//! Two groups of types live here: the operation inputs and outputs exchanged
//! with the state machine, and the Ironic v1 REST API wire types.

use bmc::{AccessDetails, Credentials};
use crds::{
    AutomatedCleaningMode, BootMode, CustomDeploy, FirmwareConfig, HardwareDetails, Image,
    OperationalStatus, ProvisioningState, RaidConfig, RootDeviceHints,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Requeue delay while the backend works on a provisioning step
pub const PROVISION_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Requeue delay while the backend deprovisions or cleans
pub const DEPROVISION_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Requeue delay while a power change is pending
pub const POWER_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Requeue delay while inspection runs
pub const INTROSPECTION_REQUEUE_DELAY: Duration = Duration::from_secs(15);

/// How long the BMC gets to finish a soft power-off
pub const SOFT_POWER_OFF_TIMEOUT: Duration = Duration::from_secs(180);

/// Separator between namespace and name in backend node names
pub const NAME_SEPARATOR: &str = "~";

/// Outcome of one backend operation.
///
/// `dirty` means the operation changed something and the caller should
/// check back after `requeue_after`. A non-empty `error_message` is a
/// failure reported by the backend for this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub dirty: bool,
    pub requeue_after: Duration,
    pub error_message: String,
}

impl OperationResult {
    /// Nothing left to do.
    #[must_use]
    pub fn complete() -> Self {
        Self::default()
    }

    /// Work is in progress; check back after `delay`.
    #[must_use]
    pub fn continuing(delay: Duration) -> Self {
        Self {
            dirty: true,
            requeue_after: delay,
            error_message: String::new(),
        }
    }

    /// The backend was busy; try again after `delay`.
    #[must_use]
    pub fn retry_after(delay: Duration) -> Self {
        Self::continuing(delay)
    }

    /// The backend reported a failure for this host.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            dirty: false,
            requeue_after: PROVISION_REQUEUE_DELAY,
            error_message: message.into(),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.error_message.is_empty()
    }

    /// True when the caller must not treat this as a finished step.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.dirty || self.is_failed()
    }
}

/// Identity and BMC access of the host a backend call is made for.
#[derive(Debug, Clone, Default)]
pub struct HostData {
    pub namespace: String,
    pub name: String,
    /// Kubernetes UID, used as the node's instance UUID
    pub uid: String,
    /// Backend node identifier from a previous registration
    pub provisioning_id: String,
    pub boot_mac: Option<String>,
    pub credentials: Credentials,
    /// Absent when the host has no usable BMC details
    pub bmc_access: Option<Arc<dyn AccessDetails>>,
}

impl HostData {
    /// Backend node name, `<namespace>~<name>`.
    #[must_use]
    pub fn node_name(&self) -> String {
        format!("{}{NAME_SEPARATOR}{}", self.namespace, self.name)
    }
}

/// Inputs for registration.
#[derive(Debug, Clone, Default)]
pub struct ManagementAccessData {
    pub boot_mode: BootMode,
    pub automated_cleaning_mode: AutomatedCleaningMode,
    pub state: ProvisioningState,
    pub operational_status: OperationalStatus,
    pub current_image: Option<Image>,
    pub has_custom_deploy: bool,
    pub cpu_architecture: Option<String>,
    pub disable_power_off: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdoptData {
    pub state: ProvisioningState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InspectData {
    pub boot_mode: BootMode,
}

/// Inputs for preparation (manual cleaning).
#[derive(Debug, Clone, Default)]
pub struct PrepareData {
    pub target_raid_config: Option<RaidConfig>,
    /// RAID layout applied by the previous preparation
    pub actual_raid_config: Option<RaidConfig>,
    pub root_device_hints: Option<RootDeviceHints>,
    pub firmware_config: Option<FirmwareConfig>,
}

/// Inputs for image deployment.
#[derive(Debug, Clone, Default)]
pub struct ProvisionData {
    pub image: Image,
    pub custom_deploy: Option<CustomDeploy>,
    pub boot_mode: BootMode,
    pub root_device_hints: Option<RootDeviceHints>,
}

#[derive(Debug, Clone, Default)]
pub struct ServicingData {
    pub firmware_config: Option<FirmwareConfig>,
}

/// Result of an inspection step.
#[derive(Debug, Clone, Default)]
pub struct InspectResult {
    pub result: OperationResult,
    /// A new inspection was started by this call
    pub started: bool,
    /// Inventory, once inspection has finished
    pub details: Option<HardwareDetails>,
}

/// Power state as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareState {
    /// `None` when the backend cannot tell
    pub powered_on: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Iso,
    InitRd,
}

/// One firmware component and its versions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirmwareComponent {
    pub component: String,
    #[serde(default)]
    pub initial_version: String,
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub last_version_flashed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareComponentList {
    #[serde(default)]
    pub firmware: Vec<FirmwareComponent>,
}

// Ironic v1 wire types

/// Node provision states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ProvisionState {
    #[serde(rename = "enroll")]
    Enroll,
    #[serde(rename = "verifying")]
    Verifying,
    #[serde(rename = "manageable")]
    Manageable,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "wait call-back")]
    DeployWait,
    #[serde(rename = "deploying")]
    Deploying,
    #[serde(rename = "deploy failed")]
    DeployFail,
    #[serde(rename = "cleaning")]
    Cleaning,
    #[serde(rename = "clean wait")]
    CleanWait,
    #[serde(rename = "clean failed")]
    CleanFail,
    #[serde(rename = "inspecting")]
    Inspecting,
    #[serde(rename = "inspect wait")]
    InspectWait,
    #[serde(rename = "inspect failed")]
    InspectFail,
    #[serde(rename = "adopting")]
    Adopting,
    #[serde(rename = "adopt failed")]
    AdoptFail,
    #[serde(rename = "deleting")]
    Deleting,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "servicing")]
    Servicing,
    #[serde(rename = "service wait")]
    ServiceWait,
    #[serde(rename = "service failed")]
    ServiceFail,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProvisionState {
    /// State name as the backend reports it.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enroll => "enroll",
            Self::Verifying => "verifying",
            Self::Manageable => "manageable",
            Self::Available => "available",
            Self::Active => "active",
            Self::DeployWait => "wait call-back",
            Self::Deploying => "deploying",
            Self::DeployFail => "deploy failed",
            Self::Cleaning => "cleaning",
            Self::CleanWait => "clean wait",
            Self::CleanFail => "clean failed",
            Self::Inspecting => "inspecting",
            Self::InspectWait => "inspect wait",
            Self::InspectFail => "inspect failed",
            Self::Adopting => "adopting",
            Self::AdoptFail => "adopt failed",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Servicing => "servicing",
            Self::ServiceWait => "service wait",
            Self::ServiceFail => "service failed",
            Self::Unknown => "unknown",
        }
    }

    /// States during which a node occupies provisioning network capacity.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Cleaning
                | Self::CleanWait
                | Self::Inspecting
                | Self::InspectWait
                | Self::Deploying
                | Self::DeployWait
                | Self::Deleting
        )
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provision state change verbs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionTarget {
    Manage,
    Provide,
    Active,
    Deleted,
    Inspect,
    Clean,
    Adopt,
    Abort,
    Service,
}

impl ProvisionTarget {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manage => "manage",
            Self::Provide => "provide",
            Self::Active => "active",
            Self::Deleted => "deleted",
            Self::Inspect => "inspect",
            Self::Clean => "clean",
            Self::Adopt => "adopt",
            Self::Abort => "abort",
            Self::Service => "service",
        }
    }
}

/// Power state change targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerTarget {
    #[serde(rename = "power on")]
    PowerOn,
    #[serde(rename = "power off")]
    PowerOff,
    #[serde(rename = "soft power off")]
    SoftPowerOff,
    #[serde(rename = "rebooting")]
    Rebooting,
    #[serde(rename = "soft rebooting")]
    SoftRebooting,
}

impl PowerTarget {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "power on",
            Self::PowerOff => "power off",
            Self::SoftPowerOff => "soft power off",
            Self::Rebooting => "rebooting",
            Self::SoftRebooting => "soft rebooting",
        }
    }
}

/// Reported power state meaning "on"
pub const POWER_ON: &str = "power on";
/// Reported power state meaning "off"
pub const POWER_OFF: &str = "power off";

/// Node model matching the Ironic node resource
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Node {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub provision_state: ProvisionState,
    #[serde(default)]
    pub target_provision_state: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub target_power_state: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub maintenance_reason: Option<String>,
    #[serde(default)]
    pub fault: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub automated_clean: Option<bool>,
    #[serde(default)]
    pub disable_power_off: bool,
    #[serde(default)]
    pub boot_interface: Option<String>,
    #[serde(default)]
    pub deploy_interface: Option<String>,
    #[serde(default)]
    pub firmware_interface: Option<String>,
    #[serde(default)]
    pub driver_info: Map<String, Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub instance_info: Map<String, Value>,
}

impl Node {
    /// `last_error`, or an empty string.
    #[must_use]
    pub fn error(&self) -> &str {
        self.last_error.as_deref().unwrap_or_default()
    }

    /// `target_provision_state`, or an empty string.
    #[must_use]
    pub fn target_provision(&self) -> &str {
        self.target_provision_state.as_deref().unwrap_or_default()
    }

    /// `power_state`, or an empty string.
    #[must_use]
    pub fn power(&self) -> &str {
        self.power_state.as_deref().unwrap_or_default()
    }

    /// `target_power_state`, or an empty string.
    #[must_use]
    pub fn target_power(&self) -> &str {
        self.target_power_state.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn has_fault(&self) -> bool {
        self.fault.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// One page of a node listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Link to the next page
    #[serde(default)]
    pub next: Option<String>,
}

/// Port model matching the Ironic port resource
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Port {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub node_uuid: String,
    #[serde(default)]
    pub pxe_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortList {
    #[serde(default)]
    pub ports: Vec<Port>,
}

/// Body of `PUT /v1/nodes/{id}/states/provision`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProvisionStateRequest {
    pub target: ProvisionTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<CleanStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_steps: Option<Vec<CleanStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_steps: Option<Vec<DeployStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configdrive: Option<Value>,
}

impl ProvisionStateRequest {
    #[must_use]
    pub fn new(target: ProvisionTarget) -> Self {
        Self {
            target,
            clean_steps: None,
            service_steps: None,
            deploy_steps: None,
            configdrive: None,
        }
    }
}

/// Body of `PUT /v1/nodes/{id}/states/power`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PowerStateRequest {
    pub target: PowerTarget,
    /// Seconds, only sent for soft power-off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Result of `GET /v1/nodes/{id}/validate`, per interface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeValidation {
    #[serde(default)]
    pub boot: InterfaceValidation,
    #[serde(default)]
    pub deploy: InterfaceValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InterfaceValidation {
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl InterfaceValidation {
    /// Failure reason, if the interface did not validate.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        if self.result == Some(false) {
            Some(self.reason.as_deref().unwrap_or_default())
        } else {
            None
        }
    }
}

/// Driver details, used to pick the inspect interface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriverDetails {
    #[serde(default)]
    pub enabled_inspect_interfaces: Vec<String>,
}

/// One clean or service step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanStep {
    pub interface: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl CleanStep {
    #[must_use]
    pub fn new(interface: &str, step: &str) -> Self {
        Self {
            interface: interface.to_string(),
            step: step.to_string(),
            args: None,
        }
    }
}

/// One deploy step for a custom deploy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployStep {
    pub interface: String,
    pub step: String,
    pub args: Map<String, Value>,
    pub priority: u32,
}

/// Backend descriptor of one RAID array to create
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct LogicalDisk {
    /// `None` means use all available space (`MAX`)
    #[serde(serialize_with = "serialize_size_gb")]
    pub size_gb: Option<u64>,
    pub raid_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_root_volume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<DiskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_physical_disks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<Value>,
}

fn serialize_size_gb<S: Serializer>(size: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match size {
        Some(gb) => serializer.serialize_u64(*gb),
        None => serializer.serialize_str("MAX"),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Hdd,
    Ssd,
}

/// API root document, used to discover the supported microversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiVersionRoot {
    pub version: ApiVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiVersion {
    /// Highest supported microversion, e.g. `1.95`
    pub version: String,
    #[serde(default)]
    pub min_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provision_state_deserializes() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "uuid": "abc",
            "provision_state": "rescue wait"
        }))
        .unwrap();
        assert_eq!(node.provision_state, ProvisionState::Unknown, "Unexpected state");
    }

    #[test]
    fn test_node_null_fields_read_as_empty() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "uuid": "abc",
            "provision_state": "enroll",
            "last_error": null,
            "target_provision_state": null,
            "power_state": "power on"
        }))
        .unwrap();
        assert_eq!(node.error(), "");
        assert_eq!(node.target_provision(), "");
        assert_eq!(node.power(), POWER_ON);
        assert!(!node.has_fault());
    }

    #[test]
    fn test_logical_disk_without_size_serializes_max() {
        let disk = LogicalDisk {
            raid_level: "1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["size_gb"], "MAX", "Missing size should mean MAX");
        assert!(json.get("volume_name").is_none(), "Unset fields should be omitted");
    }

    #[test]
    fn test_operation_result_helpers() {
        assert!(!OperationResult::complete().is_pending());
        assert!(OperationResult::continuing(Duration::ZERO).dirty);
        let failed = OperationResult::failed("boom");
        assert!(failed.is_failed() && !failed.dirty, "Failure is not dirty");
        assert_eq!(failed.requeue_after, PROVISION_REQUEUE_DELAY);
    }

    #[test]
    fn test_node_name_uses_separator() {
        let host = HostData {
            namespace: "metal".to_string(),
            name: "host-0".to_string(),
            ..Default::default()
        };
        assert_eq!(host.node_name(), "metal~host-0");
    }
}
