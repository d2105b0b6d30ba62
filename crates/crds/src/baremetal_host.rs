//! BareMetalHost CRD
//!
//! A physical server managed through its BMC and the provisioning backend.
//! The controller owns `status.provisioning.state` and
//! `status.operationalStatus`; nothing else writes them.

use crate::firmware::FirmwareConfig;
use crate::hardware::HardwareDetails;
use crate::raid::RaidConfig;
use crate::root_device_hints::RootDeviceHints;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finalizer placed on every live host
pub const BAREMETALHOST_FINALIZER: &str = "baremetalhost.dcops.microscaler.io";

/// Pauses reconciliation while present
pub const PAUSED_ANNOTATION: &str = "dcops.microscaler.io/paused";

/// Detaches the host from the provisioning backend while present
pub const DETACHED_ANNOTATION: &str = "dcops.microscaler.io/detached";

/// Requests inspection, or disables it with the value `disabled`
pub const INSPECT_ANNOTATION: &str = "inspect.dcops.microscaler.io";

/// Value of [`INSPECT_ANNOTATION`] that disables inspection
pub const INSPECT_ANNOTATION_DISABLED: &str = "disabled";

/// Reboot request annotation, optionally suffixed with `/<client>`
pub const REBOOT_ANNOTATION_PREFIX: &str = "reboot.dcops.microscaler.io";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "BareMetalHost",
    namespaced,
    status = "BareMetalHostStatus",
    shortname = "bmh",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.provisioning.state"}"#,
    printcolumn = r#"{"name":"Online","type":"boolean","jsonPath":".spec.online"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.errorType"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    /// How to reach the baseboard management controller
    #[serde(default)]
    pub bmc: BmcDetails,

    /// MAC address of the NIC used for provisioning
    #[serde(rename = "bootMACAddress", default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// Whether the host should be powered on
    #[serde(default)]
    pub online: bool,

    /// The host was provisioned by something else and must not be touched
    #[serde(default)]
    pub externally_provisioned: bool,

    /// Image to deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Custom deploy method, used instead of an image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_deploy: Option<CustomDeploy>,

    /// RAID layout to apply during preparation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid: Option<RaidConfig>,

    /// BIOS settings to apply during preparation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareConfig>,

    /// Disk selection for the root filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_hints: Option<RootDeviceHints>,

    /// Boot mode for deployment
    #[serde(default)]
    pub boot_mode: BootMode,

    /// Whether disks are cleaned on deprovisioning
    #[serde(default)]
    pub automated_cleaning_mode: AutomatedCleaningMode,

    /// CPU architecture, e.g. x86_64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Never power the host off; reboot instead
    #[serde(default)]
    pub disable_power_off: bool,

    /// When firmware changes may be applied to a provisioned host
    #[serde(default)]
    pub servicing_policy: ServicingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BmcDetails {
    /// BMC URL, e.g. `redfish-virtualmedia://10.0.0.5/redfish/v1/Systems/1`
    #[serde(default)]
    pub address: String,

    /// Name of the Secret holding `username` and `password`
    #[serde(default)]
    pub credentials_name: String,

    /// Skip TLS verification towards the BMC
    #[serde(default)]
    pub disable_certificate_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Location of the image
    pub url: String,

    /// Checksum value, or URL of a checksum file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Checksum algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<ChecksumType>,

    /// Disk format, e.g. raw, qcow2, live-iso
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_format: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha256,
    Sha512,
    Auto,
}

impl ChecksumType {
    /// Algorithm name as the backend expects it.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomDeploy {
    /// Deploy method name understood by the backend
    pub method: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum BootMode {
    #[serde(rename = "legacy")]
    Legacy,
    #[default]
    #[serde(rename = "UEFI")]
    Uefi,
    #[serde(rename = "UEFISecureBoot")]
    UefiSecureBoot,
}

impl BootMode {
    /// Boot mode as the backend capability string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "bios",
            Self::Uefi | Self::UefiSecureBoot => "uefi",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AutomatedCleaningMode {
    /// Clean disk metadata on deprovisioning
    #[default]
    Metadata,
    /// Skip cleaning
    Disabled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ServicingPolicy {
    /// Firmware is only changed during preparation
    #[default]
    Disabled,
    /// Firmware changes are applied on the next power-on of a provisioned host
    OnReboot,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostStatus {
    /// Overall health
    #[serde(default)]
    pub operational_status: OperationalStatus,

    /// Class of the most recent error
    #[serde(default)]
    pub error_type: Option<ErrorType>,

    /// Details of the most recent error
    #[serde(default)]
    pub error_message: String,

    /// Consecutive failures of the current operation
    #[serde(default)]
    pub error_count: u32,

    /// Last observed power state
    #[serde(default)]
    pub powered_on: bool,

    /// Inventory discovered by inspection
    #[serde(default)]
    pub hardware: Option<HardwareDetails>,

    /// Provisioning progress and applied settings
    #[serde(default)]
    pub provisioning: ProvisionStatus,

    /// Credentials last sent to the BMC
    #[serde(default)]
    pub tried_credentials: Option<CredentialsStatus>,

    /// Credentials last verified against the BMC
    #[serde(default)]
    pub good_credentials: Option<CredentialsStatus>,

    /// Last time status was written
    #[serde(default)]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStatus {
    /// Current provisioning state
    #[serde(default)]
    pub state: ProvisioningState,

    /// Backend node identifier
    #[serde(default)]
    pub id: String,

    /// Image currently deployed
    #[serde(default)]
    pub image: Option<Image>,

    /// Custom deploy currently applied
    #[serde(default)]
    pub custom_deploy: Option<CustomDeploy>,

    /// Boot mode used when the host was last registered
    #[serde(default)]
    pub boot_mode: BootMode,

    /// RAID layout applied during preparation
    #[serde(default)]
    pub raid: Option<RaidConfig>,

    /// Firmware settings applied during preparation or servicing
    #[serde(default)]
    pub firmware: Option<FirmwareConfig>,

    /// Root device hints in effect
    #[serde(default)]
    pub root_device_hints: Option<RootDeviceHints>,
}

/// Fingerprint of a credentials Secret
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsStatus {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Secret resourceVersion
    pub version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum ProvisioningState {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "unmanaged")]
    Unmanaged,
    #[serde(rename = "registering")]
    Registering,
    #[serde(rename = "inspecting")]
    Inspecting,
    #[serde(rename = "preparing")]
    Preparing,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "provisioning")]
    Provisioning,
    #[serde(rename = "provisioned")]
    Provisioned,
    #[serde(rename = "externally provisioned")]
    ExternallyProvisioned,
    #[serde(rename = "deprovisioning")]
    Deprovisioning,
    #[serde(rename = "powering off before delete")]
    PoweringOffBeforeDelete,
    #[serde(rename = "deleting")]
    Deleting,
}

impl ProvisioningState {
    /// State as stored in status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Unmanaged => "unmanaged",
            Self::Registering => "registering",
            Self::Inspecting => "inspecting",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Available => "available",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::ExternallyProvisioned => "externally provisioned",
            Self::Deprovisioning => "deprovisioning",
            Self::PoweringOffBeforeDelete => "powering off before delete",
            Self::Deleting => "deleting",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum OperationalStatus {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "discovered")]
    Discovered,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "delayed")]
    Delayed,
    #[serde(rename = "detached")]
    Detached,
    #[serde(rename = "servicing")]
    Servicing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ErrorType {
    #[serde(rename = "provisioned registration error")]
    ProvisionedRegistrationError,
    #[serde(rename = "registration error")]
    RegistrationError,
    #[serde(rename = "inspection error")]
    InspectionError,
    #[serde(rename = "preparation error")]
    PreparationError,
    #[serde(rename = "provisioning error")]
    ProvisioningError,
    #[serde(rename = "power management error")]
    PowerManagementError,
    #[serde(rename = "detach error")]
    DetachError,
    #[serde(rename = "servicing error")]
    ServicingError,
}

impl ErrorType {
    /// Event reason used when this error is recorded.
    #[must_use]
    pub fn event_reason(self) -> &'static str {
        match self {
            Self::ProvisionedRegistrationError => "ProvisionedRegistrationError",
            Self::RegistrationError => "RegistrationError",
            Self::InspectionError => "InspectionError",
            Self::PreparationError => "PreparationError",
            Self::ProvisioningError => "ProvisioningError",
            Self::PowerManagementError => "PowerManagementError",
            Self::DetachError => "DetachError",
            Self::ServicingError => "ServicingError",
        }
    }
}

/// Parsed value of [`DETACHED_ANNOTATION`]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DetachedAnnotationArguments {
    #[serde(default)]
    pub delete_action: DetachedDeleteAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DetachedDeleteAction {
    #[default]
    Delete,
    Delay,
}

/// Parsed value of a reboot annotation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RebootAnnotationArguments {
    #[serde(default)]
    pub mode: RebootMode,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RebootMode {
    Hard,
    #[default]
    Soft,
}

impl BareMetalHost {
    /// Status, or the default status for a host never written by the controller.
    #[must_use]
    pub fn status_or_default(&self) -> BareMetalHostStatus {
        self.status.clone().unwrap_or_default()
    }

    /// True if any BMC connection detail is present.
    #[must_use]
    pub fn has_bmc_details(&self) -> bool {
        !self.spec.bmc.address.is_empty() || !self.spec.bmc.credentials_name.is_empty()
    }

    /// True if the host is marked for deletion.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Value of an annotation, if set.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// True if the finalizer is present.
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == BAREMETALHOST_FINALIZER))
    }

    /// True if inspection is disabled by annotation.
    #[must_use]
    pub fn inspection_disabled(&self) -> bool {
        self.annotation(INSPECT_ANNOTATION) == Some(INSPECT_ANNOTATION_DISABLED)
    }

    /// True if re-inspection was requested by annotation.
    #[must_use]
    pub fn inspection_requested(&self) -> bool {
        self.annotation(INSPECT_ANNOTATION)
            .is_some_and(|v| v != INSPECT_ANNOTATION_DISABLED)
    }

    /// Boot MAC address, if configured.
    #[must_use]
    pub fn boot_mac(&self) -> Option<&str> {
        self.spec
            .boot_mac_address
            .as_deref()
            .filter(|m| !m.is_empty())
    }
}

/// Image URL if set and non-empty.
#[must_use]
pub fn image_url(image: Option<&Image>) -> Option<&str> {
    image.map(|i| i.url.as_str()).filter(|u| !u.is_empty())
}

/// Custom deploy method if set and non-empty.
#[must_use]
pub fn custom_deploy_method(custom: Option<&CustomDeploy>) -> Option<&str> {
    custom.map(|c| c.method.as_str()).filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_state_serialization() {
        let json = serde_json::to_string(&ProvisioningState::ExternallyProvisioned).unwrap();
        assert_eq!(json, "\"externally provisioned\"");

        let state: ProvisioningState = serde_json::from_str("\"\"").unwrap();
        assert_eq!(state, ProvisioningState::None);
    }

    #[test]
    fn test_status_defaults_from_empty_object() {
        let status: BareMetalHostStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.operational_status, OperationalStatus::Ok);
        assert_eq!(status.provisioning.state, ProvisioningState::None);
        assert_eq!(status.error_count, 0);
        assert!(status.error_type.is_none());
    }

    #[test]
    fn test_spec_parses_camel_case() {
        let spec: BareMetalHostSpec = serde_json::from_value(serde_json::json!({
            "bmc": {"address": "ipmi://10.0.0.1", "credentialsName": "bmc-secret"},
            "bootMACAddress": "00:11:22:33:44:55",
            "online": true,
            "bootMode": "UEFISecureBoot",
            "raid": {"hardwareRAIDVolumes": [{"level": "1", "name": "root"}]}
        }))
        .unwrap();
        assert_eq!(spec.bmc.credentials_name, "bmc-secret");
        assert_eq!(spec.boot_mode, BootMode::UefiSecureBoot);
        assert_eq!(spec.raid.unwrap().hardware().len(), 1);
    }

    #[test]
    fn test_inspection_annotations() {
        let mut host = BareMetalHost::new("host-0", BareMetalHostSpec::default());
        assert!(!host.inspection_disabled());
        assert!(!host.inspection_requested());

        host.metadata.annotations = Some(
            [(INSPECT_ANNOTATION.to_string(), "disabled".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(host.inspection_disabled());
        assert!(!host.inspection_requested());

        host.metadata.annotations = Some(
            [(INSPECT_ANNOTATION.to_string(), String::new())]
                .into_iter()
                .collect(),
        );
        assert!(host.inspection_requested());
    }

    #[test]
    fn test_has_bmc_details() {
        let mut host = BareMetalHost::new("host-0", BareMetalHostSpec::default());
        assert!(!host.has_bmc_details());
        host.spec.bmc.credentials_name = "secret".to_string();
        assert!(host.has_bmc_details());
    }
}
