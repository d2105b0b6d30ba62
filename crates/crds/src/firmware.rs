//! Firmware (BIOS) configuration
//!
//! A small set of vendor-neutral BIOS toggles. BMC drivers translate these
//! into vendor-specific setting names and values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareConfig {
    /// Supports the virtualization of platform hardware
    #[serde(default)]
    pub virtualization_enabled: Option<bool>,

    /// Allows a single physical processor core to appear as several logical processors
    #[serde(default)]
    pub simultaneous_multithreading_enabled: Option<bool>,

    /// SR-IOV support enables a hypervisor to create virtual instances of a PCI-express device
    #[serde(default)]
    pub sriov_enabled: Option<bool>,
}

impl FirmwareConfig {
    /// True when no toggle is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.virtualization_enabled.is_none()
            && self.simultaneous_multithreading_enabled.is_none()
            && self.sriov_enabled.is_none()
    }
}
