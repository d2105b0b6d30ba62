//! Root device hints
//!
//! Criteria used by the provisioning backend to pick the disk an image is
//! written to. Also reused as physical-disk selectors for software RAID.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootDeviceHints {
    /// A Linux device name like "/dev/vda", or a by-path link to it like
    /// "/dev/disk/by-path/pci-0000:01:00.0-scsi-0:2:0:0"
    #[serde(default)]
    pub device_name: Option<String>,

    /// A SCSI bus address like 0:0:0:0
    #[serde(default)]
    pub hctl: Option<String>,

    /// A vendor-specific device identifier (substring match)
    #[serde(default)]
    pub model: Option<String>,

    /// The name of the vendor or manufacturer (substring match)
    #[serde(default)]
    pub vendor: Option<String>,

    /// Device serial number
    #[serde(default)]
    pub serial_number: Option<String>,

    /// The minimum size of the device in Gigabytes
    #[serde(default)]
    pub min_size_gigabytes: Option<u64>,

    /// Unique storage identifier
    #[serde(default)]
    pub wwn: Option<String>,

    /// Unique storage identifier with the vendor extension appended
    #[serde(default)]
    pub wwn_with_extension: Option<String>,

    /// Unique vendor storage identifier
    #[serde(default)]
    pub wwn_vendor_extension: Option<String>,

    /// True for rotational (HDD) devices, false for SSD/NVMe
    #[serde(default)]
    pub rotational: Option<bool>,
}

impl RootDeviceHints {
    /// True when no hint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
