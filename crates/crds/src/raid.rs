//! RAID configuration
//!
//! Desired hardware or software RAID volumes for a host. The two kinds are
//! mutually exclusive within one config.

use crate::root_device_hints::RootDeviceHints;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// RAID level of a volume
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RaidLevel {
    #[serde(rename = "0")]
    Raid0,
    #[serde(rename = "1")]
    Raid1,
    #[serde(rename = "2")]
    Raid2,
    #[serde(rename = "5")]
    Raid5,
    #[serde(rename = "6")]
    Raid6,
    #[serde(rename = "1+0")]
    Raid10,
    #[serde(rename = "5+0")]
    Raid50,
    #[serde(rename = "6+0")]
    Raid60,
}

impl RaidLevel {
    /// Level as the backend spells it.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raid0 => "0",
            Self::Raid1 => "1",
            Self::Raid2 => "2",
            Self::Raid5 => "5",
            Self::Raid6 => "6",
            Self::Raid10 => "1+0",
            Self::Raid50 => "5+0",
            Self::Raid60 => "6+0",
        }
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareRaidVolume {
    /// Size of the logical disk in GiB. Omitted means all remaining space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gibibytes: Option<u64>,

    /// RAID level for the logical disk
    pub level: RaidLevel,

    /// Name of the volume. Must be unique within the config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Select disks by rotational type (true = HDD, false = SSD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotational: Option<bool>,

    /// Number of physical disks to use for the logical disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_physical_disks: Option<u32>,

    /// Name of the RAID controller to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,

    /// Controller-specific names of the physical disks to use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareRaidVolume {
    /// Size of the logical disk in GiB. Omitted means all remaining space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gibibytes: Option<u64>,

    /// RAID level for the logical disk
    pub level: RaidLevel,

    /// Selectors for the physical disks backing the array
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<RootDeviceHints>,
}

/// Desired RAID configuration.
///
/// `hardware_raid_volumes: None` keeps whatever hardware RAID is already
/// configured, while `Some(vec![])` clears it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct RaidConfig {
    /// Hardware RAID volumes
    #[serde(rename = "hardwareRAIDVolumes", default)]
    pub hardware_raid_volumes: Option<Vec<HardwareRaidVolume>>,

    /// Software RAID volumes
    #[serde(rename = "softwareRAIDVolumes", default)]
    pub software_raid_volumes: Option<Vec<SoftwareRaidVolume>>,
}

impl RaidConfig {
    /// Hardware volumes, empty when unset.
    #[must_use]
    pub fn hardware(&self) -> &[HardwareRaidVolume] {
        self.hardware_raid_volumes.as_deref().unwrap_or_default()
    }

    /// Software volumes, empty when unset.
    #[must_use]
    pub fn software(&self) -> &[SoftwareRaidVolume] {
        self.software_raid_volumes.as_deref().unwrap_or_default()
    }

    /// True when neither kind of volume is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hardware().is_empty() && self.software().is_empty()
    }
}
