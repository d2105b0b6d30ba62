//! RAID configuration builder and validator
//!
//! Turns the desired [`RaidConfig`] of a host into backend logical disks and
//! clean steps. Validation runs before anything is sent to the backend, so
//! an invalid layout never leaves partial state behind.

use crate::devicehints::make_hint_map;
use crate::models::{CleanStep, DiskType, LogicalDisk};
use crds::{HardwareRaidVolume, RaidConfig, RaidLevel, SoftwareRaidVolume};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// RAID interface of drivers that cannot configure RAID
pub const NO_RAID_INTERFACE: &str = "no-raid";

/// RAID interface that builds software RAID from the deploy ramdisk
pub const SOFTWARE_RAID_INTERFACE: &str = "agent";

/// Controller name used for software RAID volumes
pub const SOFTWARE_RAID_CONTROLLER: &str = "software";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RaidError {
    #[error("hardwareRAIDVolumes and softwareRAIDVolumes can not be set at the same time")]
    MutuallyExclusive,

    #[error("the names({name}) of volume[{index}] and volume[{previous}] are repeated")]
    DuplicateName {
        name: String,
        index: usize,
        previous: usize,
    },

    #[error("'physicalDisks' specified without 'controller' in hardware RAID volume {0}")]
    PhysicalDisksWithoutController(usize),

    #[error(
        "the 'numberOfPhysicalDisks'[{expected}] and number of 'physicalDisks'[{actual}] is not same for volume {index}"
    )]
    PhysicalDiskCountMismatch {
        expected: u32,
        actual: usize,
        index: usize,
    },

    #[error("the level in first volume of software raid must be RAID1")]
    SoftwareRootNotRaid1,

    #[error("raid settings are defined, but the node's driver {0} does not support RAID")]
    RaidUnsupported(String),

    #[error("node's driver {0} does not support hardware RAID")]
    HardwareRaidUnsupported(String),

    #[error("node's driver {0} does not support software RAID")]
    SoftwareRaidUnsupported(String),
}

/// Check a RAID layout for internal consistency.
///
/// # Errors
///
/// The first rule the layout breaks.
pub fn validate_raid(raid: Option<&RaidConfig>) -> Result<(), RaidError> {
    let Some(raid) = raid else {
        return Ok(());
    };

    if !raid.hardware().is_empty() && !raid.software().is_empty() {
        return Err(RaidError::MutuallyExclusive);
    }

    let mut names: HashMap<&str, usize> = HashMap::new();
    for (index, volume) in raid.hardware().iter().enumerate() {
        if let Some(name) = volume.name.as_deref().filter(|n| !n.is_empty()) {
            if let Some(previous) = names.insert(name, index) {
                return Err(RaidError::DuplicateName {
                    name: name.to_string(),
                    index,
                    previous,
                });
            }
        }

        if volume.physical_disks.is_empty() {
            continue;
        }
        if volume.controller.as_deref().unwrap_or_default().is_empty() {
            return Err(RaidError::PhysicalDisksWithoutController(index));
        }
        if let Some(expected) = volume.number_of_physical_disks {
            if expected as usize != volume.physical_disks.len() {
                return Err(RaidError::PhysicalDiskCountMismatch {
                    expected,
                    actual: volume.physical_disks.len(),
                    index,
                });
            }
        }
    }

    if let Some(first) = raid.software().first() {
        if first.level != RaidLevel::Raid1 {
            return Err(RaidError::SoftwareRootNotRaid1);
        }
    }

    Ok(())
}

/// Check that the driver's RAID interface can apply `raid`.
///
/// # Errors
///
/// When volumes are requested of a kind the interface cannot build.
pub fn check_raid_configure(raid_interface: &str, raid: Option<&RaidConfig>) -> Result<(), RaidError> {
    let Some(raid) = raid else {
        return Ok(());
    };

    match raid_interface {
        NO_RAID_INTERFACE if !raid.is_empty() => Err(RaidError::RaidUnsupported(raid_interface.to_string())),
        SOFTWARE_RAID_INTERFACE if !raid.hardware().is_empty() => {
            Err(RaidError::HardwareRaidUnsupported(raid_interface.to_string()))
        }
        NO_RAID_INTERFACE | SOFTWARE_RAID_INTERFACE => Ok(()),
        _ if raid.hardware().is_empty() && !raid.software().is_empty() => {
            Err(RaidError::SoftwareRaidUnsupported(raid_interface.to_string()))
        }
        _ => Ok(()),
    }
}

/// Build the backend logical disks for `raid`.
///
/// Hardware volumes take precedence. When `has_root_device_hints` is false
/// the first disk is marked as the root volume.
///
/// # Errors
///
/// Any [`validate_raid`] failure.
pub fn build_target_raid_config(
    raid: Option<&RaidConfig>,
    has_root_device_hints: bool,
) -> Result<Vec<LogicalDisk>, RaidError> {
    validate_raid(raid)?;
    let Some(raid) = raid else {
        return Ok(Vec::new());
    };

    let mut disks: Vec<LogicalDisk> = if raid.hardware().is_empty() {
        raid.software().iter().map(software_logical_disk).collect()
    } else {
        raid.hardware().iter().map(hardware_logical_disk).collect()
    };

    if !has_root_device_hints {
        if let Some(first) = disks.first_mut() {
            first.is_root_volume = Some(true);
        }
    }

    Ok(disks)
}

fn hardware_logical_disk(volume: &HardwareRaidVolume) -> LogicalDisk {
    LogicalDisk {
        size_gb: volume.size_gibibytes,
        raid_level: volume.level.as_str().to_string(),
        volume_name: volume.name.clone().filter(|n| !n.is_empty()),
        is_root_volume: None,
        disk_type: volume
            .rotational
            .map(|rotational| if rotational { DiskType::Hdd } else { DiskType::Ssd }),
        number_of_physical_disks: volume.number_of_physical_disks,
        controller: volume.controller.clone().filter(|c| !c.is_empty()),
        physical_disks: volume
            .physical_disks
            .iter()
            .map(|disk| Value::String(disk.clone()))
            .collect(),
    }
}

fn software_logical_disk(volume: &SoftwareRaidVolume) -> LogicalDisk {
    LogicalDisk {
        size_gb: volume.size_gibibytes,
        raid_level: volume.level.as_str().to_string(),
        controller: Some(SOFTWARE_RAID_CONTROLLER.to_string()),
        physical_disks: volume
            .physical_disks
            .iter()
            .map(|hints| Value::Object(make_hint_map(Some(hints))))
            .collect(),
        ..Default::default()
    }
}

/// Clean steps that replace the current RAID layout with `raid`.
///
/// The old layout is always deleted. Software RAID also wipes device
/// metadata so a previous array is not picked up again.
#[must_use]
pub fn build_raid_clean_steps(raid: Option<&RaidConfig>) -> Vec<CleanStep> {
    let mut steps = vec![CleanStep::new("raid", "delete_configuration")];
    let Some(raid) = raid else {
        return steps;
    };

    if raid.hardware().is_empty() && !raid.software().is_empty() {
        steps.push(CleanStep::new("deploy", "erase_devices_metadata"));
    }
    if !raid.is_empty() {
        steps.push(CleanStep::new("raid", "create_configuration"));
    }
    steps
}

/// Clean steps needed to move from `actual` to `target` on a driver with
/// the given RAID interface. Empty when nothing changes.
///
/// Only the volume kind the interface manages is compared. A target with no
/// hardware volume list keeps whatever hardware RAID is already applied;
/// an explicit empty list removes it.
///
/// # Errors
///
/// Validation or capability errors, before any step is built.
pub fn raid_clean_steps_for(
    raid_interface: &str,
    target: Option<&RaidConfig>,
    actual: Option<&RaidConfig>,
) -> Result<Vec<CleanStep>, RaidError> {
    validate_raid(target)?;
    check_raid_configure(raid_interface, target)?;

    match raid_interface {
        NO_RAID_INTERFACE => Ok(Vec::new()),
        SOFTWARE_RAID_INTERFACE => Ok(software_raid_steps(target, actual)),
        _ => Ok(hardware_raid_steps(target, actual)),
    }
}

fn software_raid_steps(target: Option<&RaidConfig>, actual: Option<&RaidConfig>) -> Vec<CleanStep> {
    let wanted = target.map_or(&[][..], RaidConfig::software);
    let applied = actual.map_or(&[][..], RaidConfig::software);
    if wanted == applied {
        return Vec::new();
    }

    let mut steps = vec![
        CleanStep::new("raid", "delete_configuration"),
        CleanStep::new("deploy", "erase_devices_metadata"),
    ];
    if !wanted.is_empty() {
        steps.push(CleanStep::new("raid", "create_configuration"));
    }
    steps
}

fn hardware_raid_steps(target: Option<&RaidConfig>, actual: Option<&RaidConfig>) -> Vec<CleanStep> {
    let Some(wanted) = target.and_then(|t| t.hardware_raid_volumes.as_ref()) else {
        return Vec::new();
    };
    if actual.and_then(|a| a.hardware_raid_volumes.as_ref()) == Some(wanted) {
        return Vec::new();
    }

    build_raid_clean_steps(Some(&RaidConfig {
        hardware_raid_volumes: Some(wanted.clone()),
        software_raid_volumes: None,
    }))
}
