//! Vendor BIOS setting rendering

use crds::FirmwareConfig;
use serde::{Deserialize, Serialize};

/// One `{name, value}` pair of a BIOS `apply_configuration` clean step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BiosSetting {
    pub name: String,
    pub value: String,
}

/// Vendor names for the generic firmware toggles and the spelling of on/off.
#[derive(Debug, Clone, Copy)]
pub struct BiosMapping {
    pub virtualization: &'static str,
    pub simultaneous_multithreading: &'static str,
    pub sriov: &'static str,
    pub enabled: &'static str,
    pub disabled: &'static str,
}

pub const ILO_BIOS: BiosMapping = BiosMapping {
    virtualization: "ProcVirtualization",
    simultaneous_multithreading: "ProcHyperthreading",
    sriov: "Sriov",
    enabled: "Enabled",
    disabled: "Disabled",
};

pub const IRMC_BIOS: BiosMapping = BiosMapping {
    virtualization: "cpu_vt_enabled",
    simultaneous_multithreading: "hyper_threading_enabled",
    sriov: "single_root_io_virtualization_support_enabled",
    enabled: "True",
    disabled: "False",
};

pub const IDRAC_BIOS: BiosMapping = BiosMapping {
    virtualization: "ProcVirtualization",
    simultaneous_multithreading: "LogicalProc",
    sriov: "SriovGlobalEnable",
    enabled: "Enabled",
    disabled: "Disabled",
};

/// Render the toggles that are set, in field order. Unset toggles are skipped.
pub fn build_bios_settings(config: Option<&FirmwareConfig>, mapping: &BiosMapping) -> Vec<BiosSetting> {
    let Some(config) = config else {
        return Vec::new();
    };

    [
        (mapping.virtualization, config.virtualization_enabled),
        (mapping.simultaneous_multithreading, config.simultaneous_multithreading_enabled),
        (mapping.sriov, config.sriov_enabled),
    ]
    .into_iter()
    .filter_map(|(name, value)| {
        value.map(|on| BiosSetting {
            name: name.to_string(),
            value: if on { mapping.enabled } else { mapping.disabled }.to_string(),
        })
    })
    .collect()
}
