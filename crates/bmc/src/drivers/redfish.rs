//! Redfish drivers
//!
//! `redfish`, `redfish-virtualmedia` (also registered as `ilo5-virtualmedia`)
//! and `redfish-uefihttp` share [`RedfishBase`] for their connection fields
//! and differ only in boot interface and provisioning-network needs. The
//! iDRAC Redfish variants in [`super::idrac`] reuse the same base.

use crate::access::{AccessDetails, DriverInfo, host_with_port, transport_scheme};
use crate::bios::BiosSetting;
use crate::credentials::Credentials;
use crate::error::BmcError;
use crds::FirmwareConfig;
use serde_json::json;
use url::Url;

const REDFISH: &str = "redfish";
const DEFAULT_TRANSPORT: &str = "https";

/// Connection fields common to every Redfish-speaking driver.
#[derive(Debug, Clone)]
pub(crate) struct RedfishBase {
    pub(crate) bmc_type: String,
    host: String,
    path: String,
    pub(crate) disable_certificate_verification: bool,
}

impl RedfishBase {
    pub(crate) fn from_url(url: &Url, disable_certificate_verification: bool) -> Self {
        Self {
            bmc_type: url.scheme().to_string(),
            host: host_with_port(url),
            path: url.path().to_string(),
            disable_certificate_verification,
        }
    }

    /// `<transport>://host[:port]`, https unless the scheme says otherwise.
    pub(crate) fn address(&self) -> String {
        let transport = transport_scheme(&self.bmc_type).unwrap_or(DEFAULT_TRANSPORT);
        format!("{transport}://{}", self.host)
    }

    pub(crate) fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let mut info = DriverInfo::new();
        info.insert("redfish_system_id".into(), json!(self.path));
        info.insert("redfish_username".into(), json!(credentials.username));
        info.insert("redfish_password".into(), json!(credentials.password));
        info.insert("redfish_address".into(), json!(self.address()));
        if self.disable_certificate_verification {
            info.insert("redfish_verify_ca".into(), json!(false));
        }
        info
    }

    /// Plain Redfish has no BIOS interface to apply settings through.
    pub(crate) fn reject_firmware(firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        match firmware {
            Some(config) if !config.is_empty() => Err(BmcError::UnsupportedFirmware(REDFISH.to_string())),
            _ => Ok(Vec::new()),
        }
    }
}

/// Redfish with network (iPXE) boot.
#[derive(Debug, Clone)]
pub struct RedfishAccessDetails {
    base: RedfishBase,
}

impl RedfishAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: RedfishBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for RedfishAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        REDFISH
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "ipxe"
    }

    fn firmware_interface(&self) -> &'static str {
        REDFISH
    }

    fn raid_interface(&self) -> &'static str {
        REDFISH
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        RedfishBase::reject_firmware(firmware)
    }
}

/// Redfish booting from a virtual-media ISO; no provisioning network needed.
#[derive(Debug, Clone)]
pub struct RedfishVirtualMediaAccessDetails {
    base: RedfishBase,
}

impl RedfishVirtualMediaAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: RedfishBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for RedfishVirtualMediaAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        REDFISH
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "redfish-virtual-media"
    }

    fn firmware_interface(&self) -> &'static str {
        REDFISH
    }

    fn raid_interface(&self) -> &'static str {
        REDFISH
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn supports_iso_preprovisioning_image(&self) -> bool {
        true
    }

    fn requires_provisioning_network(&self) -> bool {
        false
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        RedfishBase::reject_firmware(firmware)
    }
}

/// Redfish booting over UEFI HTTP.
#[derive(Debug, Clone)]
pub struct RedfishHttpBootAccessDetails {
    base: RedfishBase,
}

impl RedfishHttpBootAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: RedfishBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for RedfishHttpBootAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        REDFISH
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "redfish-https"
    }

    fn firmware_interface(&self) -> &'static str {
        REDFISH
    }

    fn raid_interface(&self) -> &'static str {
        REDFISH
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn supports_iso_preprovisioning_image(&self) -> bool {
        true
    }

    fn requires_provisioning_network(&self) -> bool {
        false
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        RedfishBase::reject_firmware(firmware)
    }
}
