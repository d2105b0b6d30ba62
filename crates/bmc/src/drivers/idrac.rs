//! Dell iDRAC drivers: WS-Man (`idrac`), Redfish (`idrac-redfish`) and
//! Redfish virtual media (`idrac-virtualmedia`)

use super::redfish::RedfishBase;
use crate::access::{AccessDetails, DriverInfo, bare_hostname, transport_scheme};
use crate::bios::{BiosSetting, IDRAC_BIOS, build_bios_settings};
use crate::credentials::Credentials;
use crate::error::BmcError;
use crds::FirmwareConfig;
use serde_json::json;
use url::Url;

const IDRAC: &str = "idrac";
const IDRAC_REDFISH: &str = "idrac-redfish";

#[derive(Debug, Clone)]
pub struct IdracAccessDetails {
    bmc_type: String,
    port: Option<u16>,
    hostname: String,
    path: String,
    disable_certificate_verification: bool,
}

impl IdracAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            bmc_type: url.scheme().to_string(),
            port: url.port(),
            hostname: bare_hostname(url),
            path: url.path().to_string(),
            disable_certificate_verification,
        }))
    }
}

impl AccessDetails for IdracAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.bmc_type
    }

    fn needs_mac(&self) -> bool {
        false
    }

    fn driver(&self) -> &'static str {
        IDRAC
    }

    fn disable_certificate_verification(&self) -> bool {
        self.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let mut info = DriverInfo::new();
        info.insert("drac_username".into(), json!(credentials.username));
        info.insert("drac_password".into(), json!(credentials.password));
        info.insert("drac_address".into(), json!(self.hostname));
        if let Some(port) = self.port {
            info.insert("drac_port".into(), json!(port.to_string()));
        }
        if !self.path.is_empty() {
            info.insert("drac_path".into(), json!(self.path));
        }
        if let Some(protocol) = transport_scheme(&self.bmc_type) {
            info.insert("drac_protocol".into(), json!(protocol));
        }
        if self.disable_certificate_verification {
            info.insert("drac_verify_ca".into(), json!(false));
        }
        info
    }

    fn boot_interface(&self) -> &'static str {
        "ipxe"
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &IDRAC_BIOS))
    }
}

#[derive(Debug, Clone)]
pub struct IdracRedfishAccessDetails {
    base: RedfishBase,
}

impl IdracRedfishAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: RedfishBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for IdracRedfishAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        IDRAC
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

    fn bios_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn firmware_interface(&self) -> &'static str {
        "redfish"
    }

    fn management_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn power_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn raid_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn vendor_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &IDRAC_BIOS))
    }
}

#[derive(Debug, Clone)]
pub struct IdracVirtualMediaAccessDetails {
    base: RedfishBase,
}

impl IdracVirtualMediaAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: RedfishBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for IdracVirtualMediaAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        IDRAC
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "idrac-redfish-virtual-media"
    }

    fn bios_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn firmware_interface(&self) -> &'static str {
        "redfish"
    }

    fn management_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn power_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn raid_interface(&self) -> &'static str {
        IDRAC_REDFISH
    }

    fn vendor_interface(&self) -> &'static str {
        IDRAC_REDFISH
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

    /// Settings go through the idrac-redfish BIOS interface, so the iDRAC names apply.
    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &IDRAC_BIOS))
    }
}
