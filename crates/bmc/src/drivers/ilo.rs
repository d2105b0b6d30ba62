//! HPE iLO drivers: `ilo4`, `ilo4-virtualmedia` and `ilo5`

use crate::access::{AccessDetails, DriverInfo, bare_hostname};
use crate::bios::{BiosSetting, ILO_BIOS, build_bios_settings};
use crate::credentials::Credentials;
use crate::error::BmcError;
use crds::FirmwareConfig;
use serde_json::json;
use url::Url;

#[derive(Debug, Clone)]
struct IloBase {
    bmc_type: String,
    port: Option<u16>,
    hostname: String,
    disable_certificate_verification: bool,
}

impl IloBase {
    fn from_url(url: &Url, disable_certificate_verification: bool) -> Self {
        Self {
            bmc_type: url.scheme().to_string(),
            port: url.port(),
            hostname: bare_hostname(url),
            disable_certificate_verification,
        }
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let mut info = DriverInfo::new();
        info.insert("ilo_username".into(), json!(credentials.username));
        info.insert("ilo_password".into(), json!(credentials.password));
        info.insert("ilo_address".into(), json!(self.hostname));
        if let Some(port) = self.port {
            info.insert("client_port".into(), json!(port.to_string()));
        }
        if self.disable_certificate_verification {
            info.insert("ilo_verify_ca".into(), json!(false));
        }
        info
    }
}

#[derive(Debug, Clone)]
pub struct Ilo4AccessDetails {
    base: IloBase,
}

impl Ilo4AccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: IloBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for Ilo4AccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        "ilo"
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "ilo-ipxe"
    }

    fn raid_interface(&self) -> &'static str {
        "no-raid"
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &ILO_BIOS))
    }
}

#[derive(Debug, Clone)]
pub struct Ilo4VirtualMediaAccessDetails {
    base: IloBase,
}

impl Ilo4VirtualMediaAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: IloBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for Ilo4VirtualMediaAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        "ilo"
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "ilo-virtual-media"
    }

    fn raid_interface(&self) -> &'static str {
        "no-raid"
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
        Ok(build_bios_settings(firmware, &ILO_BIOS))
    }
}

#[derive(Debug, Clone)]
pub struct Ilo5AccessDetails {
    base: IloBase,
}

impl Ilo5AccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            base: IloBase::from_url(url, disable_certificate_verification),
        }))
    }
}

impl AccessDetails for Ilo5AccessDetails {
    fn bmc_type(&self) -> &str {
        &self.base.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        "ilo5"
    }

    fn disable_certificate_verification(&self) -> bool {
        self.base.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        self.base.driver_info(credentials)
    }

    fn boot_interface(&self) -> &'static str {
        "ilo-ipxe"
    }

    fn raid_interface(&self) -> &'static str {
        "ilo5"
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &ILO_BIOS))
    }
}
