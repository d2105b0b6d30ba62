//! Fujitsu iRMC driver

use crate::access::{AccessDetails, DriverInfo, bare_hostname};
use crate::bios::{BiosSetting, IRMC_BIOS, build_bios_settings};
use crate::credentials::Credentials;
use crate::error::BmcError;
use crds::FirmwareConfig;
use serde_json::json;
use url::Url;

#[derive(Debug, Clone)]
pub struct IrmcAccessDetails {
    bmc_type: String,
    port: Option<u16>,
    hostname: String,
    disable_certificate_verification: bool,
}

impl IrmcAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            bmc_type: url.scheme().to_string(),
            port: url.port(),
            hostname: bare_hostname(url),
            disable_certificate_verification,
        }))
    }
}

impl AccessDetails for IrmcAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        "irmc"
    }

    fn disable_certificate_verification(&self) -> bool {
        self.disable_certificate_verification
    }

    /// iRMC also needs the IPMI fields for sensor data collection.
    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let mut info = DriverInfo::new();
        info.insert("irmc_username".into(), json!(credentials.username));
        info.insert("irmc_password".into(), json!(credentials.password));
        info.insert("irmc_address".into(), json!(self.hostname));
        info.insert("ipmi_username".into(), json!(credentials.username));
        info.insert("ipmi_password".into(), json!(credentials.password));
        info.insert("ipmi_address".into(), json!(self.hostname));
        if let Some(port) = self.port {
            info.insert("irmc_port".into(), json!(port.to_string()));
        }
        if self.disable_certificate_verification {
            info.insert("irmc_verify_ca".into(), json!(false));
        }
        info
    }

    fn boot_interface(&self) -> &'static str {
        "ipxe"
    }

    fn raid_interface(&self) -> &'static str {
        "irmc"
    }

    fn supports_secure_boot(&self) -> bool {
        true
    }

    fn build_bios_settings(&self, firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(build_bios_settings(firmware, &IRMC_BIOS))
    }
}
