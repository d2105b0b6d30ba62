//! IPMI and libvirt (virtual BMC) driver

use crate::access::{AccessDetails, DriverInfo, bare_hostname};
use crate::credentials::Credentials;
use crate::error::BmcError;
use serde_json::json;
use url::Url;

const IPMI_DEFAULT_PORT: &str = "623";
const DEFAULT_PRIVILEGE_LEVEL: &str = "ADMINISTRATOR";

#[derive(Debug, Clone)]
pub struct IpmiAccessDetails {
    bmc_type: String,
    port: Option<u16>,
    hostname: String,
    privilege_level: String,
    disable_certificate_verification: bool,
}

impl IpmiAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        let privilege_level = url
            .query_pairs()
            .find(|(key, _)| key == "privilegelevel")
            .map_or_else(|| DEFAULT_PRIVILEGE_LEVEL.to_string(), |(_, value)| value.into_owned());

        Ok(Box::new(Self {
            bmc_type: url.scheme().to_string(),
            port: url.port(),
            hostname: bare_hostname(url),
            privilege_level,
            disable_certificate_verification,
        }))
    }
}

impl AccessDetails for IpmiAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.bmc_type
    }

    // libvirt hosts are virtual machines whose ports cannot be discovered
    fn needs_mac(&self) -> bool {
        self.bmc_type == "libvirt"
    }

    fn driver(&self) -> &'static str {
        "ipmi"
    }

    fn disable_certificate_verification(&self) -> bool {
        self.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let port = self
            .port
            .map_or_else(|| IPMI_DEFAULT_PORT.to_string(), |p| p.to_string());

        let mut info = DriverInfo::new();
        info.insert("ipmi_port".into(), json!(port));
        info.insert("ipmi_username".into(), json!(credentials.username));
        info.insert("ipmi_password".into(), json!(credentials.password));
        info.insert("ipmi_address".into(), json!(self.hostname));
        info.insert("ipmi_priv_level".into(), json!(self.privilege_level));
        if self.disable_certificate_verification {
            info.insert("ipmi_verify_ca".into(), json!(false));
        }
        info
    }

    fn boot_interface(&self) -> &'static str {
        "ipxe"
    }

    fn raid_interface(&self) -> &'static str {
        "no-raid"
    }
}
