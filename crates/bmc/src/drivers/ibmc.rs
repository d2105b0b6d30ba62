//! Huawei iBMC driver

use crate::access::{AccessDetails, DriverInfo, host_with_port, transport_scheme};
use crate::credentials::Credentials;
use crate::error::BmcError;
use serde_json::json;
use url::Url;

const IBMC: &str = "ibmc";

#[derive(Debug, Clone)]
pub struct IbmcAccessDetails {
    bmc_type: String,
    host: String,
    path: String,
    disable_certificate_verification: bool,
}

impl IbmcAccessDetails {
    pub fn factory(url: &Url, disable_certificate_verification: bool) -> Result<Box<dyn AccessDetails>, BmcError> {
        Ok(Box::new(Self {
            bmc_type: url.scheme().to_string(),
            host: host_with_port(url),
            path: url.path().to_string(),
            disable_certificate_verification,
        }))
    }
}

impl AccessDetails for IbmcAccessDetails {
    fn bmc_type(&self) -> &str {
        &self.bmc_type
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn driver(&self) -> &'static str {
        IBMC
    }

    fn disable_certificate_verification(&self) -> bool {
        self.disable_certificate_verification
    }

    fn driver_info(&self, credentials: &Credentials) -> DriverInfo {
        let transport = transport_scheme(&self.bmc_type).unwrap_or("https");

        let mut info = DriverInfo::new();
        info.insert(
            "ibmc_address".into(),
            json!(format!("{transport}://{}{}", self.host, self.path)),
        );
        info.insert("ibmc_username".into(), json!(credentials.username));
        info.insert("ibmc_password".into(), json!(credentials.password));
        if self.disable_certificate_verification {
            info.insert("ibmc_verify_ca".into(), json!(false));
        }
        info
    }

    fn boot_interface(&self) -> &'static str {
        "pxe"
    }

    fn management_interface(&self) -> &'static str {
        IBMC
    }

    fn power_interface(&self) -> &'static str {
        IBMC
    }
}
