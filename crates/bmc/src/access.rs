//! AccessDetails trait and driver registry

use crate::address::parse_address;
use crate::bios::BiosSetting;
use crate::credentials::Credentials;
use crate::drivers;
use crate::error::BmcError;
use crds::FirmwareConfig;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Vendor connection fields passed to the backend as node driver-info.
pub type DriverInfo = serde_json::Map<String, serde_json::Value>;

/// Builds an [`AccessDetails`] from a parsed address and the
/// certificate-verification flag.
pub type AccessDetailsFactory = fn(&Url, bool) -> Result<Box<dyn AccessDetails>, BmcError>;

/// How the provisioning backend reaches one BMC.
///
/// Interface getters return an empty string to mean "backend default".
/// Nothing here performs network access.
pub trait AccessDetails: fmt::Debug + Send + Sync {
    /// The address scheme, e.g. `redfish+https`.
    fn bmc_type(&self) -> &str;

    /// True when a port for the boot MAC must be created up front instead
    /// of being discovered by inspection.
    fn needs_mac(&self) -> bool;

    /// Backend hardware type.
    fn driver(&self) -> &'static str;

    fn disable_certificate_verification(&self) -> bool;

    /// Connection fields for node enrollment, pre-populated with the address
    /// and credentials.
    fn driver_info(&self, credentials: &Credentials) -> DriverInfo;

    fn boot_interface(&self) -> &'static str;

    fn bios_interface(&self) -> &'static str {
        ""
    }

    fn firmware_interface(&self) -> &'static str {
        ""
    }

    fn management_interface(&self) -> &'static str {
        ""
    }

    fn power_interface(&self) -> &'static str {
        ""
    }

    fn raid_interface(&self) -> &'static str {
        ""
    }

    fn vendor_interface(&self) -> &'static str {
        ""
    }

    fn supports_secure_boot(&self) -> bool {
        false
    }

    fn supports_iso_preprovisioning_image(&self) -> bool {
        false
    }

    fn requires_provisioning_network(&self) -> bool {
        true
    }

    /// Vendor BIOS settings for the generic firmware toggles.
    fn build_bios_settings(&self, _firmware: Option<&FirmwareConfig>) -> Result<Vec<BiosSetting>, BmcError> {
        Ok(Vec::new())
    }
}

/// Maps address schemes to driver factories.
///
/// Built once at start-up and shared read-only by every reconcile.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, AccessDetailsFactory>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in driver.
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        drivers::register_all(&mut registry);
        registry
    }

    /// Register `factory` for `scheme` and for `scheme+<s>` for each entry of
    /// `url_schemes` (e.g. `redfish+https`).
    pub fn register(&mut self, scheme: &str, factory: AccessDetailsFactory, url_schemes: &[&str]) {
        self.factories.insert(scheme.to_string(), factory);
        for url_scheme in url_schemes {
            self.factories.insert(format!("{scheme}+{url_scheme}"), factory);
        }
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Parse `address` and build the matching driver's access details.
    pub fn new_access_details(
        &self,
        address: &str,
        disable_certificate_verification: bool,
    ) -> Result<Box<dyn AccessDetails>, BmcError> {
        let parsed = parse_address(address)?;

        let factory = self
            .factories
            .get(parsed.scheme())
            .ok_or_else(|| BmcError::UnknownBmcType {
                address: address.to_string(),
                bmc_type: parsed.scheme().to_string(),
            })?;

        let details = factory(&parsed, disable_certificate_verification)?;
        debug!(
            address = %address,
            driver = details.driver(),
            boot_interface = details.boot_interface(),
            "Resolved BMC access details"
        );
        Ok(details)
    }
}

/// The part of a `driver+http` style scheme after `+`, if any.
pub(crate) fn transport_scheme(bmc_type: &str) -> Option<&str> {
    bmc_type.split_once('+').map(|(_, transport)| transport)
}

/// `host[:port]` of a parsed address, with IPv6 literals bracketed.
pub(crate) fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Hostname without IPv6 brackets.
pub(crate) fn bare_hostname(url: &Url) -> String {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}
