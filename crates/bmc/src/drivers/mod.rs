//! Built-in BMC drivers

mod ibmc;
mod idrac;
mod ilo;
mod ipmi;
mod irmc;
mod redfish;

pub use ibmc::IbmcAccessDetails;
pub use idrac::{IdracAccessDetails, IdracRedfishAccessDetails, IdracVirtualMediaAccessDetails};
pub use ilo::{Ilo4AccessDetails, Ilo4VirtualMediaAccessDetails, Ilo5AccessDetails};
pub use ipmi::IpmiAccessDetails;
pub use irmc::IrmcAccessDetails;
pub use redfish::{RedfishAccessDetails, RedfishHttpBootAccessDetails, RedfishVirtualMediaAccessDetails};

use crate::access::DriverRegistry;

const HTTP_SCHEMES: &[&str] = &["http", "https"];

/// Register every built-in driver.
pub(crate) fn register_all(registry: &mut DriverRegistry) {
    registry.register("ipmi", IpmiAccessDetails::factory, &[]);
    registry.register("libvirt", IpmiAccessDetails::factory, &[]);

    registry.register("redfish", RedfishAccessDetails::factory, HTTP_SCHEMES);
    registry.register("redfish-virtualmedia", RedfishVirtualMediaAccessDetails::factory, HTTP_SCHEMES);
    registry.register("ilo5-virtualmedia", RedfishVirtualMediaAccessDetails::factory, HTTP_SCHEMES);
    registry.register("redfish-uefihttp", RedfishHttpBootAccessDetails::factory, HTTP_SCHEMES);

    registry.register("idrac", IdracAccessDetails::factory, HTTP_SCHEMES);
    registry.register("idrac-redfish", IdracRedfishAccessDetails::factory, HTTP_SCHEMES);
    registry.register("idrac-virtualmedia", IdracVirtualMediaAccessDetails::factory, HTTP_SCHEMES);

    registry.register("irmc", IrmcAccessDetails::factory, &[]);
    registry.register("ibmc", IbmcAccessDetails::factory, HTTP_SCHEMES);

    registry.register("ilo4", Ilo4AccessDetails::factory, &["https"]);
    registry.register("ilo4-virtualmedia", Ilo4VirtualMediaAccessDetails::factory, &["https"]);
    registry.register("ilo5", Ilo5AccessDetails::factory, &["https"]);
}
