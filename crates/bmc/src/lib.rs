//! BMC access details
//!
//! Turns a BMC address string such as `redfish-virtualmedia://10.0.0.5/redfish/v1/Systems/1`
//! into an [`AccessDetails`] value describing how the provisioning backend
//! must talk to that controller: driver family, per-aspect interface names,
//! capability predicates and the vendor-specific driver-info payload.
//!
//! # Example
//!
//! ```
//! use bmc::{Credentials, DriverRegistry};
//!
//! let registry = DriverRegistry::with_default_drivers();
//! let access = registry
//!     .new_access_details("idrac-virtualmedia://192.168.122.1", false)
//!     .unwrap();
//!
//! assert_eq!(access.driver(), "idrac");
//! assert_eq!(access.boot_interface(), "idrac-redfish-virtual-media");
//! assert!(access.needs_mac());
//!
//! let info = access.driver_info(&Credentials::new("admin", "secret"));
//! assert_eq!(info["redfish_address"], "https://192.168.122.1");
//! ```

pub mod access;
pub mod address;
pub mod bios;
pub mod credentials;
pub mod drivers;
pub mod error;

pub use access::{AccessDetails, AccessDetailsFactory, DriverInfo, DriverRegistry};
pub use address::parse_address;
pub use bios::BiosSetting;
pub use credentials::Credentials;
pub use error::BmcError;
