//! DCops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the bare-metal host controller.

pub mod baremetal_host;
pub mod firmware;
pub mod hardware;
pub mod raid;
pub mod root_device_hints;

pub use baremetal_host::*;
pub use firmware::*;
pub use hardware::*;
pub use raid::*;
pub use root_device_hints::*;
