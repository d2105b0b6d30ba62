//! Ironic provisioning backend client
//!
//! A Rust client for the Ironic v1 REST API, shaped around what a bare-metal
//! host controller needs: each [`ProvisionerTrait`] operation looks at the
//! backend node and takes the next step towards the requested state,
//! answering with an [`OperationResult`].
//!
//! # Example
//!
//! ```no_run
//! use ironic_client::{HostData, IronicClient, IronicConfig, ProvisionerTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IronicClient::new(
//!     "http://ironic:6385".to_string(),
//!     None,
//!     IronicConfig::default(),
//! )?;
//!
//! // Wait until the backend answers and negotiate the microversion
//! while !client.try_init().await? {}
//!
//! let host = HostData {
//!     namespace: "metal".to_string(),
//!     name: "host-0".to_string(),
//!     provisioning_id: "3c9a9a5d-5c2f-4a1b-9d2a-8b8f0c1f2e11".to_string(),
//!     ..Default::default()
//! };
//! let result = client.power_on(&host, false).await?;
//! if result.dirty {
//!     println!("check back in {:?}", result.requeue_after);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Registration**: Enroll nodes, create boot ports, detect MAC conflicts
//! - **Lifecycle**: Inspection, manual cleaning, deployment, deprovisioning
//! - **RAID**: Validate layouts and build logical disks and clean steps
//! - **Power**: Soft power-off with hard fallback
//! - **Testing**: `test-util` feature with a scripted `MockIronicClient`

pub mod client;
pub mod common;
pub mod devicehints;
pub mod error;
pub mod inventory;
pub mod models;
pub mod raid;
#[path = "trait.rs"]
pub mod provisioner_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{IronicClient, IronicConfig};
pub use common::HttpClient;
pub use error::IronicError;
pub use models::*;
pub use provisioner_trait::ProvisionerTrait;
pub use raid::{RaidError, check_raid_configure, validate_raid};
#[cfg(feature = "test-util")]
pub use mock::MockIronicClient;

#[cfg(test)]
mod client_test;
