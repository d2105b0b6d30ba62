//! ProvisionerTrait for mocking
//!
//! This trait abstracts the provisioning backend so the host state machine
//! can be tested against an in-memory implementation. The concrete
//! [`IronicClient`](crate::IronicClient) implements it over HTTP.

use crate::error::IronicError;
use crate::models::*;
use crds::{AutomatedCleaningMode, RebootMode};

/// Operations the host state machine drives on the provisioning backend.
///
/// Every call is made for one host, identified by [`HostData`]. Operations
/// are idempotent: calling one again while the backend is still working
/// returns a dirty [`OperationResult`] rather than starting over.
///
/// Two error channels exist. A failure the backend reports for the host is
/// an `Ok` result with a non-empty `error_message`; transport or programming
/// failures are `Err`.
#[async_trait::async_trait]
pub trait ProvisionerTrait: Send + Sync {
    /// Probe the backend. Returns false until it answers.
    async fn try_init(&self) -> Result<bool, IronicError>;

    /// Whether the backend can take another host into a busy state.
    async fn has_capacity(&self, host: &HostData) -> Result<bool, IronicError>;

    /// Make sure a node exists for the host and carries current BMC
    /// settings. Returns the backend node ID alongside the result.
    async fn register(
        &self,
        host: &HostData,
        data: &ManagementAccessData,
        credentials_changed: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, String), IronicError>;

    /// Image formats the driver can boot a pre-provisioning agent from.
    async fn preprovisioning_image_formats(&self, host: &HostData) -> Result<Vec<ImageFormat>, IronicError>;

    /// Run or poll hardware inspection.
    async fn inspect_hardware(
        &self,
        host: &HostData,
        data: &InspectData,
        restart_on_failure: bool,
        refresh: bool,
        force_reboot: bool,
    ) -> Result<InspectResult, IronicError>;

    /// Current power state as seen by the backend.
    async fn update_hardware_state(&self, host: &HostData) -> Result<HardwareState, IronicError>;

    /// Take over a host that already runs a workload.
    async fn adopt(
        &self,
        host: &HostData,
        data: &AdoptData,
        restart_on_failure: bool,
    ) -> Result<OperationResult, IronicError>;

    /// Apply RAID and firmware settings. The flag reports whether manual
    /// cleaning was started by this call.
    async fn prepare(
        &self,
        host: &HostData,
        data: &PrepareData,
        unprepared: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError>;

    /// Deploy the image or custom deploy.
    async fn provision(
        &self,
        host: &HostData,
        data: &ProvisionData,
        force_reboot: bool,
    ) -> Result<OperationResult, IronicError>;

    /// Tear down the deployed image.
    async fn deprovision(
        &self,
        host: &HostData,
        restart_on_failure: bool,
        automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError>;

    /// Remove the node from the backend.
    async fn delete(&self, host: &HostData) -> Result<OperationResult, IronicError>;

    /// Remove the node without touching the workload.
    async fn detach(&self, host: &HostData) -> Result<OperationResult, IronicError>;

    async fn power_on(&self, host: &HostData, force: bool) -> Result<OperationResult, IronicError>;

    async fn power_off(
        &self,
        host: &HostData,
        mode: RebootMode,
        force: bool,
        automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError>;

    /// Apply firmware settings to a provisioned host. The flag reports
    /// whether servicing was started by this call.
    async fn service(
        &self,
        host: &HostData,
        data: &ServicingData,
        unprepared: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError>;

    async fn get_firmware_components(&self, host: &HostData) -> Result<Vec<FirmwareComponent>, IronicError>;

    /// Whether nodes may be created with power-off disabled.
    fn supports_disable_power_off(&self) -> bool;
}
