//! Mock provisioner for unit testing
//!
//! This module provides a scripted implementation of [`ProvisionerTrait`]
//! that can be used in controller tests without a running backend. Each
//! operation pops the next queued [`OperationResult`] for its name and
//! answers `complete` when the queue is empty. Every call is recorded.

use crate::error::IronicError;
use crate::models::*;
use crate::provisioner_trait::ProvisionerTrait;
use crds::{AutomatedCleaningMode, HardwareDetails, RebootMode};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct MockState {
    ready: bool,
    capacity: bool,
    provisioning_id: String,
    results: HashMap<String, VecDeque<OperationResult>>,
    started: HashMap<String, bool>,
    failures: HashMap<String, String>,
    unregistered: HashSet<String>,
    details: Option<HardwareDetails>,
    powered_on: Option<bool>,
    firmware: Vec<FirmwareComponent>,
    image_formats: Vec<ImageFormat>,
    disable_power_off: bool,
    calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            ready: true,
            capacity: true,
            provisioning_id: "mock-node-uuid".to_string(),
            results: HashMap::new(),
            started: HashMap::new(),
            failures: HashMap::new(),
            unregistered: HashSet::new(),
            details: None,
            powered_on: Some(false),
            firmware: Vec::new(),
            image_formats: Vec::new(),
            disable_power_off: true,
            calls: Vec::new(),
        }
    }
}

/// Mock provisioner for testing
///
/// Clones share state, so a test can keep a handle while the controller
/// context owns another.
#[derive(Debug, Clone, Default)]
pub struct MockIronicClient {
    state: Arc<Mutex<MockState>>,
}

impl MockIronicClient {
    /// Create a new mock: ready, with capacity, every operation complete
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a result for the next call of `operation` (for test setup)
    pub fn add_result(&self, operation: &str, result: OperationResult) {
        self.state()
            .results
            .entry(operation.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make the next call of `operation` fail with a transport error
    pub fn add_failure(&self, operation: &str, message: &str) {
        self.state()
            .failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Make `operation` report the host as unknown to the backend
    pub fn set_unregistered(&self, operation: &str) {
        self.state().unregistered.insert(operation.to_string());
    }

    /// Value of the `started` flag for prepare, service and inspect
    pub fn set_started(&self, operation: &str, started: bool) {
        self.state().started.insert(operation.to_string(), started);
    }

    pub fn set_ready(&self, ready: bool) {
        self.state().ready = ready;
    }

    pub fn set_capacity(&self, capacity: bool) {
        self.state().capacity = capacity;
    }

    pub fn set_provisioning_id(&self, id: &str) {
        self.state().provisioning_id = id.to_string();
    }

    /// Inventory returned once inspection completes
    pub fn set_hardware_details(&self, details: HardwareDetails) {
        self.state().details = Some(details);
    }

    pub fn set_powered_on(&self, powered_on: Option<bool>) {
        self.state().powered_on = powered_on;
    }

    pub fn set_firmware_components(&self, components: Vec<FirmwareComponent>) {
        self.state().firmware = components;
    }

    pub fn set_image_formats(&self, formats: Vec<ImageFormat>) {
        self.state().image_formats = formats;
    }

    pub fn set_supports_disable_power_off(&self, supported: bool) {
        self.state().disable_power_off = supported;
    }

    /// Names of the operations called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls of `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Record the call and return its scripted outcome
    fn next(&self, operation: &str) -> Result<OperationResult, IronicError> {
        let mut state = self.state();
        state.calls.push(operation.to_string());

        if state.unregistered.contains(operation) {
            return Err(IronicError::NeedsRegistration);
        }
        if let Some(message) = state.failures.remove(operation) {
            return Err(IronicError::Api(message));
        }
        Ok(state
            .results
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    fn started(&self, operation: &str) -> bool {
        self.state().started.get(operation).copied().unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl ProvisionerTrait for MockIronicClient {
    async fn try_init(&self) -> Result<bool, IronicError> {
        self.state().calls.push("try_init".to_string());
        Ok(self.state().ready)
    }

    async fn has_capacity(&self, _host: &HostData) -> Result<bool, IronicError> {
        self.state().calls.push("has_capacity".to_string());
        Ok(self.state().capacity)
    }

    async fn register(
        &self,
        _host: &HostData,
        _data: &ManagementAccessData,
        _credentials_changed: bool,
        _restart_on_failure: bool,
    ) -> Result<(OperationResult, String), IronicError> {
        let result = self.next("register")?;
        Ok((result, self.state().provisioning_id.clone()))
    }

    async fn preprovisioning_image_formats(&self, _host: &HostData) -> Result<Vec<ImageFormat>, IronicError> {
        Ok(self.state().image_formats.clone())
    }

    async fn inspect_hardware(
        &self,
        _host: &HostData,
        _data: &InspectData,
        _restart_on_failure: bool,
        _refresh: bool,
        _force_reboot: bool,
    ) -> Result<InspectResult, IronicError> {
        let result = self.next("inspect_hardware")?;
        let details = if result.is_pending() {
            None
        } else {
            Some(self.state().details.clone().unwrap_or_default())
        };
        Ok(InspectResult {
            result,
            started: self.started("inspect_hardware"),
            details,
        })
    }

    async fn update_hardware_state(&self, _host: &HostData) -> Result<HardwareState, IronicError> {
        self.next("update_hardware_state")?;
        Ok(HardwareState {
            powered_on: self.state().powered_on,
        })
    }

    async fn adopt(
        &self,
        _host: &HostData,
        _data: &AdoptData,
        _restart_on_failure: bool,
    ) -> Result<OperationResult, IronicError> {
        self.next("adopt")
    }

    async fn prepare(
        &self,
        _host: &HostData,
        _data: &PrepareData,
        _unprepared: bool,
        _restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError> {
        let result = self.next("prepare")?;
        Ok((result, self.started("prepare")))
    }

    async fn provision(
        &self,
        _host: &HostData,
        _data: &ProvisionData,
        _force_reboot: bool,
    ) -> Result<OperationResult, IronicError> {
        self.next("provision")
    }

    async fn deprovision(
        &self,
        _host: &HostData,
        _restart_on_failure: bool,
        _automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError> {
        self.next("deprovision")
    }

    async fn delete(&self, _host: &HostData) -> Result<OperationResult, IronicError> {
        self.next("delete")
    }

    async fn detach(&self, _host: &HostData) -> Result<OperationResult, IronicError> {
        self.next("detach")
    }

    async fn power_on(&self, _host: &HostData, _force: bool) -> Result<OperationResult, IronicError> {
        let result = self.next("power_on")?;
        if !result.is_pending() {
            self.state().powered_on = Some(true);
        }
        Ok(result)
    }

    async fn power_off(
        &self,
        _host: &HostData,
        _mode: RebootMode,
        _force: bool,
        _automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError> {
        let result = self.next("power_off")?;
        if !result.is_pending() {
            self.state().powered_on = Some(false);
        }
        Ok(result)
    }

    async fn service(
        &self,
        _host: &HostData,
        _data: &ServicingData,
        _unprepared: bool,
        _restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError> {
        let result = self.next("service")?;
        Ok((result, self.started("service")))
    }

    async fn get_firmware_components(&self, _host: &HostData) -> Result<Vec<FirmwareComponent>, IronicError> {
        self.next("get_firmware_components")?;
        Ok(self.state().firmware.clone())
    }

    fn supports_disable_power_off(&self) -> bool {
        self.state().disable_power_off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_scripted_results_then_complete() {
        let mock = MockIronicClient::new();
        mock.add_result("provision", OperationResult::continuing(Duration::from_secs(10)));

        let host = HostData::default();
        let data = ProvisionData::default();
        assert!(mock.provision(&host, &data, false).await.unwrap().dirty);
        assert_eq!(
            mock.provision(&host, &data, false).await.unwrap(),
            OperationResult::complete(),
            "Empty queue means complete"
        );
        assert_eq!(mock.call_count("provision"), 2);
    }

    #[tokio::test]
    async fn test_failure_fires_once() {
        let mock = MockIronicClient::new();
        mock.add_failure("delete", "connection refused");

        let host = HostData::default();
        assert!(mock.delete(&host).await.is_err());
        assert!(mock.delete(&host).await.is_ok(), "Failure should be consumed");
    }
}
