//! Ironic API client
//!
//! Implements [`ProvisionerTrait`] against the Ironic v1 REST API. Every
//! operation reads the node, compares its provision state with where the
//! host should be, and issues at most one mutating call. The host state
//! machine calls the same operation again until it reports completion.

use crate::common::HttpClient;
use crate::common::update::NodeUpdater;
use crate::devicehints::make_hint_map;
use crate::error::IronicError;
use crate::inventory::{InventoryData, hardware_details};
use crate::models::*;
use crate::provisioner_trait::ProvisionerTrait;
use crate::raid::{NO_RAID_INTERFACE, build_target_raid_config, raid_clean_steps_for};
use bmc::{AccessDetails, DriverInfo};
use crds::{
    AutomatedCleaningMode, BootMode, ChecksumType, CustomDeploy, FirmwareConfig, Image,
    ProvisioningState, RebootMode, custom_deploy_method,
};
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Microversion assumed until the backend has been probed
pub const DEFAULT_MICROVERSION: u32 = 81;

/// Highest microversion this client speaks
pub const MAX_MICROVERSION: u32 = 95;

const FIRMWARE_MICROVERSION: u32 = 86;
const SERVICING_MICROVERSION: u32 = 87;
const DISABLE_POWER_OFF_MICROVERSION: u32 = 95;

const CUSTOM_DEPLOY_PRIORITY: u32 = 80;
const LIVE_ISO_FORMAT: &str = "live-iso";
const DELETE_MAINTENANCE_REASON: &str = "forcing deletion by the bare-metal host controller";

/// Backend settings shared by all hosts
#[derive(Debug, Clone)]
pub struct IronicConfig {
    /// Deploy kernel for the agent ramdisk
    pub deploy_kernel_url: Option<String>,
    /// Deploy ramdisk for the agent
    pub deploy_ramdisk_url: Option<String>,
    /// Hosts allowed in busy states at once
    pub max_busy_hosts: usize,
    pub provisioning_network_disabled: bool,
}

impl Default for IronicConfig {
    fn default() -> Self {
        Self {
            deploy_kernel_url: None,
            deploy_ramdisk_url: None,
            max_busy_hosts: 20,
            provisioning_network_disabled: false,
        }
    }
}

/// Outcome of a call the backend may refuse while the node is busy
enum Attempt<T> {
    Applied(T),
    Pending(OperationResult),
}

/// Ironic API client
pub struct IronicClient {
    http: HttpClient,
    config: IronicConfig,
    microversion: Arc<AtomicU32>,
}

impl IronicClient {
    /// Create a new Ironic client
    ///
    /// # Arguments
    /// * `base_url` - Ironic endpoint (e.g., "http://ironic:6385")
    /// * `auth` - optional HTTP basic auth username and password
    /// * `config` - deploy image and capacity settings
    pub fn new(
        base_url: String,
        auth: Option<(String, String)>,
        config: IronicConfig,
    ) -> Result<Self, IronicError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(IronicError::Http)?;
        let microversion = Arc::new(AtomicU32::new(DEFAULT_MICROVERSION));

        Ok(Self {
            http: HttpClient::new(client, base_url, auth, Arc::clone(&microversion)),
            config,
            microversion,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Negotiated minor microversion
    pub fn microversion(&self) -> u32 {
        self.microversion.load(Ordering::Relaxed)
    }

    fn has_servicing(&self) -> bool {
        self.microversion() >= SERVICING_MICROVERSION
    }

    // Node lookup

    async fn get_node(&self, host: &HostData) -> Result<Node, IronicError> {
        if host.provisioning_id.is_empty() {
            return Err(IronicError::NeedsRegistration);
        }

        match self.http.get::<Node>(&node_path(&host.provisioning_id)).await {
            Ok(node) => {
                debug!("found existing node by ID {}", node.uuid);
                Ok(node)
            }
            Err(IronicError::NotFound(_)) => Err(IronicError::NeedsRegistration),
            Err(e) => Err(IronicError::Api(format!(
                "failed to find node by ID {}: {}",
                host.provisioning_id, e
            ))),
        }
    }

    async fn list_ports(&self, filter: &str) -> Result<Vec<Port>, IronicError> {
        let list: PortList = self
            .http
            .get(&format!("/v1/ports?{}&fields=uuid,node_uuid,address", filter))
            .await?;
        Ok(list.ports)
    }

    /// Look for a node registered for this host by ID, by name, then by
    /// boot MAC.
    async fn find_existing_node(&self, host: &HostData) -> Result<Option<Node>, IronicError> {
        match self.get_node(host).await {
            Err(IronicError::NeedsRegistration) => {}
            other => return other.map(Some),
        }

        let mut names = vec![host.node_name()];
        if !host.name.contains(NAME_SEPARATOR) {
            names.push(host.name.clone());
        }
        for name in names {
            debug!("looking for existing node by name {}", name);
            match self.http.get::<Node>(&node_path(&name)).await {
                Ok(node) => {
                    debug!("found existing node {} by name {}", node.uuid, name);
                    return Ok(Some(node));
                }
                Err(IronicError::NotFound(_)) => info!("node with name {} doesn't exist", name),
                Err(e) => {
                    return Err(IronicError::Api(format!(
                        "failed to find node by name {}: {}",
                        name, e
                    )));
                }
            }
        }

        let Some(mac) = host.boot_mac.as_deref().filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        info!("looking for existing node by MAC {}", mac);
        let ports = match self.list_ports(&format!("address={}", mac)).await {
            Ok(ports) => ports,
            Err(e) => {
                info!("failed to find an existing port with address {}: {}", mac, e);
                return Ok(None);
            }
        };
        let Some(port) = ports.first() else {
            info!("port with address {} doesn't exist", mac);
            return Ok(None);
        };

        match self.http.get::<Node>(&node_path(&port.node_uuid)).await {
            Ok(node) => match node.name.as_deref().filter(|n| !n.is_empty()) {
                // A named node would have been found by name above
                Some(existing) => Err(IronicError::MacAddressConflict {
                    address: mac.to_string(),
                    node: existing.to_string(),
                }),
                None => Ok(Some(node)),
            },
            Err(IronicError::NotFound(_)) => Err(IronicError::Api(format!(
                "port {} exists but linked node {} doesn't",
                mac, port.node_uuid
            ))),
            Err(e) => Err(IronicError::Api(format!(
                "port {} exists but failed to find linked node {} by ID: {}",
                mac, port.node_uuid, e
            ))),
        }
    }

    async fn create_port(&self, node_uuid: &str, mac: &str) -> Result<(), IronicError> {
        info!("creating PXE enabled port for node {}, MAC {}", node_uuid, mac);
        let body = json!({"node_uuid": node_uuid, "address": mac, "pxe_enabled": true});
        self.http
            .post::<Port>("/v1/ports", &body)
            .await
            .map_err(|e| {
                IronicError::Api(format!(
                    "failed to create ironic port for node {}, MAC: {}: {}",
                    node_uuid, mac, e
                ))
            })?;
        Ok(())
    }

    /// Create the boot port unless the node already has one or the MAC is
    /// taken by another port.
    async fn ensure_port(&self, node: &Node, mac: &str) -> Result<(), IronicError> {
        let assigned = self.list_ports(&format!("node={}", node.uuid)).await?;
        if !assigned.is_empty() {
            debug!("node {} has assigned port", node.uuid);
            return Ok(());
        }
        let allocated = self.list_ports(&format!("address={}", mac)).await?;
        if !allocated.is_empty() {
            debug!("address {} is allocated to node {}", mac, allocated[0].node_uuid);
            return Ok(());
        }
        self.create_port(&node.uuid, mac).await
    }

    async fn inspect_interface(&self, driver: &str) -> Result<&'static str, IronicError> {
        let details: DriverDetails = self
            .http
            .get(&format!("/v1/drivers/{}", driver))
            .await
            .map_err(|e| {
                IronicError::Api(format!("cannot load information about driver {}: {}", driver, e))
            })?;

        if details.enabled_inspect_interfaces.iter().any(|i| i == "agent") {
            Ok("agent")
        } else {
            Ok("inspector")
        }
    }

    // Mutations

    async fn try_update_node(&self, node: Node, updater: NodeUpdater) -> Result<Attempt<Node>, IronicError> {
        if updater.is_empty() {
            return Ok(Attempt::Applied(node));
        }

        info!("updating node {} settings in ironic", node.uuid);
        match self
            .http
            .patch::<Node>(&node_path(&node.uuid), &updater.into_patch())
            .await
        {
            Ok(updated) => Ok(Attempt::Applied(updated)),
            Err(IronicError::Conflict(_)) => {
                info!("could not update node {} settings in ironic, busy", node.uuid);
                Ok(Attempt::Pending(OperationResult::retry_after(PROVISION_REQUEUE_DELAY)))
            }
            Err(e) => Err(IronicError::Api(format!(
                "failed to update host settings in ironic: {}",
                e
            ))),
        }
    }

    /// Request a provision state change. The flag reports whether the
    /// backend accepted it.
    async fn try_change_provision_state(
        &self,
        node: &Node,
        request: ProvisionStateRequest,
    ) -> Result<(bool, OperationResult), IronicError> {
        info!(
            "changing provisioning state of node {}: current {}, existing target {:?}, new target {}",
            node.uuid,
            node.provision_state,
            node.target_provision_state,
            request.target.as_str()
        );

        if node.has_fault() {
            info!("node {} has a fault, will retry: {:?}", node.uuid, node.fault);
            return Ok((false, OperationResult::retry_after(PROVISION_REQUEUE_DELAY)));
        }
        if node.maintenance {
            info!(
                "node {} is in maintenance ({:?}), removing maintenance first",
                node.uuid, node.maintenance_reason
            );
            return Ok((false, self.set_maintenance_flag(node, false, "").await?));
        }

        let body = serde_json::to_value(&request)?;
        match self
            .http
            .put(&format!("{}/states/provision", node_path(&node.uuid)), &body)
            .await
        {
            Ok(()) => Ok((true, OperationResult::continuing(PROVISION_REQUEUE_DELAY))),
            Err(IronicError::Conflict(_)) => {
                info!("could not change state of node {}, busy", node.uuid);
                Ok((false, OperationResult::retry_after(PROVISION_REQUEUE_DELAY)))
            }
            Err(e) => Err(IronicError::Api(format!(
                "failed to change provisioning state to \"{}\": {}",
                request.target.as_str(),
                e
            ))),
        }
    }

    async fn change_provision_state(
        &self,
        node: &Node,
        target: ProvisionTarget,
    ) -> Result<OperationResult, IronicError> {
        let (_, result) = self
            .try_change_provision_state(node, ProvisionStateRequest::new(target))
            .await?;
        Ok(result)
    }

    async fn set_maintenance_flag(&self, node: &Node, value: bool, reason: &str) -> Result<OperationResult, IronicError> {
        info!("updating maintenance of node {} to {} ({})", node.uuid, value, reason);
        let path = format!("{}/maintenance", node_path(&node.uuid));
        let outcome = if value {
            self.http.put(&path, &json!({"reason": reason})).await
        } else {
            self.http.delete(&path).await
        };

        match outcome {
            Ok(()) => Ok(OperationResult::continuing(Duration::ZERO)),
            Err(IronicError::Conflict(_)) => {
                info!("could not update maintenance of node {}, busy", node.uuid);
                Ok(OperationResult::retry_after(PROVISION_REQUEUE_DELAY))
            }
            Err(e) => Err(IronicError::Api(format!(
                "failed to set host maintenance flag to {} ({})",
                value, e
            ))),
        }
    }

    async fn change_power(&self, node: &Node, target: PowerTarget) -> Result<OperationResult, IronicError> {
        info!("changing power state of node {} to {}", node.uuid, target.as_str());

        if !node.target_provision().is_empty() {
            info!(
                "node {} in state {} does not allow power change, target {}",
                node.uuid,
                node.provision_state,
                node.target_provision()
            );
            return Ok(OperationResult::continuing(POWER_REQUEUE_DELAY));
        }

        let request = PowerStateRequest {
            target,
            timeout: (target == PowerTarget::SoftPowerOff).then_some(SOFT_POWER_OFF_TIMEOUT.as_secs()),
        };
        let body = serde_json::to_value(&request)?;
        match self
            .http
            .put(&format!("{}/states/power", node_path(&node.uuid)), &body)
            .await
        {
            Ok(()) => {
                info!("power change OK");
                Ok(OperationResult::continuing(Duration::ZERO))
            }
            Err(IronicError::Conflict(_)) => {
                info!("node {} is locked, trying again after {:?}", node.uuid, POWER_REQUEUE_DELAY);
                Ok(OperationResult::retry_after(POWER_REQUEUE_DELAY))
            }
            // The vendor driver rejects the target it cannot perform
            Err(IronicError::BadRequest(_)) if target == PowerTarget::SoftPowerOff => {
                Err(IronicError::SoftPowerOffUnsupported)
            }
            Err(e) => {
                info!("power change error: {}", e);
                Err(IronicError::Api(format!("failed to {} node: {}", target.as_str(), e)))
            }
        }
    }

    // Registration

    fn deploy_image_info(&self) -> Map<String, Value> {
        match (&self.config.deploy_kernel_url, &self.config.deploy_ramdisk_url) {
            (Some(kernel), Some(ramdisk)) => opts([
                ("deploy_kernel", json!(kernel)),
                ("deploy_ramdisk", json!(ramdisk)),
            ]),
            _ => Map::new(),
        }
    }

    /// Settings that do not depend on the provisioning phase.
    async fn configure_node(&self, data: &ManagementAccessData, node: Node) -> Result<OperationResult, IronicError> {
        let mut updater = NodeUpdater::new();
        updater.set_driver_info(self.deploy_image_info(), &node);
        updater.set_top_level(
            "automated_clean",
            json!(data.automated_cleaning_mode != AutomatedCleaningMode::Disabled),
            &json!(node.automated_clean),
        );

        let mut properties = opts([("capabilities", json!(capabilities_value(Some(&node), data.boot_mode)))]);
        if let Some(arch) = data.cpu_architecture.as_deref().filter(|a| !a.is_empty()) {
            properties.insert("cpu_arch".to_string(), json!(arch));
        }
        updater.set_properties(properties, &node);

        match self.try_update_node(node, updater).await? {
            Attempt::Applied(_) => Ok(OperationResult::complete()),
            Attempt::Pending(result) => Ok(result),
        }
    }

    async fn enroll_node(
        &self,
        host: &HostData,
        data: &ManagementAccessData,
        bmc: &dyn AccessDetails,
        driver_info: DriverInfo,
    ) -> Result<Attempt<Node>, IronicError> {
        let inspect_interface = self.inspect_interface(bmc.driver()).await?;

        let mut body = opts([
            ("driver", json!(bmc.driver())),
            ("name", json!(host.node_name())),
            ("driver_info", Value::Object(driver_info)),
            ("inspect_interface", json!(inspect_interface)),
            ("disable_power_off", json!(data.disable_power_off)),
        ]);
        let mut interfaces = vec![
            ("bios_interface", bmc.bios_interface()),
            ("boot_interface", bmc.boot_interface()),
            ("management_interface", bmc.management_interface()),
            ("power_interface", bmc.power_interface()),
            ("raid_interface", bmc.raid_interface()),
            ("vendor_interface", bmc.vendor_interface()),
            ("deploy_interface", deploy_interface(data).unwrap_or_default()),
        ];
        if self.microversion() >= FIRMWARE_MICROVERSION {
            interfaces.push(("firmware_interface", bmc.firmware_interface()));
        }
        // Empty means the backend default
        for (key, value) in interfaces.into_iter().filter(|(_, v)| !v.is_empty()) {
            body.insert(key.to_string(), json!(value));
        }

        let mut properties = opts([("capabilities", json!(capabilities_value(None, data.boot_mode)))]);
        if let Some(arch) = data.cpu_architecture.as_deref().filter(|a| !a.is_empty()) {
            properties.insert("cpu_arch".to_string(), json!(arch));
        }
        body.insert("properties".to_string(), Value::Object(properties));

        info!("registering host {} in ironic", host.node_name());
        let node = match self.http.post::<Node>("/v1/nodes", &Value::Object(body)).await {
            Ok(node) => node,
            Err(IronicError::Conflict(_)) => {
                info!("could not register host {} in ironic, busy", host.node_name());
                return Ok(Attempt::Pending(OperationResult::retry_after(PROVISION_REQUEUE_DELAY)));
            }
            Err(e) => {
                return Err(IronicError::Api(format!("failed to register host in ironic: {}", e)));
            }
        };

        // Without a MAC the port is created from inspection data
        if let Some(mac) = host.boot_mac.as_deref().filter(|m| !m.is_empty()) {
            self.create_port(&node.uuid, mac).await?;
        }
        Ok(Attempt::Applied(node))
    }

    // Inspection

    async fn start_inspection(&self, data: &InspectData, node: Node) -> Result<(bool, OperationResult), IronicError> {
        let mut updater = NodeUpdater::new();
        updater.set_properties(
            opts([("capabilities", json!(capabilities_value(Some(&node), data.boot_mode)))]),
            &node,
        );
        let node = match self.try_update_node(node, updater).await? {
            Attempt::Applied(node) => node,
            Attempt::Pending(result) => return Ok((false, result)),
        };

        info!("starting new hardware inspection of node {}", node.uuid);
        self.try_change_provision_state(&node, ProvisionStateRequest::new(ProvisionTarget::Inspect))
            .await
    }

    // Preparation

    async fn set_target_raid(
        &self,
        raid_interface: &str,
        node: &Node,
        data: &PrepareData,
    ) -> Result<OperationResult, IronicError> {
        if raid_interface == NO_RAID_INTERFACE {
            return Ok(OperationResult::complete());
        }

        let has_hints = data.root_device_hints.as_ref().is_some_and(|h| !h.is_empty());
        let disks = match build_target_raid_config(data.target_raid_config.as_ref(), has_hints) {
            Ok(disks) => disks,
            Err(e) => return Ok(OperationResult::failed(e.to_string())),
        };
        if disks.is_empty() {
            return Ok(OperationResult::complete());
        }
        if has_hints {
            info!("root device hints are used, the first RAID volume is not marked as root");
        }

        let body = json!({"logical_disks": disks});
        match self
            .http
            .put(&format!("{}/states/raid", node_path(&node.uuid)), &body)
            .await
        {
            Ok(()) => Ok(OperationResult::complete()),
            Err(IronicError::Conflict(_)) => Ok(OperationResult::retry_after(PROVISION_REQUEUE_DELAY)),
            Err(e) => Err(IronicError::Api(format!(
                "failed to set target RAID configuration: {}",
                e
            ))),
        }
    }

    async fn start_manual_cleaning(
        &self,
        bmc: &dyn AccessDetails,
        node: &Node,
        data: &PrepareData,
    ) -> Result<(bool, OperationResult), IronicError> {
        let steps = match manual_cleaning_steps(bmc, data) {
            Ok(steps) => steps,
            Err(message) => return Ok((false, OperationResult::failed(message))),
        };
        if steps.is_empty() {
            return Ok((false, OperationResult::complete()));
        }

        let result = self.set_target_raid(bmc.raid_interface(), node, data).await?;
        if result.is_pending() {
            return Ok((false, result));
        }

        info!("remove existing configuration and set new configuration: {:?}", steps);
        let mut request = ProvisionStateRequest::new(ProvisionTarget::Clean);
        request.clean_steps = Some(steps);
        self.try_change_provision_state(node, request).await
    }

    // Provisioning

    fn instance_updater(&self, node: &Node, host: &HostData, data: &ProvisionData) -> NodeUpdater {
        let mut updater = NodeUpdater::new();
        updater.set_top_level("instance_uuid", json!(host.uid), &json!(node.instance_uuid));

        let mut capabilities = Map::new();
        if data.boot_mode == BootMode::UefiSecureBoot {
            capabilities.insert("secure_boot".to_string(), json!("true"));
        }
        updater.set_instance_info(
            opts([
                ("capabilities", Value::Object(capabilities)),
                ("root_device", Value::Object(make_hint_map(data.root_device_hints.as_ref()))),
            ]),
            node,
        );

        let current_deploy = json!(node.deploy_interface);
        let image = &data.image;
        if custom_deploy_method(data.custom_deploy.as_ref()).is_some() {
            let info = if image.url.is_empty() {
                opts([
                    ("boot_iso", Value::Null),
                    ("image_checksum", Value::Null),
                    ("image_source", Value::Null),
                    ("image_os_hash_algo", Value::Null),
                    ("image_os_hash_value", Value::Null),
                    ("image_disk_format", Value::Null),
                ])
            } else {
                // Every image field is optional for a custom deploy
                let (checksum, algo) = image_checksum(image).unwrap_or((None, None));
                opts([
                    ("boot_iso", Value::Null),
                    ("image_checksum", Value::Null),
                    ("image_source", json!(image.url)),
                    ("image_os_hash_algo", json!(algo)),
                    ("image_os_hash_value", json!(checksum)),
                    ("image_disk_format", json!(image.disk_format)),
                ])
            };
            updater.set_instance_info(info, node);
            updater.set_top_level("deploy_interface", json!("custom-agent"), &current_deploy);
        } else if is_live_iso(image) {
            updater.set_instance_info(
                opts([
                    ("boot_iso", json!(image.url)),
                    ("image_source", Value::Null),
                    ("image_os_hash_value", Value::Null),
                    ("image_os_hash_algo", Value::Null),
                    ("image_checksum", Value::Null),
                ]),
                node,
            );
            updater.set_top_level("deploy_interface", json!("ramdisk"), &current_deploy);
            updater.set_driver_info(opts([("force_persistent_boot_device", json!("Default"))]), node);
        } else {
            let Ok((checksum, algo)) = image_checksum(image) else {
                info!("image checksum not found for host {}", host.node_name());
                return updater;
            };
            let mut info = opts([
                ("boot_iso", Value::Null),
                ("image_source", json!(image.url)),
                ("image_disk_format", json!(image.disk_format)),
            ]);
            match algo {
                None => {
                    info.insert("image_checksum".to_string(), json!(checksum));
                    info.insert("image_os_hash_algo".to_string(), Value::Null);
                    info.insert("image_os_hash_value".to_string(), Value::Null);
                }
                Some(algo) => {
                    info.insert("image_checksum".to_string(), Value::Null);
                    info.insert("image_os_hash_algo".to_string(), json!(algo));
                    info.insert("image_os_hash_value".to_string(), json!(checksum));
                }
            }
            updater.set_instance_info(info, node);

            if matches!(node.deploy_interface.as_deref(), Some("ramdisk" | "custom-agent")) {
                updater.set_top_level("deploy_interface", Value::Null, &current_deploy);
            }
            updater.set_driver_info(opts([("force_persistent_boot_device", json!("Default"))]), node);
        }

        updater
    }

    async fn validate_node(&self, node: &Node) -> Result<Option<String>, IronicError> {
        info!("validating node {} settings in ironic", node.uuid);
        let validation: NodeValidation = self
            .http
            .get(&format!("{}/validate", node_path(&node.uuid)))
            .await?;

        let errors: Vec<&str> = [validation.boot.failure(), validation.deploy.failure()]
            .into_iter()
            .flatten()
            .collect();
        if errors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("host validation error: {}", errors.join("; "))))
        }
    }

    async fn set_up_for_provisioning(
        &self,
        node: &Node,
        host: &HostData,
        data: &ProvisionData,
    ) -> Result<OperationResult, IronicError> {
        info!("setting up node {} for provisioning", node.uuid);
        let updater = self.instance_updater(node, host, data);
        let node = match self.try_update_node(node.clone(), updater).await? {
            Attempt::Applied(node) => node,
            Attempt::Pending(result) => return Ok(result),
        };

        match self.validate_node(&node).await {
            Ok(None) => Ok(OperationResult::complete()),
            Ok(Some(message)) => Ok(OperationResult::failed(message)),
            Err(IronicError::Conflict(_)) => {
                info!("could not validate node {}, busy", node.uuid);
                Ok(OperationResult::retry_after(PROVISION_REQUEUE_DELAY))
            }
            Err(e) => Err(IronicError::Api(format!(
                "failed to validate host during registration: {}",
                e
            ))),
        }
    }

    async fn start_deploy(&self, node: &Node, host: &HostData, data: &ProvisionData) -> Result<OperationResult, IronicError> {
        let result = self.set_up_for_provisioning(node, host, data).await?;
        if result.is_pending() {
            return Ok(result);
        }

        info!("starting deploy of {} to node {}", data.image.url, node.uuid);
        let mut request = ProvisionStateRequest::new(ProvisionTarget::Active);
        request.configdrive = config_drive(host, &data.image);
        request.deploy_steps = custom_deploy_steps(data.custom_deploy.as_ref());
        let (_, result) = self.try_change_provision_state(node, request).await?;
        Ok(result)
    }

    // Power

    async fn abort_inspection_or_cleaning(
        &self,
        node: &Node,
        automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError> {
        let cleaning_disabled = automated_cleaning_mode == AutomatedCleaningMode::Disabled;
        match node.provision_state {
            ProvisionState::InspectWait => {
                info!("aborting inspection of node {} to allow power off", node.uuid);
                self.change_provision_state(node, ProvisionTarget::Abort).await
            }
            ProvisionState::Inspecting => {
                info!("inspection in progress, waiting for it to reach inspect wait state");
                Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY))
            }
            // Aborted inspection leaves the target set until the node is managed again
            ProvisionState::InspectFail if !node.target_provision().is_empty() => {
                self.change_provision_state(node, ProvisionTarget::Manage).await
            }
            ProvisionState::CleanWait => {
                let manual = node.target_provision() == ProvisionTarget::Clean.as_str();
                if manual || cleaning_disabled {
                    info!("aborting cleaning of node {} to allow power off", node.uuid);
                    self.change_provision_state(node, ProvisionTarget::Abort).await
                } else {
                    info!("automated cleaning in progress, waiting for it to complete");
                    Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY))
                }
            }
            ProvisionState::Cleaning => {
                info!("cleaning in progress on node {}", node.uuid);
                Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY))
            }
            _ => Ok(OperationResult::complete()),
        }
    }

    // Capacity

    async fn load_busy_hosts(&self) -> Result<Vec<String>, IronicError> {
        let mut busy = Vec::new();
        let mut path = "/v1/nodes?fields=uuid,name,provision_state,boot_interface".to_string();

        loop {
            debug!("Fetching page: {}", path);
            let page: NodeList = self.http.get(&path).await?;
            for node in page.nodes {
                // Virtual media hosts do not occupy the provisioning network
                let virtual_media = node
                    .boot_interface
                    .as_deref()
                    .is_some_and(|b| b.contains("virtual-media"));
                if node.provision_state.is_busy() && !virtual_media {
                    busy.push(node.name.unwrap_or_default());
                }
            }
            match page.next {
                Some(next) => path = next,
                None => break,
            }
        }

        Ok(busy)
    }
}

#[async_trait::async_trait]
impl ProvisionerTrait for IronicClient {
    async fn try_init(&self) -> Result<bool, IronicError> {
        let root: ApiVersionRoot = match self.http.get("/v1").await {
            Ok(root) => root,
            Err(e) => {
                info!("provisioning backend not ready: {}", e);
                return Ok(false);
            }
        };

        match parse_minor(&root.version.version) {
            Some(minor) => {
                let minor = minor.min(MAX_MICROVERSION);
                self.microversion.store(minor, Ordering::Relaxed);
                info!("using ironic API microversion 1.{}", minor);
            }
            None => warn!(
                "cannot parse ironic API version {}, using 1.{}",
                root.version.version,
                self.microversion()
            ),
        }
        Ok(true)
    }

    async fn has_capacity(&self, host: &HostData) -> Result<bool, IronicError> {
        let bmc = bmc_access(host)?;

        // Virtual media deployments do not compete for DHCP and share the image
        if bmc.supports_iso_preprovisioning_image() {
            return Ok(true);
        }

        let busy = self.load_busy_hosts().await?;
        if busy.contains(&host.node_name()) {
            return Ok(true);
        }
        Ok(busy.len() < self.config.max_busy_hosts)
    }

    async fn register(
        &self,
        host: &HostData,
        data: &ManagementAccessData,
        credentials_changed: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, String), IronicError> {
        let Some(bmc) = host.bmc_access.as_deref() else {
            let message = "failed to parse BMC address information: no BMC address";
            return Ok((OperationResult::failed(message), String::new()));
        };

        if data.boot_mode == BootMode::UefiSecureBoot && !bmc.supports_secure_boot() {
            let message = format!("BMC driver {} does not support secure boot", bmc.bmc_type());
            info!("{}", message);
            return Ok((OperationResult::failed(message), String::new()));
        }
        if bmc.requires_provisioning_network() && self.config.provisioning_network_disabled {
            let message = format!("BMC driver {} requires a provisioning network", bmc.bmc_type());
            info!("{}", message);
            return Ok((OperationResult::failed(message), String::new()));
        }
        // Power-off must never happen by accident on such hosts
        if data.disable_power_off && !self.supports_disable_power_off() {
            let message = "current provisioning backend does not support DisablePowerOff, refusing to manage node";
            info!("{}", message);
            return Ok((OperationResult::failed(message), String::new()));
        }

        debug!("validating management access for {}", host.node_name());
        let existing = match self.find_existing_node(host).await {
            Ok(node) => node,
            Err(e @ IronicError::MacAddressConflict { .. }) => {
                return Ok((OperationResult::failed(e.to_string()), String::new()));
            }
            Err(e) => return Err(IronicError::Api(format!("failed to find existing host: {}", e))),
        };

        if bmc.needs_mac() && host.boot_mac.as_deref().is_none_or(str::is_empty) {
            let message = format!("BMC driver {} requires a BootMACAddress value", bmc.bmc_type());
            info!("{}", message);
            return Ok((OperationResult::failed(message), String::new()));
        }

        let driver_info = bmc.driver_info(&host.credentials);
        let mut updater = NodeUpdater::new();
        let node = match existing {
            None => match self.enroll_node(host, data, bmc, driver_info).await? {
                Attempt::Applied(node) => node,
                Attempt::Pending(result) => return Ok((result, String::new())),
            },
            Some(node) => {
                updater.set_top_level("name", json!(host.node_name()), &json!(node.name));

                if let Some(mac) = host.boot_mac.as_deref().filter(|m| !m.is_empty()) {
                    self.ensure_port(&node, mac).await?;
                }

                // The backend never returns the password, so driver info is only
                // rewritten when something actually changed
                if credentials_changed || !bmc_address_matches(&node, &driver_info) {
                    info!("updating driver info of node {}: credentials or BMC address changed", node.uuid);
                    updater.set_top_level(
                        "driver_info",
                        Value::Object(driver_info),
                        &Value::Object(node.driver_info.clone()),
                    );
                }
                updater.set_top_level(
                    "disable_power_off",
                    json!(data.disable_power_off),
                    &json!(node.disable_power_off),
                );
                node
            }
        };
        let provisioning_id = node.uuid.clone();

        let node = match self.try_update_node(node, updater).await? {
            Attempt::Applied(node) => node,
            Attempt::Pending(result) => return Ok((result, provisioning_id)),
        };

        info!(
            "current provision state of node {}: {} (target {:?}, last error {:?})",
            node.uuid, node.provision_state, node.target_provision_state, node.last_error
        );

        let result = match node.provision_state {
            ProvisionState::Enroll => {
                if !node.error().is_empty() && !(credentials_changed || restart_on_failure) {
                    OperationResult::failed(node.error())
                } else if matches!(node.target_provision(), "manage" | "manageable") {
                    // Already asked to manage without an error, keep waiting
                    OperationResult::continuing(PROVISION_REQUEUE_DELAY)
                } else {
                    self.change_provision_state(&node, ProvisionTarget::Manage).await?
                }
            }
            ProvisionState::Verifying => OperationResult::continuing(PROVISION_REQUEUE_DELAY),
            // Updates would be refused in these transient states
            ProvisionState::CleanWait
            | ProvisionState::Cleaning
            | ProvisionState::DeployWait
            | ProvisionState::Deploying
            | ProvisionState::Inspecting => OperationResult::complete(),
            _ => self.configure_node(data, node).await?,
        };
        Ok((result, provisioning_id))
    }

    async fn preprovisioning_image_formats(&self, host: &HostData) -> Result<Vec<ImageFormat>, IronicError> {
        let bmc = bmc_access(host)?;
        if bmc.supports_iso_preprovisioning_image() {
            Ok(vec![ImageFormat::Iso])
        } else {
            Ok(Vec::new())
        }
    }

    async fn inspect_hardware(
        &self,
        host: &HostData,
        data: &InspectData,
        restart_on_failure: bool,
        refresh: bool,
        force_reboot: bool,
    ) -> Result<InspectResult, IronicError> {
        info!("inspecting hardware of {}", host.node_name());
        let node = self.get_node(host).await?;

        let mut refresh = refresh;
        let mut restart_on_failure = restart_on_failure;
        if node.provision_state == ProvisionState::InspectFail && node.error().contains("aborted") {
            refresh = true;
            restart_on_failure = true;
        }

        let pending = |result: OperationResult| InspectResult {
            result,
            ..Default::default()
        };

        match node.provision_state {
            ProvisionState::Available => {
                return Ok(pending(self.change_provision_state(&node, ProvisionTarget::Manage).await?));
            }
            ProvisionState::InspectWait if force_reboot => {
                info!("aborting inspection of node {} to force reboot of the agent", node.uuid);
                let (started, result) = self
                    .try_change_provision_state(&node, ProvisionStateRequest::new(ProvisionTarget::Abort))
                    .await?;
                return Ok(InspectResult {
                    result,
                    started,
                    details: None,
                });
            }
            ProvisionState::InspectWait | ProvisionState::Inspecting => {
                info!("inspection of node {} in progress", node.uuid);
                return Ok(pending(OperationResult::continuing(INTROSPECTION_REQUEUE_DELAY)));
            }
            ProvisionState::InspectFail if !restart_on_failure => {
                let failure = if node.error().is_empty() {
                    "Inspection failed"
                } else {
                    node.error()
                };
                info!("inspection of node {} failed: {}", node.uuid, failure);
                return Ok(pending(OperationResult::failed(failure)));
            }
            ProvisionState::InspectFail | ProvisionState::Manageable
                if refresh || node.provision_state == ProvisionState::InspectFail =>
            {
                let (started, result) = self.start_inspection(data, node).await?;
                return Ok(InspectResult {
                    result,
                    started,
                    details: None,
                });
            }
            ProvisionState::Manageable => {}
            state => {
                info!(
                    "unexpected provisioning state {} for inspection of node {} (target {:?}, last error {:?})",
                    state, node.uuid, node.target_provision_state, node.last_error
                );
                return Err(IronicError::InvalidRequest(format!(
                    "unexpected provision state {}",
                    state
                )));
            }
        }

        info!("getting hardware details from inspection of node {}", node.uuid);
        match self
            .http
            .get::<InventoryData>(&format!("{}/inventory", node_path(&node.uuid)))
            .await
        {
            Ok(inventory) => {
                info!("inspection of node {} finished successfully", node.uuid);
                Ok(InspectResult {
                    result: OperationResult::complete(),
                    started: false,
                    details: Some(hardware_details(&inventory)),
                })
            }
            Err(IronicError::NotFound(_)) => {
                let (started, result) = self.start_inspection(data, node).await?;
                Ok(InspectResult {
                    result,
                    started,
                    details: None,
                })
            }
            Err(e) => Err(IronicError::Api(format!(
                "failed to retrieve hardware introspection data: {}",
                e
            ))),
        }
    }

    async fn update_hardware_state(&self, host: &HostData) -> Result<HardwareState, IronicError> {
        debug!("updating hardware state of {}", host.node_name());
        let node = self.get_node(host).await?;

        let powered_on = match node.power() {
            POWER_ON => Some(true),
            POWER_OFF => Some(false),
            other => {
                info!("could not determine power state of node {}: {:?}", node.uuid, other);
                None
            }
        };
        Ok(HardwareState { powered_on })
    }

    async fn adopt(
        &self,
        host: &HostData,
        data: &AdoptData,
        restart_on_failure: bool,
    ) -> Result<OperationResult, IronicError> {
        let node = self.get_node(host).await?;

        match node.provision_state {
            ProvisionState::Enroll | ProvisionState::Verifying => Err(IronicError::InvalidRequest(
                format!("invalid state for adopt: {}", node.provision_state),
            )),
            ProvisionState::Manageable => {
                // Deprovisioning moves the node on to available itself
                if data.state == ProvisioningState::Deprovisioning {
                    info!("deprovisioning in progress on node {}; not adopting", node.uuid);
                    return Ok(OperationResult::complete());
                }
                self.change_provision_state(&node, ProvisionTarget::Adopt).await
            }
            ProvisionState::Adopting => Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY)),
            ProvisionState::AdoptFail => {
                if restart_on_failure {
                    self.change_provision_state(&node, ProvisionTarget::Adopt).await
                } else {
                    Ok(OperationResult::failed(format!(
                        "Host adoption failed: {}",
                        node.error()
                    )))
                }
            }
            // Maintenance without a fault was set by hand, not by the backend
            ProvisionState::Active
                if node.maintenance && !node.has_fault() && data.state != ProvisioningState::Deleting =>
            {
                info!("active node {} was found in maintenance, updating", node.uuid);
                self.set_maintenance_flag(&node, false, "").await
            }
            _ => Ok(OperationResult::complete()),
        }
    }

    async fn prepare(
        &self,
        host: &HostData,
        data: &PrepareData,
        unprepared: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError> {
        let bmc = bmc_access(host)?;
        let node = self.get_node(host).await?;

        match node.provision_state {
            ProvisionState::Available => {
                if unprepared {
                    let steps = match manual_cleaning_steps(bmc, data) {
                        Ok(steps) => steps,
                        Err(message) => return Ok((OperationResult::failed(message), false)),
                    };
                    if !steps.is_empty() {
                        info!("node {} needs to be reconfigured: {:?}", node.uuid, steps);
                        let result = self.change_provision_state(&node, ProvisionTarget::Manage).await?;
                        return Ok((result, false));
                    }
                    // Nothing to do
                    return Ok((OperationResult::complete(), true));
                }
                Ok((OperationResult::complete(), false))
            }
            ProvisionState::Manageable => {
                if unprepared {
                    let (started, result) = self.start_manual_cleaning(bmc, &node, data).await?;
                    if started || result.is_pending() {
                        return Ok((result, started));
                    }
                    return Ok((OperationResult::complete(), true));
                }
                Ok((OperationResult::complete(), false))
            }
            ProvisionState::CleanFail => {
                // Settings are only cleared on restart, so the node stays put until then
                if !restart_on_failure {
                    return Ok((OperationResult::failed(node.error()), false));
                }
                if node.maintenance {
                    info!("clearing maintenance flag of node {}", node.uuid);
                    return Ok((self.set_maintenance_flag(&node, false, "").await?, false));
                }
                let result = self.change_provision_state(&node, ProvisionTarget::Manage).await?;
                Ok((result, false))
            }
            ProvisionState::Cleaning | ProvisionState::CleanWait => {
                info!("waiting for node {} to become manageable ({})", node.uuid, node.provision_state);
                Ok((OperationResult::continuing(PROVISION_REQUEUE_DELAY), false))
            }
            state => Err(IronicError::InvalidRequest(format!(
                "have unexpected ironic node state {}",
                state
            ))),
        }
    }

    async fn provision(
        &self,
        host: &HostData,
        data: &ProvisionData,
        force_reboot: bool,
    ) -> Result<OperationResult, IronicError> {
        let node = self.get_node(host).await?;

        if !data.image.url.is_empty() {
            if let Err(e) = image_checksum(&data.image) {
                return Ok(OperationResult::failed(format!("Validation failed: {}", e)));
            }
        }

        info!("provisioning image to node {} in state {}", node.uuid, node.provision_state);
        let same_image = has_same_image(&node, &data.image);

        match node.provision_state {
            ProvisionState::DeployFail => {
                // Stop on a failure for this image; a new image gets a new attempt
                if same_image {
                    if node.error().is_empty() {
                        info!("deploy of node {} failed but error message not available", node.uuid);
                        return Ok(OperationResult::retry_after(Duration::ZERO));
                    }
                    info!("deploy of node {} failed: {}", node.uuid, node.error());
                    return Ok(OperationResult::failed(format!(
                        "Image provisioning failed: {}",
                        node.error()
                    )));
                }
                info!("recovering node {} from previous failure", node.uuid);
                self.start_deploy(&node, host, data).await
            }
            ProvisionState::Manageable => self.change_provision_state(&node, ProvisionTarget::Provide).await,
            ProvisionState::CleanFail => {
                if node.maintenance {
                    info!("clearing maintenance flag of node {}", node.uuid);
                    return self.set_maintenance_flag(&node, false, "").await;
                }
                self.change_provision_state(&node, ProvisionTarget::Manage).await
            }
            ProvisionState::Available => self.start_deploy(&node, host, data).await,
            ProvisionState::Active => {
                info!("finished provisioning node {}", node.uuid);
                Ok(OperationResult::complete())
            }
            ProvisionState::DeployWait if force_reboot => {
                info!("aborting provisioning of node {} to force reboot of the agent", node.uuid);
                let (_, result) = self
                    .try_change_provision_state(&node, ProvisionStateRequest::new(ProvisionTarget::Deleted))
                    .await?;
                Ok(result)
            }
            state => {
                info!("waiting for node {} to become active or available ({})", node.uuid, state);
                Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY))
            }
        }
    }

    async fn deprovision(
        &self,
        host: &HostData,
        restart_on_failure: bool,
        automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError> {
        let node = self.get_node(host).await?;
        info!(
            "deprovisioning node {}: current {}, target {:?}, last error {:?}",
            node.uuid, node.provision_state, node.target_provision_state, node.last_error
        );

        match node.provision_state {
            ProvisionState::Error => {
                if !restart_on_failure {
                    let message = if node.error().is_empty() {
                        "Deprovisioning failed"
                    } else {
                        node.error()
                    };
                    return Ok(OperationResult {
                        error_message: message.to_string(),
                        ..Default::default()
                    });
                }
                info!("retrying deprovisioning of node {}", node.uuid);
                self.change_provision_state(&node, ProvisionTarget::Deleted).await
            }
            ProvisionState::CleanFail => {
                if !restart_on_failure {
                    info!("cleaning of node {} failed: {}", node.uuid, node.error());
                    return Ok(OperationResult::failed(format!("Cleaning failed: {}", node.error())));
                }
                info!("retrying cleaning of node {}", node.uuid);
                if node.maintenance {
                    return self.set_maintenance_flag(&node, false, "").await;
                }
                self.change_provision_state(&node, ProvisionTarget::Manage).await
            }
            // After a cleaning failure or a re-registration
            ProvisionState::Manageable => self.change_provision_state(&node, ProvisionTarget::Provide).await,
            ProvisionState::Available => Ok(OperationResult::complete()),
            ProvisionState::Deleting
            | ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::Deploying => {
                debug!("node {} is {}", node.uuid, node.provision_state);
                Ok(OperationResult::continuing(DEPROVISION_REQUEUE_DELAY))
            }
            ProvisionState::Active | ProvisionState::DeployFail | ProvisionState::DeployWait => {
                // The cleaning mode may have changed right before deletion
                let desired = automated_cleaning_mode != AutomatedCleaningMode::Disabled;
                if node.automated_clean != Some(desired) {
                    info!(
                        "synchronizing automated_clean of node {} before deprovisioning: {:?} -> {}",
                        node.uuid, node.automated_clean, desired
                    );
                    let patch = json!([{"op": "add", "path": "/automated_clean", "value": desired}]);
                    self.http
                        .patch::<Node>(&node_path(&node.uuid), &patch)
                        .await
                        .map_err(|e| IronicError::Api(format!("failed to update automatedClean: {}", e)))?;
                    return Ok(OperationResult::continuing(Duration::ZERO));
                }

                info!("starting deprovisioning of node {}", node.uuid);
                self.change_provision_state(&node, ProvisionTarget::Deleted).await
            }
            state => Err(IronicError::InvalidRequest(format!("unhandled ironic state {}", state))),
        }
    }

    async fn delete(&self, host: &HostData) -> Result<OperationResult, IronicError> {
        let node = match self.get_node(host).await {
            Ok(node) => node,
            Err(IronicError::NeedsRegistration) => {
                info!("no node found for {}, already deleted", host.node_name());
                return Ok(OperationResult::complete());
            }
            Err(e) => return Err(e),
        };

        info!(
            "deleting node {}: current {}, target {:?}, last error {:?}",
            node.uuid, node.provision_state, node.target_provision_state, node.last_error
        );

        match node.provision_state {
            // The node is locked until verification ends
            ProvisionState::Verifying => {
                return Ok(OperationResult::continuing(PROVISION_REQUEUE_DELAY));
            }
            ProvisionState::Enroll => {}
            ProvisionState::Available | ProvisionState::Manageable => {
                if node.instance_uuid.as_deref().is_some_and(|u| !u.is_empty()) {
                    info!("removing stale instance UUID from node {}", node.uuid);
                    let mut updater = NodeUpdater::new();
                    updater.set_top_level("instance_uuid", Value::Null, &json!(node.instance_uuid));
                    if let Attempt::Pending(result) = self.try_update_node(node.clone(), updater).await? {
                        return Ok(result);
                    }
                }
            }
            _ if !node.maintenance => {
                info!("setting maintenance flag of node {} to force delete", node.uuid);
                return self
                    .set_maintenance_flag(&node, true, DELETE_MAINTENANCE_REASON)
                    .await;
            }
            _ => {}
        }

        info!("node {} ready to be removed", node.uuid);
        match self.http.delete(&node_path(&node.uuid)).await {
            Ok(()) => info!("removed node {}", node.uuid),
            Err(IronicError::Conflict(_)) => {
                info!("could not remove node {}, busy", node.uuid);
                return Ok(OperationResult::retry_after(PROVISION_REQUEUE_DELAY));
            }
            Err(IronicError::NotFound(_)) => info!("did not find node {} to delete, OK", node.uuid),
            Err(e) => return Err(IronicError::Api(format!("failed to remove host: {}", e))),
        }

        Ok(OperationResult::continuing(Duration::ZERO))
    }

    async fn detach(&self, host: &HostData) -> Result<OperationResult, IronicError> {
        info!("removing the node of {} for detachment", host.node_name());
        self.delete(host).await
    }

    async fn power_on(&self, host: &HostData, force: bool) -> Result<OperationResult, IronicError> {
        info!("ensuring {} is powered on", host.node_name());
        let node = self.get_node(host).await?;

        if node.power() == POWER_ON {
            return Ok(OperationResult::complete());
        }
        if node.target_power() == POWER_ON {
            info!("waiting for power status of node {} to change", node.uuid);
            return Ok(OperationResult::continuing(POWER_REQUEUE_DELAY));
        }
        if !node.error().is_empty() && !force {
            info!("power on of node {} failed: {}", node.uuid, node.error());
            return Ok(OperationResult::failed(format!(
                "PowerOn operation failed: {}",
                node.error()
            )));
        }
        self.change_power(&node, PowerTarget::PowerOn).await
    }

    async fn power_off(
        &self,
        host: &HostData,
        mode: RebootMode,
        force: bool,
        automated_cleaning_mode: AutomatedCleaningMode,
    ) -> Result<OperationResult, IronicError> {
        info!("ensuring {} is powered off (mode: {:?})", host.node_name(), mode);
        let node = self.get_node(host).await?;

        let result = self.abort_inspection_or_cleaning(&node, automated_cleaning_mode).await?;
        if result.dirty {
            return Ok(result);
        }

        if node.power() == POWER_OFF {
            return Ok(result);
        }

        let target = node.target_power();
        if target == POWER_OFF || target == PowerTarget::SoftPowerOff.as_str() {
            info!("waiting for power status of node {} to change", node.uuid);
            return Ok(OperationResult::continuing(POWER_REQUEUE_DELAY));
        }
        // An aborted inspection also leaves an error behind
        if target.is_empty() && !node.error().is_empty() && !force {
            if !node.error().contains("aborted") {
                info!("power off of node {} failed: {}", node.uuid, node.error());
                return Ok(OperationResult::failed(node.error()));
            }
            info!("ignoring abort error on node {}, proceeding with power off", node.uuid);
        }

        if mode == RebootMode::Soft && !force {
            let soft = if node.disable_power_off {
                PowerTarget::SoftRebooting
            } else {
                PowerTarget::SoftPowerOff
            };
            match self.change_power(&node, soft).await {
                Err(IronicError::SoftPowerOffUnsupported) => {
                    info!("soft power off unsupported on node {}, using hard power off", node.uuid);
                }
                other => return other,
            }
        }

        let hard = if node.disable_power_off {
            PowerTarget::Rebooting
        } else {
            PowerTarget::PowerOff
        };
        self.change_power(&node, hard).await
    }

    async fn service(
        &self,
        host: &HostData,
        data: &ServicingData,
        unprepared: bool,
        restart_on_failure: bool,
    ) -> Result<(OperationResult, bool), IronicError> {
        if !self.has_servicing() {
            let message = format!(
                "servicing not supported: requires API version 1.{}, available is 1.{}",
                SERVICING_MICROVERSION,
                self.microversion()
            );
            return Ok((OperationResult::failed(message), false));
        }

        let bmc = bmc_access(host)?;
        let node = self.get_node(host).await?;

        let unprepared = match node.provision_state {
            ProvisionState::ServiceFail => {
                if !restart_on_failure {
                    return Ok((OperationResult::failed(node.error()), false));
                }
                if node.maintenance {
                    info!("clearing maintenance flag of node {} after a servicing failure", node.uuid);
                    return Ok((self.set_maintenance_flag(&node, false, "").await?, false));
                }
                info!("restarting servicing of node {} because of a previous failure", node.uuid);
                true
            }
            ProvisionState::Active => unprepared,
            ProvisionState::Servicing | ProvisionState::ServiceWait => {
                info!("waiting for node {} to become active ({})", node.uuid, node.provision_state);
                return Ok((OperationResult::continuing(PROVISION_REQUEUE_DELAY), false));
            }
            state => {
                return Err(IronicError::InvalidRequest(format!(
                    "have unexpected ironic node state {}",
                    state
                )));
            }
        };

        if !unprepared {
            info!("servicing finished on node {}", node.uuid);
            return Ok((OperationResult::complete(), false));
        }

        let steps = match bios_step(bmc, data.firmware_config.as_ref()) {
            Ok(step) => step.into_iter().collect::<Vec<_>>(),
            Err(message) => return Ok((OperationResult::failed(message), false)),
        };
        if steps.is_empty() {
            return Ok((OperationResult::complete(), true));
        }

        info!("starting servicing of node {}: {:?}", node.uuid, steps);
        let mut request = ProvisionStateRequest::new(ProvisionTarget::Service);
        request.service_steps = Some(steps);
        let (started, result) = self.try_change_provision_state(&node, request).await?;
        Ok((result, started))
    }

    async fn get_firmware_components(&self, host: &HostData) -> Result<Vec<FirmwareComponent>, IronicError> {
        let node = self.get_node(host).await?;
        if node.firmware_interface.as_deref() == Some("no-firmware") {
            return Err(IronicError::FirmwareUpdateUnsupported);
        }

        let list: FirmwareComponentList = self
            .http
            .get(&format!("{}/firmware", node_path(&node.uuid)))
            .await
            .map_err(|e| {
                IronicError::Api(format!(
                    "could not get firmware components for node {}: {}",
                    node.uuid, e
                ))
            })?;

        Ok(list
            .firmware
            .into_iter()
            .filter(|c| {
                let keep = c.component == "bios" || c.component == "bmc" || c.component.starts_with("nic");
                if !keep {
                    debug!("ignoring firmware component {} of node {}", c.component, node.uuid);
                }
                keep
            })
            .collect())
    }

    fn supports_disable_power_off(&self) -> bool {
        self.microversion() >= DISABLE_POWER_OFF_MICROVERSION
    }
}

fn node_path(id: &str) -> String {
    format!("/v1/nodes/{}", id)
}

fn bmc_access(host: &HostData) -> Result<&dyn AccessDetails, IronicError> {
    host.bmc_access.as_deref().ok_or_else(|| {
        IronicError::InvalidRequest("failed to parse BMC address information: no BMC address".to_string())
    })
}

fn opts<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn parse_minor(version: &str) -> Option<u32> {
    version.strip_prefix("1.")?.parse().ok()
}

fn boot_mode_capability(mode: BootMode) -> &'static str {
    match mode {
        BootMode::Uefi => "boot_mode:uefi",
        BootMode::UefiSecureBoot => "boot_mode:uefi,secure_boot:true",
        BootMode::Legacy => "boot_mode:bios",
    }
}

/// Node capabilities with the boot mode replaced.
fn capabilities_value(node: Option<&Node>, mode: BootMode) -> String {
    let existing = node
        .and_then(|n| n.properties.get("capabilities"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if existing.is_empty() {
        return boot_mode_capability(mode).to_string();
    }

    let mut capabilities: Vec<&str> = existing
        .split(',')
        .filter(|c| !c.starts_with("boot_mode:") && !c.starts_with("secure_boot:"))
        .collect();
    capabilities.push(boot_mode_capability(mode));
    capabilities.join(",")
}

fn is_live_iso(image: &Image) -> bool {
    image.disk_format.as_deref() == Some(LIVE_ISO_FORMAT)
}

fn deploy_interface(data: &ManagementAccessData) -> Option<&'static str> {
    if data.has_custom_deploy {
        Some("custom-agent")
    } else if data.current_image.as_ref().is_some_and(is_live_iso) {
        Some("ramdisk")
    } else {
        None
    }
}

/// Checksum and algorithm for an image. `None` algorithm means the backend
/// detects it.
fn image_checksum(image: &Image) -> Result<(Option<&str>, Option<&'static str>), String> {
    if is_live_iso(image) {
        return Ok((None, None));
    }
    let checksum = image
        .checksum
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "checksum is required for normal images".to_string())?;
    let algo = match image.checksum_type {
        None | Some(ChecksumType::Auto) => None,
        Some(kind) => Some(kind.as_str()),
    };
    Ok((Some(checksum), algo))
}

fn field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a Value {
    map.get(key).unwrap_or(&Value::Null)
}

fn has_same_image(node: &Node, image: &Image) -> bool {
    let info = &node.instance_info;
    if is_live_iso(image) {
        return field(info, "boot_iso").as_str() == Some(image.url.as_str());
    }

    let (checksum, algo) = image_checksum(image).unwrap_or((None, None));
    let same_source = field(info, "image_source").as_str() == Some(image.url.as_str());
    match algo {
        None => {
            same_source
                && field(info, "image_checksum").as_str() == checksum
                && field(info, "image_os_hash_algo").is_null()
                && field(info, "image_os_hash_value").is_null()
        }
        Some(algo) => {
            same_source
                && field(info, "image_checksum").is_null()
                && field(info, "image_os_hash_algo").as_str() == Some(algo)
                && field(info, "image_os_hash_value").as_str() == checksum
        }
    }
}

fn bmc_address_matches(node: &Node, driver_info: &DriverInfo) -> bool {
    let addresses = |info: &Map<String, Value>| -> Vec<(String, Value)> {
        info.iter()
            .filter(|(key, _)| key.ends_with("_address"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    };
    addresses(&node.driver_info) == addresses(driver_info)
}

fn config_drive(host: &HostData, image: &Image) -> Option<Value> {
    // A second virtual media device is not supported everywhere
    if is_live_iso(image) {
        return None;
    }
    Some(json!({
        "meta_data": {
            "uuid": host.uid,
            "dcops-namespace": host.namespace,
            "dcops-name": host.name,
            "local-hostname": host.name,
            "local_hostname": host.name,
            "name": host.name,
        }
    }))
}

fn custom_deploy_steps(custom: Option<&CustomDeploy>) -> Option<Vec<DeployStep>> {
    custom_deploy_method(custom).map(|method| {
        vec![DeployStep {
            interface: "deploy".to_string(),
            step: method.to_string(),
            args: Map::new(),
            priority: CUSTOM_DEPLOY_PRIORITY,
        }]
    })
}

fn bios_step(bmc: &dyn AccessDetails, firmware: Option<&FirmwareConfig>) -> Result<Option<CleanStep>, String> {
    let settings = bmc.build_bios_settings(firmware).map_err(|e| e.to_string())?;
    if settings.is_empty() {
        return Ok(None);
    }
    info!("applying BIOS settings: {:?}", settings);
    Ok(Some(CleanStep {
        interface: "bios".to_string(),
        step: "apply_configuration".to_string(),
        args: Some(json!({ "settings": settings })),
    }))
}

/// RAID and BIOS steps for manual cleaning.
fn manual_cleaning_steps(bmc: &dyn AccessDetails, data: &PrepareData) -> Result<Vec<CleanStep>, String> {
    let mut steps = raid_clean_steps_for(
        bmc.raid_interface(),
        data.target_raid_config.as_ref(),
        data.actual_raid_config.as_ref(),
    )
    .map_err(|e| e.to_string())?;
    steps.extend(bios_step(bmc, data.firmware_config.as_ref())?);
    Ok(steps)
}
