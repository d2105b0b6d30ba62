//! Unit tests for the Ironic client against a mock HTTP backend

#[cfg(test)]
mod tests {
    use crate::client::{IronicClient, IronicConfig};
    use crate::error::IronicError;
    use crate::models::*;
    use crate::provisioner_trait::ProvisionerTrait;
    use bmc::{Credentials, DriverRegistry};
    use crds::{AutomatedCleaningMode, BootMode, Image, RebootMode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> IronicClient {
        client_with(server, IronicConfig::default())
    }

    fn client_with(server: &MockServer, config: IronicConfig) -> IronicClient {
        IronicClient::new(server.uri(), None, config).unwrap()
    }

    fn host(address: &str, provisioning_id: &str) -> HostData {
        let access = DriverRegistry::with_default_drivers()
            .new_access_details(address, false)
            .unwrap();
        HostData {
            namespace: "metal".to_string(),
            name: "host-0".to_string(),
            uid: "b7f0b1d2-0000-4000-8000-000000000001".to_string(),
            provisioning_id: provisioning_id.to_string(),
            boot_mac: Some("00:11:22:33:44:55".to_string()),
            credentials: Credentials::new("admin", "secret"),
            bmc_access: Some(Arc::from(access)),
        }
    }

    async fn mount_node(server: &MockServer, node: Value) {
        let uuid = node["uuid"].as_str().unwrap().to_string();
        Mock::given(method("GET"))
            .and(path(format!("/v1/nodes/{}", uuid)))
            .respond_with(ResponseTemplate::new(200).set_body_json(node))
            .mount(server)
            .await;
    }

    async fn requests_to(server: &MockServer, verb: &str, url_path: &str) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == url_path)
            .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
            .collect()
    }

    #[tokio::test]
    async fn test_try_init_negotiates_microversion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"version": {"version": "1.99", "min_version": "1.1"}})),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.microversion(), 81, "Default before probing");
        assert!(client.try_init().await.unwrap(), "Backend is reachable");
        assert_eq!(client.microversion(), 95, "Capped at the highest known version");
        assert!(client.supports_disable_power_off());
    }

    #[tokio::test]
    async fn test_try_init_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(!client.try_init().await.unwrap(), "Unavailable backend is not ready");
        assert!(!client.supports_disable_power_off(), "1.81 has no disable_power_off");
    }

    #[tokio::test]
    async fn test_requests_carry_microversion_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes/uuid-1"))
            .and(header("X-OpenStack-Ironic-API-Version", "1.81"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "uuid-1", "provision_state": "active", "power_state": "power on"
            })))
            .mount(&server)
            .await;

        let state = client(&server)
            .update_hardware_state(&host("ipmi://10.0.0.1", "uuid-1"))
            .await
            .unwrap();
        assert_eq!(state.powered_on, Some(true));
    }

    #[tokio::test]
    async fn test_register_enrolls_new_node() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/ports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ports": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/drivers/ipmi"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"enabled_inspect_interfaces": ["agent", "no-inspect"]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "uuid": "uuid-1", "name": "metal~host-0", "provision_state": "enroll"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/ports"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "uuid": "port-1", "node_uuid": "uuid-1", "address": "00:11:22:33:44:55"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/provision"))
            .and(body_json(json!({"target": "manage"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let data = ManagementAccessData {
            cpu_architecture: Some("x86_64".to_string()),
            ..Default::default()
        };
        let (result, provisioning_id) = client(&server)
            .register(&host("ipmi://10.0.0.1", ""), &data, false, false)
            .await
            .unwrap();

        assert_eq!(provisioning_id, "uuid-1", "New node ID should be returned");
        assert_eq!(result, OperationResult::continuing(PROVISION_REQUEUE_DELAY));

        let created = requests_to(&server, "POST", "/v1/nodes").await;
        assert_eq!(created.len(), 1, "Node should be created once");
        assert_eq!(created[0]["name"], "metal~host-0");
        assert_eq!(created[0]["driver"], "ipmi");
        assert_eq!(created[0]["inspect_interface"], "agent");
        assert_eq!(created[0]["properties"]["cpu_arch"], "x86_64");
        assert_eq!(created[0]["properties"]["capabilities"], "boot_mode:uefi");
        assert!(
            created[0].get("firmware_interface").is_none(),
            "Firmware interface needs 1.86"
        );

        let ports = requests_to(&server, "POST", "/v1/ports").await;
        assert_eq!(ports[0]["address"], "00:11:22:33:44:55");
        assert_eq!(ports[0]["pxe_enabled"], true);
    }

    #[tokio::test]
    async fn test_register_reports_mac_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/ports"))
            .and(query_param("address", "00:11:22:33:44:55"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ports": [{"uuid": "port-9", "node_uuid": "uuid-9", "address": "00:11:22:33:44:55"}]
            })))
            .mount(&server)
            .await;
        mount_node(
            &server,
            json!({"uuid": "uuid-9", "name": "other~host-9", "provision_state": "active"}),
        )
        .await;

        let (result, provisioning_id) = client(&server)
            .register(
                &host("ipmi://10.0.0.1", ""),
                &ManagementAccessData::default(),
                false,
                false,
            )
            .await
            .unwrap();

        assert!(provisioning_id.is_empty());
        assert_eq!(
            result.error_message,
            "MAC address 00:11:22:33:44:55 conflicts with existing node other~host-9"
        );
        assert!(
            requests_to(&server, "POST", "/v1/nodes").await.is_empty(),
            "Nothing should be enrolled"
        );
    }

    #[tokio::test]
    async fn test_register_rejects_secure_boot_on_ipmi() {
        let server = MockServer::start().await;
        let data = ManagementAccessData {
            boot_mode: BootMode::UefiSecureBoot,
            ..Default::default()
        };

        let (result, _) = client(&server)
            .register(&host("ipmi://10.0.0.1", ""), &data, false, false)
            .await
            .unwrap();

        assert_eq!(result.error_message, "BMC driver ipmi does not support secure boot");
        assert!(
            server.received_requests().await.unwrap_or_default().is_empty(),
            "Validation happens before any backend call"
        );
    }

    #[tokio::test]
    async fn test_register_libvirt_requires_boot_mac() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        let mut libvirt = host("libvirt://192.168.122.1", "");
        libvirt.boot_mac = None;

        let (result, provisioning_id) = client(&server)
            .register(&libvirt, &ManagementAccessData::default(), false, false)
            .await
            .unwrap();

        assert!(
            result.error_message.contains("requires a BootMACAddress"),
            "Unexpected error: {}",
            result.error_message
        );
        assert!(provisioning_id.is_empty(), "No node should be created");
        assert!(
            requests_to(&server, "POST", "/v1/nodes").await.is_empty(),
            "Registration must stop before enrolling"
        );
    }

    #[tokio::test]
    async fn test_register_existing_enroll_node_with_error_fails() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({
                "uuid": "uuid-1", "name": "metal~host-0", "provision_state": "enroll",
                "last_error": "IPMI call failed", "driver_info": {"ipmi_address": "10.0.0.1"}
            }),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v1/ports"))
            .and(query_param("node", "uuid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ports": [{"uuid": "port-1", "node_uuid": "uuid-1", "address": "00:11:22:33:44:55"}]
            })))
            .mount(&server)
            .await;

        let (result, provisioning_id) = client(&server)
            .register(
                &host("ipmi://10.0.0.1", "uuid-1"),
                &ManagementAccessData::default(),
                false,
                false,
            )
            .await
            .unwrap();

        assert_eq!(provisioning_id, "uuid-1");
        assert_eq!(result.error_message, "IPMI call failed");
        assert!(!result.dirty, "Failures are not dirty");
    }

    #[tokio::test]
    async fn test_operations_need_registration() {
        let server = MockServer::start().await;
        let client = client(&server);
        let unregistered = host("ipmi://10.0.0.1", "");

        assert!(matches!(
            client.power_on(&unregistered, false).await,
            Err(IronicError::NeedsRegistration)
        ));

        let missing = host("ipmi://10.0.0.1", "uuid-gone");
        assert!(
            matches!(client.power_on(&missing, false).await, Err(IronicError::NeedsRegistration)),
            "Unknown node ID means the host must register again"
        );
    }

    #[tokio::test]
    async fn test_power_on() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "power_state": "power off"}),
        )
        .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/power"))
            .and(body_json(json!({"target": "power on"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let result = client(&server)
            .power_on(&host("ipmi://10.0.0.1", "uuid-1"), false)
            .await
            .unwrap();
        assert_eq!(result, OperationResult::continuing(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_power_on_busy_node_retries() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "power_state": "power off"}),
        )
        .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/power"))
            .respond_with(ResponseTemplate::new(409).set_body_string("node locked"))
            .mount(&server)
            .await;

        let result = client(&server)
            .power_on(&host("ipmi://10.0.0.1", "uuid-1"), false)
            .await
            .unwrap();
        assert_eq!(result, OperationResult::retry_after(POWER_REQUEUE_DELAY));
    }

    #[tokio::test]
    async fn test_soft_power_off_falls_back_to_hard() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "power_state": "power on"}),
        )
        .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/power"))
            .and(body_json(json!({"target": "soft power off", "timeout": 180})))
            .respond_with(ResponseTemplate::new(400).set_body_string("unsupported"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/power"))
            .and(body_json(json!({"target": "power off"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let result = client(&server)
            .power_off(
                &host("ipmi://10.0.0.1", "uuid-1"),
                RebootMode::Soft,
                false,
                AutomatedCleaningMode::Metadata,
            )
            .await
            .unwrap();

        assert_eq!(result, OperationResult::continuing(Duration::ZERO));
        let calls = requests_to(&server, "PUT", "/v1/nodes/uuid-1/states/power").await;
        assert_eq!(calls.len(), 2, "Soft attempt then hard power off: {:?}", calls);
    }

    #[tokio::test]
    async fn test_provision_requires_checksum() {
        let server = MockServer::start().await;
        mount_node(&server, json!({"uuid": "uuid-1", "provision_state": "available"})).await;

        let data = ProvisionData {
            image: Image {
                url: "http://images/os.qcow2".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = client(&server)
            .provision(&host("ipmi://10.0.0.1", "uuid-1"), &data, false)
            .await
            .unwrap();

        assert_eq!(
            result.error_message,
            "Validation failed: checksum is required for normal images"
        );
    }

    #[tokio::test]
    async fn test_provision_deploy_fail_same_image_reports_error() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({
                "uuid": "uuid-1", "provision_state": "deploy failed", "last_error": "disk write failed",
                "instance_info": {"image_source": "http://images/os.qcow2", "image_checksum": "abc"}
            }),
        )
        .await;

        let data = ProvisionData {
            image: Image {
                url: "http://images/os.qcow2".to_string(),
                checksum: Some("abc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = client(&server)
            .provision(&host("ipmi://10.0.0.1", "uuid-1"), &data, false)
            .await
            .unwrap();

        assert_eq!(result.error_message, "Image provisioning failed: disk write failed");
    }

    #[tokio::test]
    async fn test_deprovision_syncs_automated_clean_first() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "automated_clean": true}),
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/nodes/uuid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "uuid-1", "provision_state": "active", "automated_clean": false
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .deprovision(
                &host("ipmi://10.0.0.1", "uuid-1"),
                false,
                AutomatedCleaningMode::Disabled,
            )
            .await
            .unwrap();

        assert_eq!(result, OperationResult::continuing(Duration::ZERO));
        let patches = requests_to(&server, "PATCH", "/v1/nodes/uuid-1").await;
        assert_eq!(
            patches[0],
            json!([{"op": "add", "path": "/automated_clean", "value": false}])
        );
        assert!(
            requests_to(&server, "PUT", "/v1/nodes/uuid-1/states/provision").await.is_empty(),
            "Deprovisioning starts on the next call"
        );
    }

    #[tokio::test]
    async fn test_delete_missing_node_is_complete() {
        let server = MockServer::start().await;
        let result = client(&server)
            .delete(&host("ipmi://10.0.0.1", "uuid-gone"))
            .await
            .unwrap();
        assert_eq!(result, OperationResult::complete());
    }

    #[tokio::test]
    async fn test_delete_active_node_sets_maintenance_first() {
        let server = MockServer::start().await;
        mount_node(&server, json!({"uuid": "uuid-1", "provision_state": "active"})).await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/maintenance"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let result = client(&server)
            .delete(&host("ipmi://10.0.0.1", "uuid-1"))
            .await
            .unwrap();

        assert_eq!(result, OperationResult::continuing(Duration::ZERO));
        assert!(
            requests_to(&server, "DELETE", "/v1/nodes/uuid-1").await.is_empty(),
            "Node is removed only once in maintenance"
        );
    }

    #[tokio::test]
    async fn test_has_capacity_counts_busy_hosts_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .and(query_param("fields", "uuid,name,provision_state,boot_interface"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [
                    {"uuid": "a", "name": "metal~a", "provision_state": "cleaning", "boot_interface": "ipxe"},
                    {"uuid": "b", "name": "metal~b", "provision_state": "deploying",
                     "boot_interface": "redfish-virtual-media"},
                    {"uuid": "c", "name": "metal~c", "provision_state": "active", "boot_interface": "ipxe"}
                ],
                "next": format!("{}/v1/nodes?marker=c", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .and(query_param("marker", "c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{"uuid": "d", "name": "metal~host-0", "provision_state": "inspect wait"}]
            })))
            .mount(&server)
            .await;

        let config = IronicConfig {
            max_busy_hosts: 2,
            ..Default::default()
        };
        let client = client_with(&server, config);

        assert!(
            client.has_capacity(&host("ipmi://10.0.0.1", "d")).await.unwrap(),
            "A host that is already busy keeps its slot"
        );

        let mut other = host("ipmi://10.0.0.1", "e");
        other.name = "host-1".to_string();
        assert!(
            !client.has_capacity(&other).await.unwrap(),
            "Two busy hosts exhaust the limit; virtual media hosts are not counted"
        );
    }

    #[tokio::test]
    async fn test_has_capacity_virtual_media_always() {
        let server = MockServer::start().await;
        let config = IronicConfig {
            max_busy_hosts: 0,
            ..Default::default()
        };
        let result = client_with(&server, config)
            .has_capacity(&host("redfish-virtualmedia://10.0.0.1/redfish/v1/Systems/1", "uuid-1"))
            .await
            .unwrap();
        assert!(result, "Virtual media hosts do not use the shared network");
    }

    #[tokio::test]
    async fn test_inspect_hardware_returns_details() {
        let server = MockServer::start().await;
        mount_node(&server, json!({"uuid": "uuid-1", "provision_state": "manageable"})).await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes/uuid-1/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inventory": {"memory": {"physical_mb": 8192}, "hostname": "node-0"},
                "plugin_data": {}
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .inspect_hardware(
                &host("ipmi://10.0.0.1", "uuid-1"),
                &InspectData::default(),
                false,
                false,
                false,
            )
            .await
            .unwrap();

        assert!(!result.result.is_pending());
        assert!(!result.started);
        let details = result.details.unwrap();
        assert_eq!(details.ram_mebibytes, 8192);
        assert_eq!(details.hostname, "node-0");
    }

    #[tokio::test]
    async fn test_inspect_hardware_starts_without_inventory() {
        let server = MockServer::start().await;
        mount_node(&server, json!({"uuid": "uuid-1", "provision_state": "manageable"})).await;
        Mock::given(method("PATCH"))
            .and(path("/v1/nodes/uuid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "uuid-1", "provision_state": "manageable",
                "properties": {"capabilities": "boot_mode:uefi"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/nodes/uuid-1/states/provision"))
            .and(body_json(json!({"target": "inspect"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let result = client(&server)
            .inspect_hardware(
                &host("ipmi://10.0.0.1", "uuid-1"),
                &InspectData::default(),
                false,
                false,
                false,
            )
            .await
            .unwrap();

        assert!(result.started, "Inspection should start when no inventory exists");
        assert!(result.result.dirty);
        assert!(result.details.is_none());
    }

    #[tokio::test]
    async fn test_prepare_with_nothing_to_do() {
        let server = MockServer::start().await;
        mount_node(&server, json!({"uuid": "uuid-1", "provision_state": "manageable"})).await;

        let (result, started) = client(&server)
            .prepare(&host("ipmi://10.0.0.1", "uuid-1"), &PrepareData::default(), true, false)
            .await
            .unwrap();

        assert_eq!(result, OperationResult::complete());
        assert!(started, "Nothing to configure counts as prepared");
    }

    #[tokio::test]
    async fn test_service_needs_microversion() {
        let server = MockServer::start().await;
        let (result, started) = client(&server)
            .service(&host("ipmi://10.0.0.1", "uuid-1"), &ServicingData::default(), true, false)
            .await
            .unwrap();

        assert!(!started);
        assert_eq!(
            result.error_message,
            "servicing not supported: requires API version 1.87, available is 1.81"
        );
    }

    #[tokio::test]
    async fn test_firmware_components_filtered() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "firmware_interface": "redfish"}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes/uuid-1/firmware"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "firmware": [
                    {"component": "bios", "initial_version": "1.0", "current_version": "1.1"},
                    {"component": "bmc", "initial_version": "5.0"},
                    {"component": "nic:NIC.Slot.1", "initial_version": "20.0"},
                    {"component": "psu", "initial_version": "0.9"}
                ]
            })))
            .mount(&server)
            .await;

        let components = client(&server)
            .get_firmware_components(&host("ipmi://10.0.0.1", "uuid-1"))
            .await
            .unwrap();
        let names: Vec<&str> = components.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, vec!["bios", "bmc", "nic:NIC.Slot.1"]);
    }

    #[tokio::test]
    async fn test_firmware_unsupported_interface() {
        let server = MockServer::start().await;
        mount_node(
            &server,
            json!({"uuid": "uuid-1", "provision_state": "active", "firmware_interface": "no-firmware"}),
        )
        .await;

        let result = client(&server)
            .get_firmware_components(&host("ipmi://10.0.0.1", "uuid-1"))
            .await;
        assert!(matches!(result, Err(IronicError::FirmwareUpdateUnsupported)));
    }
}
