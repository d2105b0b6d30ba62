//! Inspection inventory mapping
//!
//! Converts the inventory document returned by
//! `GET /v1/nodes/{id}/inventory` into [`HardwareDetails`].

use crds::{Bios, Cpu, Firmware, HardwareDetails, HardwareSystemVendor, Nic, Storage};
use serde::Deserialize;
use std::collections::HashMap;

/// Inventory endpoint response
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryData {
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub plugin_data: PluginData,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Inventory {
    #[serde(default)]
    pub cpu: InventoryCpu,
    #[serde(default)]
    pub memory: InventoryMemory,
    #[serde(default)]
    pub interfaces: Vec<InventoryInterface>,
    #[serde(default)]
    pub disks: Vec<InventoryDisk>,
    #[serde(default)]
    pub system_vendor: InventorySystemVendor,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryCpu {
    #[serde(default)]
    pub model_name: Option<String>,
    /// MHz, reported as a string
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryMemory {
    #[serde(default)]
    pub physical_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub ipv6_address: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub speed_mbps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryDisk {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub wwn: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub hctl: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventorySystemVendor {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub firmware: InventoryFirmware,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryFirmware {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub build_date: Option<String>,
}

/// Inspection plugin output; only the PXE flags are used
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PluginData {
    #[serde(default)]
    pub all_interfaces: HashMap<String, PluginInterface>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PluginInterface {
    #[serde(default)]
    pub pxe_enabled: bool,
}

fn text(value: Option<&String>) -> String {
    value.cloned().unwrap_or_default()
}

/// Build host hardware details from an inspection inventory.
#[must_use]
pub fn hardware_details(data: &InventoryData) -> HardwareDetails {
    let inventory = &data.inventory;
    let vendor = &inventory.system_vendor;

    HardwareDetails {
        system_vendor: HardwareSystemVendor {
            manufacturer: text(vendor.manufacturer.as_ref()),
            product_name: text(vendor.product_name.as_ref()),
            serial_number: text(vendor.serial_number.as_ref()),
        },
        firmware: Firmware {
            bios: Bios {
                date: text(vendor.firmware.build_date.as_ref()),
                vendor: text(vendor.firmware.vendor.as_ref()),
                version: text(vendor.firmware.version.as_ref()),
            },
        },
        ram_mebibytes: inventory.memory.physical_mb,
        nics: nics(data),
        storage: inventory.disks.iter().map(storage).collect(),
        cpu: Cpu {
            arch: text(inventory.cpu.architecture.as_ref()),
            model: text(inventory.cpu.model_name.as_ref()),
            clock_megahertz: inventory
                .cpu
                .frequency
                .as_deref()
                .and_then(|f| f.parse().ok())
                .unwrap_or_default(),
            flags: {
                let mut flags = inventory.cpu.flags.clone();
                flags.sort();
                flags
            },
            count: inventory.cpu.count,
        },
        hostname: text(inventory.hostname.as_ref()),
    }
}

fn nics(data: &InventoryData) -> Vec<Nic> {
    let mut nics = Vec::new();
    for iface in &data.inventory.interfaces {
        let pxe = data
            .plugin_data
            .all_interfaces
            .get(&iface.name)
            .is_some_and(|p| p.pxe_enabled);
        let base = Nic {
            name: iface.name.clone(),
            model: format!("{} {}", text(iface.vendor.as_ref()), text(iface.product.as_ref()))
                .trim()
                .to_string(),
            mac: text(iface.mac_address.as_ref()),
            ip: String::new(),
            speed_gbps: iface.speed_mbps.unwrap_or_default() / 1000,
            pxe,
        };

        let addresses: Vec<&String> = [iface.ipv4_address.as_ref(), iface.ipv6_address.as_ref()]
            .into_iter()
            .flatten()
            .filter(|a| !a.is_empty())
            .collect();
        if addresses.is_empty() {
            nics.push(base);
        } else {
            // One entry per address
            for address in addresses {
                nics.push(Nic {
                    ip: address.clone(),
                    ..base.clone()
                });
            }
        }
    }
    nics.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.ip.cmp(&b.ip)));
    nics
}

fn storage(disk: &InventoryDisk) -> Storage {
    Storage {
        name: disk.name.clone(),
        rotational: disk.rotational,
        size_bytes: disk.size,
        vendor: text(disk.vendor.as_ref()),
        model: text(disk.model.as_ref()),
        serial_number: text(disk.serial.as_ref()),
        wwn: text(disk.wwn.as_ref()),
        hctl: text(disk.hctl.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hardware_details_from_inventory() {
        let data: InventoryData = serde_json::from_value(json!({
            "inventory": {
                "cpu": {"model_name": "Xeon", "frequency": "2400.000", "count": 8, "architecture": "x86_64", "flags": ["vmx", "aes"]},
                "memory": {"physical_mb": 16384},
                "interfaces": [
                    {"name": "eth1", "mac_address": "00:00:00:00:00:02", "speed_mbps": 25000},
                    {"name": "eth0", "mac_address": "00:00:00:00:00:01", "ipv4_address": "10.0.0.5",
                     "ipv6_address": "fd00::5", "vendor": "0x8086", "product": "0x1572", "speed_mbps": 10000}
                ],
                "disks": [{"name": "/dev/sda", "size": 480103981056u64, "rotational": false, "serial": "S1"}],
                "system_vendor": {"manufacturer": "Dell Inc.", "product_name": "PowerEdge R640",
                                  "firmware": {"vendor": "Dell", "version": "2.1", "build_date": "2023-01-01"}},
                "hostname": "node-0"
            },
            "plugin_data": {"all_interfaces": {"eth0": {"pxe_enabled": true}}}
        }))
        .unwrap();

        let details = hardware_details(&data);
        assert_eq!(details.ram_mebibytes, 16384);
        assert_eq!(details.cpu.clock_megahertz, 2400.0);
        assert_eq!(details.cpu.flags, vec!["aes", "vmx"], "Flags should be sorted");
        assert_eq!(details.system_vendor.product_name, "PowerEdge R640");
        assert_eq!(details.firmware.bios.version, "2.1");
        assert_eq!(details.storage[0].serial_number, "S1");
        assert_eq!(details.hostname, "node-0");

        assert_eq!(details.nics.len(), 3, "eth0 has two addresses: {:?}", details.nics);
        assert_eq!(details.nics[0].name, "eth0");
        assert!(details.nics[0].pxe, "eth0 boots over PXE");
        assert_eq!(details.nics[0].speed_gbps, 10);
        assert_eq!(details.nics[0].model, "0x8086 0x1572");
        assert_eq!(details.nics[2].name, "eth1");
        assert!(!details.nics[2].pxe);
        assert_eq!(details.nics[2].ip, "");
    }

    #[test]
    fn test_empty_inventory() {
        let details = hardware_details(&InventoryData::default());
        assert!(details.nics.is_empty());
        assert_eq!(details.cpu.clock_megahertz, 0.0);
    }
}
