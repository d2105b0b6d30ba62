//! Root device hint rendering

use crds::RootDeviceHints;
use serde_json::{Map, Value};

const BY_PATH_PREFIX: &str = "/dev/disk/by-path/";

/// Render hints as the backend's operator-prefixed hint map.
///
/// Unset or empty hints are left out, so `None` and an empty hint set both
/// render to an empty map.
#[must_use]
pub fn make_hint_map(source: Option<&RootDeviceHints>) -> Map<String, Value> {
    let mut hints = Map::new();
    let Some(source) = source else {
        return hints;
    };

    let mut put = |key: &str, value: String| {
        hints.insert(key.to_string(), Value::String(value));
    };

    if let Some(name) = non_empty(source.device_name.as_ref()) {
        let key = if name.starts_with(BY_PATH_PREFIX) { "by_path" } else { "name" };
        put(key, format!("s== {name}"));
    }
    if let Some(hctl) = non_empty(source.hctl.as_ref()) {
        put("hctl", format!("s== {hctl}"));
    }
    if let Some(model) = non_empty(source.model.as_ref()) {
        put("model", format!("<in> {model}"));
    }
    if let Some(vendor) = non_empty(source.vendor.as_ref()) {
        put("vendor", format!("<in> {vendor}"));
    }
    if let Some(serial) = non_empty(source.serial_number.as_ref()) {
        put("serial", format!("s== {serial}"));
    }
    if let Some(size) = source.min_size_gigabytes.filter(|s| *s != 0) {
        put("size", format!(">= {size}"));
    }
    if let Some(wwn) = non_empty(source.wwn.as_ref()) {
        put("wwn", format!("s== {wwn}"));
    }
    if let Some(wwn) = non_empty(source.wwn_with_extension.as_ref()) {
        put("wwn_with_extension", format!("s== {wwn}"));
    }
    if let Some(ext) = non_empty(source.wwn_vendor_extension.as_ref()) {
        put("wwn_vendor_extension", format!("s== {ext}"));
    }
    if let Some(rotational) = source.rotational {
        put("rotational", rotational.to_string());
    }

    hints
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}
