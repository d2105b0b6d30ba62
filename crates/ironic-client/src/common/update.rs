//! JSON-patch builder for node updates

use crate::models::Node;
use serde_json::{Map, Value, json};
use tracing::debug;

/// Collects the changes to apply to one node.
///
/// Values are compared with the node as last read, so an updater built from
/// an up-to-date node yields an empty patch. A `null` value removes the
/// field.
#[derive(Debug, Default)]
pub struct NodeUpdater {
    ops: Vec<Value>,
}

impl NodeUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, path: String, value: Value, current: Option<&Value>) {
        let current = current.unwrap_or(&Value::Null);
        if *current == value {
            return;
        }
        if value.is_null() {
            debug!("removing {}", path);
            self.ops.push(json!({"op": "remove", "path": path}));
        } else {
            debug!("updating {}", path);
            self.ops.push(json!({"op": "add", "path": path, "value": value}));
        }
    }

    /// Set a top-level node field.
    pub fn set_top_level(&mut self, field: &str, value: Value, current: &Value) {
        self.push(format!("/{field}"), value, Some(current));
    }

    pub fn set_properties(&mut self, values: Map<String, Value>, node: &Node) {
        for (key, value) in values {
            let current = node.properties.get(&key);
            self.push(format!("/properties/{key}"), value, current);
        }
    }

    pub fn set_instance_info(&mut self, values: Map<String, Value>, node: &Node) {
        for (key, value) in values {
            let current = node.instance_info.get(&key);
            self.push(format!("/instance_info/{key}"), value, current);
        }
    }

    pub fn set_driver_info(&mut self, values: Map<String, Value>, node: &Node) {
        for (key, value) in values {
            let current = node.driver_info.get(&key);
            self.push(format!("/driver_info/{key}"), value, current);
        }
    }

    /// Replace driver-info wholesale.
    pub fn replace_driver_info(&mut self, values: Map<String, Value>) {
        self.ops
            .push(json!({"op": "replace", "path": "/driver_info", "value": values}));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_patch(self) -> Value {
        Value::Array(self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        let mut node = Node {
            uuid: "abc".to_string(),
            ..Default::default()
        };
        node.properties.insert("cpu_arch".to_string(), json!("x86_64"));
        node.instance_info.insert("image_source".to_string(), json!("http://old"));
        node
    }

    #[test]
    fn test_unchanged_values_produce_no_ops() {
        let node = node();
        let mut updater = NodeUpdater::new();
        let mut props = Map::new();
        props.insert("cpu_arch".to_string(), json!("x86_64"));
        updater.set_properties(props, &node);
        updater.set_top_level("name", json!("ns~host"), &json!("ns~host"));
        assert!(updater.is_empty(), "Nothing should change: {:?}", updater);
    }

    #[test]
    fn test_changed_and_removed_values() {
        let node = node();
        let mut updater = NodeUpdater::new();
        let mut info = Map::new();
        info.insert("image_source".to_string(), Value::Null);
        info.insert("image_checksum".to_string(), json!("abc"));
        info.insert("boot_iso".to_string(), Value::Null);
        updater.set_instance_info(info, &node);

        assert_eq!(
            updater.into_patch(),
            json!([
                {"op": "add", "path": "/instance_info/image_checksum", "value": "abc"},
                {"op": "remove", "path": "/instance_info/image_source"}
            ]),
            "Missing fields set to null must not produce a remove"
        );
    }
}
