//! Resource handles produced by stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An opaque identifier plus named output attributes produced by one stage
/// and consumed read-only by later stages.
///
/// The primary `id` is whatever the origin stage considers its anchor
/// resource (a VPC id, a hosted zone id, a load balancer id); everything a
/// downstream stage or a teardown needs is carried in `outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// The anchor resource identifier.
    pub id: String,
    /// Named outputs for downstream stages and teardown.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl ResourceHandle {
    /// Creates a handle with only an anchor id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Attaches a named output.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    /// Looks up a string output.
    #[must_use]
    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).and_then(serde_json::Value::as_str)
    }

    /// Looks up a list-of-strings output.
    #[must_use]
    pub fn output_str_list(&self, key: &str) -> Vec<String> {
        self.outputs
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handle_outputs() {
        let handle = ResourceHandle::new("vpc-123")
            .with_output("vpc_id", json!("vpc-123"))
            .with_output("public_subnet_ids", json!(["subnet-1", "subnet-2"]));

        assert_eq!(handle.output_str("vpc_id"), Some("vpc-123"));
        assert_eq!(
            handle.output_str_list("public_subnet_ids"),
            vec!["subnet-1".to_string(), "subnet-2".to_string()]
        );
        assert!(handle.output_str("missing").is_none());
        assert!(handle.output_str_list("missing").is_empty());
    }

    #[test]
    fn test_handle_roundtrip() {
        let handle = ResourceHandle::new("zone-1").with_output("nameservers", json!(["ns1", "ns2"]));
        let json = serde_json::to_string(&handle).expect("serialize");
        let back: ResourceHandle = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, handle);
    }
}
