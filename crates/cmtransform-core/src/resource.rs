//! Cluster resource model
//!
//! Plain serde representations of the two resource kinds the controller
//! watches: `ConfigMap` (source and target objects) and `ConfigMapTransform`
//! (the transform specification custom resource).
//!
//! # Example
//!
//! ```yaml
//! apiVersion: xlscsde.nhs.uk/v1
//! kind: ConfigMapTransform
//! metadata:
//!   name: app-config-encoded
//!   namespace: default
//! spec:
//!   sourceRef:
//!     name: app-config
//!   targetConfigMap: app-config-encoded
//!   transforms:
//!     - key: user
//!       type: base64
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// API version of the transform custom resource
pub const TRANSFORM_API_VERSION: &str = "xlscsde.nhs.uk/v1";

/// Kind of the transform custom resource
pub const TRANSFORM_KIND: &str = "ConfigMapTransform";

/// Namespace assumed when a resource carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectRef {
    /// Create a new object reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata shared by both resource kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name
    #[serde(default)]
    pub name: String,

    /// Object namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Opaque version token assigned by the store on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Identity of the object, falling back to `default_namespace`
    pub fn object_ref(&self, default_namespace: &str) -> ObjectRef {
        ObjectRef::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        )
    }
}

fn default_configmap_api_version() -> String {
    "v1".to_string()
}

fn default_configmap_kind() -> String {
    "ConfigMap".to_string()
}

/// A ConfigMap: a named bundle of string key/value data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    /// Always `v1`
    #[serde(default = "default_configmap_api_version")]
    pub api_version: String,

    /// Always `ConfigMap`
    #[serde(default = "default_configmap_kind")]
    pub kind: String,

    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Data entries
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    /// Create an unversioned ConfigMap with the given data
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            api_version: default_configmap_api_version(),
            kind: default_configmap_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some(namespace.into()),
                resource_version: None,
            },
            data,
        }
    }

    /// Identity of this ConfigMap
    pub fn object_ref(&self) -> ObjectRef {
        self.metadata.object_ref(DEFAULT_NAMESPACE)
    }

    /// The store-assigned version token, if any
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Parse a ConfigMap manifest
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// A `ConfigMapTransform` custom resource body as stored
///
/// `spec` and `status` are kept untyped so that a malformed resource can be
/// reported field by field by [`crate::spec::TransformSpecification::from_resource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResource {
    /// API version, expected to be [`TRANSFORM_API_VERSION`]
    #[serde(default)]
    pub api_version: String,

    /// Kind, expected to be [`TRANSFORM_KIND`]
    #[serde(default)]
    pub kind: String,

    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired state
    #[serde(default)]
    pub spec: Value,

    /// Observed state, written by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl TransformResource {
    /// Identity of this resource, defaulting the namespace to `default`
    pub fn object_ref(&self) -> ObjectRef {
        self.metadata.object_ref(DEFAULT_NAMESPACE)
    }

    /// Parse a transform manifest from YAML
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Build a resource from an arbitrary JSON body
    pub fn from_json_value(body: Value) -> Result<Self> {
        Ok(serde_json::from_value(body)?)
    }

    /// `status.source.lastResourceVersion`, if recorded and non-empty
    pub fn last_resource_version(&self) -> Option<String> {
        let value = self.status.as_ref()?.get("source")?.get("lastResourceVersion")?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Apply a JSON merge patch (RFC 7386) to `target` in place.
///
/// Objects merge recursively, `null` removes a member, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new("default", "app-config").to_string(), "default/app-config");
    }

    #[test]
    fn test_parse_configmap() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: team-a
  resourceVersion: "42"
data:
  user: alice
"#;
        let cm = ConfigMap::from_yaml(yaml).unwrap();
        assert_eq!(cm.object_ref(), ObjectRef::new("team-a", "app-config"));
        assert_eq!(cm.resource_version(), Some("42"));
        assert_eq!(cm.data.get("user"), Some(&"alice".to_string()));
    }

    #[test]
    fn test_configmap_without_data_or_namespace() {
        let cm = ConfigMap::from_yaml("metadata:\n  name: empty\n").unwrap();
        assert!(cm.data.is_empty());
        assert_eq!(cm.kind, "ConfigMap");
        assert_eq!(cm.object_ref(), ObjectRef::new("default", "empty"));
    }

    #[test]
    fn test_last_resource_version_string_and_number() {
        let mut resource = TransformResource::from_json_value(json!({
            "apiVersion": TRANSFORM_API_VERSION,
            "kind": TRANSFORM_KIND,
            "metadata": {"name": "t"},
            "spec": {},
            "status": {"source": {"lastResourceVersion": "42"}}
        }))
        .unwrap();
        assert_eq!(resource.last_resource_version(), Some("42".to_string()));

        resource.status = Some(json!({"source": {"lastResourceVersion": 43}}));
        assert_eq!(resource.last_resource_version(), Some("43".to_string()));

        resource.status = Some(json!({"source": {"lastResourceVersion": ""}}));
        assert_eq!(resource.last_resource_version(), None);

        resource.status = None;
        assert_eq!(resource.last_resource_version(), None);
    }

    #[test]
    fn test_merge_patch_merges_nested_objects() {
        let mut target = json!({
            "metadata": {"name": "t"},
            "status": {"source": {"lastResourceVersion": "1"}, "other": true}
        });
        merge_patch(
            &mut target,
            &json!({"status": {"source": {"lastResourceVersion": "2"}}}),
        );
        assert_eq!(target["status"]["source"]["lastResourceVersion"], "2");
        assert_eq!(target["status"]["other"], true);
        assert_eq!(target["metadata"]["name"], "t");
    }

    #[test]
    fn test_merge_patch_null_removes() {
        let mut target = json!({"a": 1, "b": 2});
        merge_patch(&mut target, &json!({"a": null}));
        assert_eq!(target, json!({"b": 2}));
    }

    #[test]
    fn test_merge_patch_into_missing_status() {
        let mut target = Value::Null;
        merge_patch(&mut target, &json!({"source": {"lastResourceVersion": "7"}}));
        assert_eq!(target["source"]["lastResourceVersion"], "7");
    }
}
