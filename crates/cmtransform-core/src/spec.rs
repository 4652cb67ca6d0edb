//! Transform specification parsing
//!
//! Turns a stored `ConfigMapTransform` resource into a validated
//! [`TransformSpecification`]. Parsing is pure: no store access, no logging.

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::resource::{ObjectRef, TRANSFORM_API_VERSION, TRANSFORM_KIND, TransformResource};
use crate::rules::Rule;

/// Reference to the source ConfigMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    /// Source ConfigMap name
    pub name: String,
    /// Source namespace; the specification's own namespace when unset
    pub namespace: String,
}

impl SourceReference {
    /// Identity of the source ConfigMap
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.namespace.clone(), self.name.clone())
    }
}

/// A validated, in-memory transform specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpecification {
    /// Identity of the `ConfigMapTransform` resource
    pub identity: ObjectRef,
    /// Name of the derived ConfigMap, written in the specification's namespace
    pub target: String,
    /// ConfigMap to read from
    pub source: SourceReference,
    /// Ordered conversion rules
    pub rules: Vec<Rule>,
    /// Source version recorded by the most recent successful apply
    pub last_applied_version: Option<String>,
}

impl TransformSpecification {
    /// Build a specification from a stored resource body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the resource is not a
    /// `ConfigMapTransform`, has no name, or lacks `spec.sourceRef.name`,
    /// `spec.targetConfigMap`, or `spec.transforms`.
    pub fn from_resource(resource: &TransformResource) -> Result<Self> {
        let identity = resource.object_ref();
        let invalid =
            |field: &str, message: &str| Error::validation(identity.to_string(), field, message);

        if resource.api_version != TRANSFORM_API_VERSION || resource.kind != TRANSFORM_KIND {
            return Err(invalid(
                "apiVersion/kind",
                &format!(
                    "expected {TRANSFORM_API_VERSION}/{TRANSFORM_KIND}, got {}/{}",
                    resource.api_version, resource.kind
                ),
            ));
        }
        if identity.name.is_empty() {
            return Err(invalid("metadata.name", "is required"));
        }

        let spec = &resource.spec;

        let source_ref = spec
            .get("sourceRef")
            .filter(|v| v.is_object())
            .ok_or_else(|| invalid("spec.sourceRef", "is required"))?;
        let source_name = required_str(source_ref, "name")
            .ok_or_else(|| invalid("spec.sourceRef.name", "must be a non-empty string"))?;
        let source_namespace = match source_ref.get("namespace") {
            None | Some(Value::Null) => identity.namespace.clone(),
            Some(Value::String(ns)) if !ns.is_empty() => ns.clone(),
            Some(Value::String(_)) => identity.namespace.clone(),
            Some(_) => return Err(invalid("spec.sourceRef.namespace", "must be a string")),
        };

        let target = required_str(spec, "targetConfigMap")
            .ok_or_else(|| invalid("spec.targetConfigMap", "must be a non-empty string"))?;

        let transforms = spec
            .get("transforms")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("spec.transforms", "must be a list"))?;
        let rules = transforms
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                parse_rule(entry).ok_or_else(|| {
                    invalid(
                        &format!("spec.transforms[{index}]"),
                        "must have a non-empty string 'key'",
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity,
            target,
            source: SourceReference {
                name: source_name,
                namespace: source_namespace,
            },
            rules,
            last_applied_version: resource.last_resource_version(),
        })
    }

    /// Identity of the derived ConfigMap
    pub fn target_ref(&self) -> ObjectRef {
        ObjectRef::new(self.identity.namespace.clone(), self.target.clone())
    }

    /// Merge-patch body recording `version` as the last applied source version
    pub fn status_patch(&self, version: &str) -> Value {
        json!({
            "apiVersion": TRANSFORM_API_VERSION,
            "kind": TRANSFORM_KIND,
            "metadata": {
                "name": self.identity.name,
                "namespace": self.identity.namespace,
            },
            "status": {
                "source": {
                    "lastResourceVersion": version,
                }
            }
        })
    }

    /// Whether `version` is the one already applied.
    ///
    /// An empty version never matches.
    pub fn is_synced_with(&self, version: &str) -> bool {
        !version.is_empty() && self.last_applied_version.as_deref() == Some(version)
    }
}

fn required_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_rule(entry: &Value) -> Option<Rule> {
    let key = required_str(entry, "key")?;
    let kind = entry.get("type").and_then(Value::as_str);
    Some(Rule::new(key, kind))
}
