//! Transform rules
//!
//! A rule names a key of the source ConfigMap's data that must be copied,
//! converted, and written into the target ConfigMap.
//!
//! Every rule is currently converted with base64 encoding. The declared
//! `type` is carried through untouched; nothing dispatches on it.
//!
//! # Example
//!
//! ```yaml
//! transforms:
//!   - key: user
//!     type: base64
//!   - key: password
//!     type: base64
//! ```

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::resource::ConfigMap;

/// A single field conversion rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Key in the source ConfigMap's data
    pub key: String,

    /// Declared conversion kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Rule {
    /// Create a rule for `key` with the given declared kind
    pub fn new(key: impl Into<String>, kind: Option<&str>) -> Self {
        Self {
            key: key.into(),
            kind: kind.map(str::to_string),
        }
    }
}

/// Base64-encode a value (standard alphabet, padded)
pub fn encode_base64(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

/// Build the full replacement data for a target ConfigMap.
///
/// Fails with [`Error::Conversion`] on the first rule whose key is absent
/// from `source`, so a partial data set is never returned.
pub fn apply_rules(rules: &[Rule], source: &ConfigMap) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    for rule in rules {
        let original = source
            .data
            .get(&rule.key)
            .ok_or_else(|| Error::Conversion {
                source_ref: source.object_ref().to_string(),
                key: rule.key.clone(),
            })?;
        data.insert(rule.key.clone(), encode_base64(original));
    }
    Ok(data)
}
