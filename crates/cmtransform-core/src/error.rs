//! Error types for cmtransform-core

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for cmtransform-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cmtransform-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration or manifest
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// A transform resource is missing a required field or is malformed
    #[error("invalid transform '{resource}': {field}: {message}")]
    Validation {
        /// Identity of the offending resource (`namespace/name`)
        resource: String,
        /// Dotted path of the field at fault
        field: String,
        /// Description of the problem
        message: String,
    },

    /// A rule referenced a key that the source ConfigMap does not carry
    #[error("key '{key}' not found in source ConfigMap '{source_ref}'")]
    Conversion {
        /// Identity of the source ConfigMap
        source_ref: String,
        /// The missing data key
        key: String,
    },

    /// Store client failure other than a plain not-found read
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a validation error for `resource` at `field`.
    pub fn validation(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether redelivering the same notification could succeed.
    ///
    /// Validation and conversion failures persist until the object is edited.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = Error::validation("default/t", "spec.targetConfigMap", "is required");
        assert_eq!(
            err.to_string(),
            "invalid transform 'default/t': spec.targetConfigMap: is required"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_errors_are_retryable() {
        let err: Error = StoreError::backend("connection reset").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_conversion_not_retryable() {
        let err = Error::Conversion {
            source_ref: "default/app-config".to_string(),
            key: "user".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'user'"));
    }
}
