//! Configuration parsing and validation
//!
//! This module handles loading and validating the controller configuration.
//!
//! # Configuration Files
//!
//! - `cmtransform.yaml` - Controller configuration
//! - `manifests/configmaps/*.yaml` - Source ConfigMaps (local runs)
//! - `manifests/transforms/*.yaml` - `ConfigMapTransform` resources (local runs)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::resource::DEFAULT_NAMESPACE;

/// Name of the configuration file looked up inside a directory
pub const CONFIG_FILE_NAME: &str = "cmtransform.yaml";

/// Root configuration from `cmtransform.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller name, used in logs
    pub name: String,

    /// Namespace assumed for manifests that carry none
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Directory holding the watched manifests, relative to the config file
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: String,

    /// Directory receiving derived ConfigMaps and statuses
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Controller loop settings
    #[serde(default)]
    pub controller: LoopConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_manifests_dir() -> String {
    "manifests".to_string()
}

fn default_state_dir() -> String {
    "state".to_string()
}

/// Controller loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Interval between manifest directory scans
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Redeliveries of a failed notification before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first redelivery, doubled on each attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on the redelivery backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl LoopConfig {
    /// Backoff before redelivery number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        std::time::Duration::from_millis(millis)
    }
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Controller configuration
    pub controller: ControllerConfig,

    /// Directory the configuration was loaded from
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a directory or a `cmtransform.yaml` file
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./my-controller")?;
    /// println!("Controller: {}", config.controller.name);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(CONFIG_FILE_NAME), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let controller: ControllerConfig = serde_yaml::from_str(&contents)?;

        let config = Self {
            controller,
            base_path,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let settings = &self.controller.controller;
        if settings.poll_interval_ms == 0 {
            return Err(Error::ConfigInvalid {
                message: "controller.poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if settings.retry_backoff_ms > settings.max_backoff_ms {
            return Err(Error::ConfigInvalid {
                message: format!(
                    "controller.retry_backoff_ms ({}) exceeds controller.max_backoff_ms ({})",
                    settings.retry_backoff_ms, settings.max_backoff_ms
                ),
            });
        }
        if self.controller.default_namespace.is_empty() {
            return Err(Error::ConfigInvalid {
                message: "default_namespace must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Absolute-or-relative path of the manifests directory
    pub fn manifests_path(&self) -> PathBuf {
        self.base_path.join(&self.controller.manifests_dir)
    }

    /// Absolute-or-relative path of the state directory
    pub fn state_path(&self) -> PathBuf {
        self.base_path.join(&self.controller.state_dir)
    }
}
