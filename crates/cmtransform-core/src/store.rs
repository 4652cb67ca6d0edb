//! Store client traits and implementations
//!
//! The controller talks to the cluster state store through two narrow
//! clients: [`ConfigMapApi`] for source/target objects and [`TransformApi`]
//! for the transform custom resources. Both are injected as trait objects so
//! the engine never reaches for a global client.
//!
//! Reads return `Ok(None)` for a missing object. Every other failure, including
//! a not-found from a write, is a [`StoreError`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::resource::{ConfigMap, ObjectRef, TransformResource, merge_patch};

/// Result type for store client calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by a store client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object addressed by a write does not exist
    #[error("{kind} '{object}' not found")]
    NotFound {
        /// Resource kind
        kind: &'static str,
        /// Object identity (`namespace/name`)
        object: String,
    },

    /// A create collided with an existing object
    #[error("{kind} '{object}' already exists")]
    AlreadyExists {
        /// Resource kind
        kind: &'static str,
        /// Object identity (`namespace/name`)
        object: String,
    },

    /// Any other backend failure (transport, authorization, server error)
    #[error("store backend error: {message}")]
    Backend {
        /// Description of the failure
        message: String,
    },
}

impl StoreError {
    /// Build a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Client for ConfigMaps
#[async_trait]
pub trait ConfigMapApi: Send + Sync {
    /// Read a ConfigMap; `Ok(None)` when it does not exist
    async fn get(&self, object: &ObjectRef) -> StoreResult<Option<ConfigMap>>;

    /// Create a ConfigMap in `namespace`
    async fn create(&self, namespace: &str, configmap: ConfigMap) -> StoreResult<ConfigMap>;

    /// Replace an existing ConfigMap wholesale
    async fn replace(&self, object: &ObjectRef, configmap: ConfigMap) -> StoreResult<ConfigMap>;
}

/// Client for `ConfigMapTransform` resources
#[async_trait]
pub trait TransformApi: Send + Sync {
    /// List every transform resource
    async fn list(&self) -> StoreResult<Vec<TransformResource>>;

    /// Merge-patch the status of a transform resource.
    ///
    /// Only the `status` member of `patch` is applied.
    async fn patch_status(&self, object: &ObjectRef, patch: Value)
    -> StoreResult<TransformResource>;
}

// ============================================================================
// In-memory store (local runs and tests)
// ============================================================================

/// Store operations, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// [`ConfigMapApi::get`]
    GetConfigMap,
    /// [`ConfigMapApi::create`]
    CreateConfigMap,
    /// [`ConfigMapApi::replace`]
    ReplaceConfigMap,
    /// [`TransformApi::list`]
    ListTransforms,
    /// [`TransformApi::patch_status`]
    PatchStatus,
}

/// Count of writes performed through the client traits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// ConfigMap creates
    pub creates: usize,
    /// ConfigMap replaces
    pub replaces: usize,
    /// Transform status patches
    pub status_patches: usize,
}

impl WriteStats {
    /// All writes combined
    pub fn total(&self) -> usize {
        self.creates + self.replaces + self.status_patches
    }
}

#[derive(Debug, Default)]
struct Inner {
    configmaps: BTreeMap<ObjectRef, ConfigMap>,
    transforms: BTreeMap<ObjectRef, TransformResource>,
    next_version: u64,
    stats: WriteStats,
    failures: Vec<(StoreOp, StoreError)>,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_failure(&mut self, op: StoreOp) -> StoreResult<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }
}

/// Thread-safe in-memory implementation of both store clients
///
/// Writes through the client traits always assign a fresh numeric
/// `resourceVersion`. Objects seeded with [`MemoryStore::put_configmap`] or
/// [`MemoryStore::put_transform`] keep a caller-provided version, which lets a
/// local run pin versions to content hashes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or overwrite a ConfigMap as an external writer would.
    ///
    /// Returns the stored object with its version.
    pub fn put_configmap(&self, mut configmap: ConfigMap) -> ConfigMap {
        let mut inner = self.inner();
        if configmap.metadata.resource_version.is_none() {
            configmap.metadata.resource_version = Some(inner.bump_version());
        }
        let object = configmap.object_ref();
        configmap.metadata.namespace = Some(object.namespace.clone());
        inner.configmaps.insert(object, configmap.clone());
        configmap
    }

    /// Insert or overwrite a transform resource as an external writer would.
    pub fn put_transform(&self, mut resource: TransformResource) -> TransformResource {
        let mut inner = self.inner();
        if resource.metadata.resource_version.is_none() {
            resource.metadata.resource_version = Some(inner.bump_version());
        }
        let object = resource.object_ref();
        resource.metadata.namespace = Some(object.namespace.clone());
        inner.transforms.insert(object, resource.clone());
        resource
    }

    /// Snapshot of a single ConfigMap
    pub fn configmap(&self, object: &ObjectRef) -> Option<ConfigMap> {
        self.inner().configmaps.get(object).cloned()
    }

    /// Snapshot of a single transform resource
    pub fn transform(&self, object: &ObjectRef) -> Option<TransformResource> {
        self.inner().transforms.get(object).cloned()
    }

    /// Snapshot of every ConfigMap, ordered by identity
    pub fn configmaps(&self) -> Vec<ConfigMap> {
        self.inner().configmaps.values().cloned().collect()
    }

    /// Snapshot of every transform resource, ordered by identity
    pub fn transforms(&self) -> Vec<TransformResource> {
        self.inner().transforms.values().cloned().collect()
    }

    /// Writes performed through the client traits so far
    pub fn write_stats(&self) -> WriteStats {
        self.inner().stats
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.inner().failures.push((op, error));
    }
}

#[async_trait]
impl ConfigMapApi for MemoryStore {
    async fn get(&self, object: &ObjectRef) -> StoreResult<Option<ConfigMap>> {
        let mut inner = self.inner();
        inner.take_failure(StoreOp::GetConfigMap)?;
        Ok(inner.configmaps.get(object).cloned())
    }

    async fn create(&self, namespace: &str, mut configmap: ConfigMap) -> StoreResult<ConfigMap> {
        let mut inner = self.inner();
        inner.take_failure(StoreOp::CreateConfigMap)?;

        configmap.metadata.namespace = Some(namespace.to_string());
        let object = configmap.object_ref();
        if inner.configmaps.contains_key(&object) {
            return Err(StoreError::AlreadyExists {
                kind: "ConfigMap",
                object: object.to_string(),
            });
        }

        configmap.metadata.resource_version = Some(inner.bump_version());
        inner.configmaps.insert(object, configmap.clone());
        inner.stats.creates += 1;
        Ok(configmap)
    }

    async fn replace(
        &self,
        object: &ObjectRef,
        mut configmap: ConfigMap,
    ) -> StoreResult<ConfigMap> {
        let mut inner = self.inner();
        inner.take_failure(StoreOp::ReplaceConfigMap)?;

        if !inner.configmaps.contains_key(object) {
            return Err(StoreError::NotFound {
                kind: "ConfigMap",
                object: object.to_string(),
            });
        }

        configmap.metadata.name = object.name.clone();
        configmap.metadata.namespace = Some(object.namespace.clone());
        configmap.metadata.resource_version = Some(inner.bump_version());
        inner.configmaps.insert(object.clone(), configmap.clone());
        inner.stats.replaces += 1;
        Ok(configmap)
    }
}

#[async_trait]
impl TransformApi for MemoryStore {
    async fn list(&self) -> StoreResult<Vec<TransformResource>> {
        let mut inner = self.inner();
        inner.take_failure(StoreOp::ListTransforms)?;
        Ok(inner.transforms.values().cloned().collect())
    }

    async fn patch_status(
        &self,
        object: &ObjectRef,
        patch: Value,
    ) -> StoreResult<TransformResource> {
        let mut inner = self.inner();
        inner.take_failure(StoreOp::PatchStatus)?;

        let version = inner.bump_version();
        let resource = inner
            .transforms
            .get_mut(object)
            .ok_or_else(|| StoreError::NotFound {
                kind: "ConfigMapTransform",
                object: object.to_string(),
            })?;

        if let Some(status_patch) = patch.get("status") {
            let status = resource.status.get_or_insert(Value::Null);
            merge_patch(status, status_patch);
        }
        resource.metadata.resource_version = Some(version);
        let patched = resource.clone();
        inner.stats.status_patches += 1;
        Ok(patched)
    }
}
