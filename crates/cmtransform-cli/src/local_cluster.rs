//! Local manifest-directory cluster
//!
//! Stands in for a cluster API server during local runs. Manifests under
//! `manifests/` are loaded into a [`MemoryStore`]; derived ConfigMaps and
//! transform statuses are written back under `state/`.
//!
//! Source ConfigMap versions are a hash of their data, so an unchanged source
//! keeps its version across restarts and a resumed controller does no work.

use anyhow::{Context, Result};
use cmtransform_core::resource::{TRANSFORM_KIND, TransformResource};
use cmtransform_core::{Config, ConfigMap, MemoryStore, ObjectRef};
use cmtransform_runtime::{EventKind, Notification};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Length of the hex prefix used as a content-derived resource version
const VERSION_LEN: usize = 16;

/// A manifest directory backed by an in-memory store
pub struct LocalCluster {
    config: Config,
    store: Arc<MemoryStore>,
    /// Content fingerprints of manifests already loaded
    seen_configmaps: HashMap<ObjectRef, String>,
    seen_transforms: HashMap<ObjectRef, String>,
    scanned: bool,
}

impl LocalCluster {
    /// Open the cluster described by `config` and restore persisted state
    pub fn open(config: Config) -> Result<Self> {
        let cluster = Self {
            config,
            store: Arc::new(MemoryStore::new()),
            seen_configmaps: HashMap::new(),
            seen_transforms: HashMap::new(),
            scanned: false,
        };

        let manifests = cluster.config.manifests_path();
        if !manifests.is_dir() {
            anyhow::bail!("manifests directory not found: {}", manifests.display());
        }
        std::fs::create_dir_all(cluster.derived_dir())
            .context("Failed to create state directory")?;
        std::fs::create_dir_all(cluster.status_dir())
            .context("Failed to create state directory")?;

        cluster.restore_derived()?;
        Ok(cluster)
    }

    /// The store backing this cluster
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    fn derived_dir(&self) -> PathBuf {
        self.config.state_path().join("configmaps")
    }

    fn status_dir(&self) -> PathBuf {
        self.config.state_path().join("status")
    }

    fn default_namespace(&self) -> &str {
        &self.config.controller.default_namespace
    }

    /// Reload ConfigMaps written by a previous run
    fn restore_derived(&self) -> Result<()> {
        for path in yaml_files(&self.derived_dir()) {
            let contents = std::fs::read_to_string(&path)?;
            let configmap = ConfigMap::from_yaml(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            tracing::debug!(object = %configmap.object_ref(), "restored derived ConfigMap");
            self.store.put_configmap(configmap);
        }
        Ok(())
    }

    /// Load new or changed manifests into the store.
    ///
    /// Returns one notification per changed object. Transforms found by the
    /// first scan are loaded without a notification; the controller resumes
    /// them from the store.
    pub fn scan(&mut self) -> Result<Vec<Notification>> {
        let mut configmaps: Vec<ConfigMap> = Vec::new();
        let mut transforms: Vec<TransformResource> = Vec::new();

        for path in yaml_files(&self.config.manifests_path()) {
            let contents = std::fs::read_to_string(&path)?;
            let document: Value = match serde_yaml::from_str(&contents) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unparseable manifest"
                    );
                    continue;
                }
            };
            let parsed = match document.get("kind").and_then(Value::as_str) {
                Some("ConfigMap") => {
                    serde_json::from_value(document).map(|cm| configmaps.push(cm))
                }
                Some(TRANSFORM_KIND) => {
                    serde_json::from_value(document).map(|r| transforms.push(r))
                }
                other => {
                    tracing::debug!(path = %path.display(), kind = ?other, "ignoring manifest");
                    Ok(())
                }
            };
            if let Err(e) = parsed {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed manifest");
            }
        }

        let mut notifications = Vec::new();
        for configmap in configmaps {
            if let Some(n) = self.load_configmap(configmap)? {
                notifications.push(n);
            }
        }
        for resource in transforms {
            if let Some(n) = self.load_transform(resource)? {
                notifications.push(n);
            }
        }
        self.scanned = true;

        Ok(notifications)
    }

    fn load_configmap(&mut self, mut configmap: ConfigMap) -> Result<Option<Notification>> {
        if configmap.metadata.namespace.is_none() {
            configmap.metadata.namespace = Some(self.default_namespace().to_string());
        }
        let object = configmap.object_ref();
        let version = content_version(&serde_json::to_value(&configmap.data)?)?;
        let event = match self.seen_configmaps.get(&object) {
            Some(seen) if *seen == version => return Ok(None),
            Some(_) => EventKind::Updated,
            None => EventKind::Created,
        };

        configmap.metadata.resource_version = Some(version.clone());
        self.store.put_configmap(configmap);
        self.seen_configmaps.insert(object.clone(), version);
        Ok(Some(Notification::configmap(event, object)))
    }

    fn load_transform(&mut self, mut resource: TransformResource) -> Result<Option<Notification>> {
        if resource.metadata.namespace.is_none() {
            resource.metadata.namespace = Some(self.default_namespace().to_string());
        }
        let object = resource.object_ref();
        let fingerprint = content_version(&serde_json::json!({
            "metadata": &resource.metadata,
            "spec": &resource.spec,
        }))?;
        let event = match self.seen_transforms.get(&object) {
            Some(seen) if *seen == fingerprint => return Ok(None),
            Some(_) => EventKind::Updated,
            None => EventKind::Created,
        };

        // The controller owns status: keep what it recorded over the manifest's
        let stored_status = self
            .store
            .transform(&object)
            .and_then(|stored| stored.status);
        if let Some(status) = stored_status.or(self.read_status(&object)?) {
            resource.status = Some(status);
        }
        resource.metadata.resource_version = None;

        let stored = self.store.put_transform(resource);
        self.seen_transforms.insert(object, fingerprint);
        Ok(self.scanned.then(|| Notification::transform(event, stored)))
    }

    fn read_status(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let path = self.status_dir().join(file_name(object));
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let status = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(status))
    }

    /// Write derived ConfigMaps and transform statuses under `state/`.
    ///
    /// Returns the number of derived ConfigMaps written.
    pub fn persist(&self) -> Result<usize> {
        let manifests: HashSet<&ObjectRef> = self.seen_configmaps.keys().collect();

        let mut written = 0;
        for configmap in self.store.configmaps() {
            let object = configmap.object_ref();
            if manifests.contains(&object) {
                continue;
            }
            write_yaml(&self.derived_dir().join(file_name(&object)), &configmap)?;
            written += 1;
        }

        for resource in self.store.transforms() {
            if let Some(status) = &resource.status {
                write_yaml(&self.status_dir().join(file_name(&resource.object_ref())), status)?;
            }
        }

        tracing::debug!(written, "persisted local state");
        Ok(written)
    }
}

/// Content-derived resource version
fn content_version(value: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok(digest[..VERSION_LEN].to_string())
}

/// `namespace_name.yaml`; object names cannot contain `_`
fn file_name(object: &ObjectRef) -> String {
    format!("{}_{}.yaml", object.namespace, object.name)
}

fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_yaml::to_string(value)?;
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// YAML files under `dir`, sorted by path
fn yaml_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    files
}
