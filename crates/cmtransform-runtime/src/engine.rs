//! Transform engine
//!
//! Decides whether a specification needs to be applied and applies it:
//! read the source, compare its version against the last applied one, convert
//! every rule, create or replace the target, then persist the new version in
//! the specification's status.
//!
//! Every read-check-write-persist sequence runs under the source's lock, and
//! the target upsert additionally under the target's lock.

use cmtransform_core::rules::apply_rules;
use cmtransform_core::{
    ConfigMap, ConfigMapApi, ObjectRef, Result, TransformApi, TransformResource,
    TransformSpecification,
};
use std::sync::Arc;

use crate::registry::Registry;

/// Result of a transform attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The source ConfigMap does not exist; nothing was written
    SourceMissing,
    /// The source version was already applied; nothing was written
    UpToDate {
        /// Current source version
        version: String,
    },
    /// The target was written and, for a versioned source, the status updated
    Applied {
        /// Whether the target was created rather than replaced
        created: bool,
        /// Source version that was applied, if the source carried one
        version: Option<String>,
    },
}

/// Orchestrates the decide-and-apply cycle for transform specifications
pub struct TransformEngine {
    configmaps: Arc<dyn ConfigMapApi>,
    transforms: Arc<dyn TransformApi>,
    registry: Arc<Registry>,
}

impl TransformEngine {
    /// Create an engine over the given store clients and registry
    pub fn new(
        configmaps: Arc<dyn ConfigMapApi>,
        transforms: Arc<dyn TransformApi>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            configmaps,
            transforms,
            registry,
        }
    }

    /// The registry this engine keeps up to date
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle a created, updated, or resumed `ConfigMapTransform`.
    ///
    /// The specification is rebuilt from `resource` (including the persisted
    /// status), registered by identity, and applied if its source exists.
    pub async fn refresh_specification(&self, resource: &TransformResource) -> Result<Outcome> {
        let mut spec = TransformSpecification::from_resource(resource)?;
        tracing::info!(specification = %spec.identity, "registering transform");

        let lock = self.registry.source_lock(&spec.source.object_ref());
        let _guard = lock.lock().await;

        self.registry.register_specification(spec.clone());
        self.transform_if_exists_locked(&mut spec, false).await
    }

    /// Handle a created or updated source ConfigMap.
    ///
    /// Returns `None` when no specification monitors `source`.
    pub async fn reconcile_source(&self, source: &ObjectRef) -> Result<Option<Outcome>> {
        // Unmonitored sources never take a lock
        if !self.registry.is_monitored(source) {
            tracing::debug!(source = %source, "ConfigMap is not currently being monitored");
            return Ok(None);
        }

        let lock = self.registry.source_lock(source);
        let _guard = lock.lock().await;

        let Some(mut spec) = self.registry.for_source(source) else {
            return Ok(None);
        };
        tracing::info!(
            source = %source,
            specification = %spec.identity,
            "monitored ConfigMap changed"
        );
        self.transform_if_exists_locked(&mut spec, false).await.map(Some)
    }

    /// Apply `spec` if its source ConfigMap exists.
    ///
    /// With `override_version` the apply runs even when the source version
    /// matches the last applied one. On success `spec.last_applied_version`
    /// is updated in place.
    pub async fn transform_if_exists(
        &self,
        spec: &mut TransformSpecification,
        override_version: bool,
    ) -> Result<Outcome> {
        let lock = self.registry.source_lock(&spec.source.object_ref());
        let _guard = lock.lock().await;
        self.transform_if_exists_locked(spec, override_version).await
    }

    async fn transform_if_exists_locked(
        &self,
        spec: &mut TransformSpecification,
        override_version: bool,
    ) -> Result<Outcome> {
        let source_ref = spec.source.object_ref();
        tracing::debug!(source = %source_ref, "reading source ConfigMap");

        match self.configmaps.get(&source_ref).await? {
            Some(source) => self.transform_locked(spec, &source, override_version).await,
            None => {
                tracing::info!(
                    source = %source_ref,
                    specification = %spec.identity,
                    "source ConfigMap does not exist"
                );
                Ok(Outcome::SourceMissing)
            }
        }
    }

    /// Apply `spec` to an already fetched `source`.
    ///
    /// Takes the source lock itself; use [`TransformEngine::transform_if_exists`]
    /// when the source still has to be read.
    pub async fn transform(
        &self,
        spec: &mut TransformSpecification,
        source: &ConfigMap,
        override_version: bool,
    ) -> Result<Outcome> {
        let lock = self.registry.source_lock(&spec.source.object_ref());
        let _guard = lock.lock().await;
        self.transform_locked(spec, source, override_version).await
    }

    async fn transform_locked(
        &self,
        spec: &mut TransformSpecification,
        source: &ConfigMap,
        override_version: bool,
    ) -> Result<Outcome> {
        let source_ref = source.object_ref();
        let version = source.resource_version().filter(|v| !v.is_empty());

        let outcome = match version {
            Some(version) if !override_version && spec.is_synced_with(version) => {
                tracing::info!(
                    source = %source_ref,
                    version,
                    "source ConfigMap does not need to be updated"
                );
                Outcome::UpToDate {
                    version: version.to_string(),
                }
            }
            _ => {
                tracing::info!(
                    source = %source_ref,
                    version = version.unwrap_or("<none>"),
                    last_applied = spec.last_applied_version.as_deref().unwrap_or("<none>"),
                    "transforming source ConfigMap"
                );
                let created = self.apply(spec, source, version).await?;
                spec.last_applied_version = version.map(str::to_string);
                Outcome::Applied {
                    created,
                    version: version.map(str::to_string),
                }
            }
        };

        self.registry.register_specification(spec.clone());
        self.registry.register_source(spec.clone());
        Ok(outcome)
    }

    /// Write the converted data to the target and record `version` in the
    /// specification's status, both under the target lock. Without a source
    /// version the status is left alone. Returns whether the target was
    /// created.
    async fn apply(
        &self,
        spec: &TransformSpecification,
        source: &ConfigMap,
        version: Option<&str>,
    ) -> Result<bool> {
        let data = apply_rules(&spec.rules, source)?;
        let target_ref = spec.target_ref();
        let definition = ConfigMap::new(
            target_ref.namespace.clone(),
            target_ref.name.clone(),
            data,
        );

        let lock = self.registry.target_lock(&target_ref);
        let _guard = lock.lock().await;

        let created = match self.configmaps.get(&target_ref).await? {
            None => {
                let committed = self
                    .configmaps
                    .create(&target_ref.namespace, definition)
                    .await?;
                tracing::info!(
                    target = %target_ref,
                    version = committed.resource_version().unwrap_or_default(),
                    "created target ConfigMap"
                );
                true
            }
            Some(_) => {
                let committed = self.configmaps.replace(&target_ref, definition).await?;
                tracing::info!(
                    target = %target_ref,
                    version = committed.resource_version().unwrap_or_default(),
                    "replaced target ConfigMap"
                );
                false
            }
        };

        match version {
            Some(version) => {
                self.transforms
                    .patch_status(&spec.identity, spec.status_patch(version))
                    .await?;
            }
            None => tracing::warn!(
                source = %source.object_ref(),
                specification = %spec.identity,
                "source ConfigMap has no resourceVersion, status not recorded"
            ),
        }
        Ok(created)
    }
}
