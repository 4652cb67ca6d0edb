//! Process-lifetime index of transform specifications
//!
//! Two indices, neither persisted:
//! - by identity: `namespace/name` of the `ConfigMapTransform` → specification,
//!   refreshed on every specification notification
//! - by source: `namespace/name` of the source ConfigMap → specification,
//!   refreshed after a transform attempt that found the source
//!
//! The by-source index is last-write-wins: when two specifications read the
//! same ConfigMap, only the most recently registered one is reachable from
//! source notifications. Entries are only replaced, never removed: after a
//! specification changes its rules or `sourceRef`, the by-source index keeps
//! the previous copy until a transform of the new version succeeds, and the
//! old source stays routed to that copy until another specification claims it.
//!
//! The registry also hands out the per-object locks that serialize applies.
//! Callers always take a source lock before a target lock.

use cmtransform_core::{ObjectRef, TransformSpecification};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared registry of transform specifications
#[derive(Debug, Default)]
pub struct Registry {
    by_identity: DashMap<ObjectRef, TransformSpecification>,
    by_source: DashMap<ObjectRef, TransformSpecification>,
    source_locks: DashMap<ObjectRef, Arc<Mutex<()>>>,
    target_locks: DashMap<ObjectRef, Arc<Mutex<()>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `spec` under its own identity, replacing any previous version
    pub fn register_specification(&self, spec: TransformSpecification) {
        tracing::debug!(specification = %spec.identity, "registered specification");
        self.by_identity.insert(spec.identity.clone(), spec);
    }

    /// Route notifications for `spec.source` to `spec`.
    ///
    /// Overwrites whatever specification previously claimed the source.
    pub fn register_source(&self, spec: TransformSpecification) {
        let source = spec.source.object_ref();
        let identity = spec.identity.clone();
        if let Some(previous) = self.by_source.insert(source.clone(), spec)
            && previous.identity != identity
        {
            tracing::warn!(
                source = %source,
                previous = %previous.identity,
                current = %identity,
                "source ConfigMap claimed by another specification; previous registration replaced"
            );
        }
        tracing::info!(
            source = %source,
            specification = %identity,
            "ConfigMap is now being monitored"
        );
    }

    /// Specification registered under `identity`
    pub fn specification(&self, identity: &ObjectRef) -> Option<TransformSpecification> {
        self.by_identity.get(identity).map(|entry| entry.value().clone())
    }

    /// Specification responsible for the source ConfigMap `source`
    pub fn for_source(&self, source: &ObjectRef) -> Option<TransformSpecification> {
        self.by_source.get(source).map(|entry| entry.value().clone())
    }

    /// Whether any specification monitors the source ConfigMap `source`
    pub fn is_monitored(&self, source: &ObjectRef) -> bool {
        self.by_source.contains_key(source)
    }

    /// Lock serializing work on the source ConfigMap `source`
    pub fn source_lock(&self, source: &ObjectRef) -> Arc<Mutex<()>> {
        self.source_locks
            .entry(source.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Lock serializing writes to the target ConfigMap `target`
    pub fn target_lock(&self, target: &ObjectRef) -> Arc<Mutex<()>> {
        self.target_locks
            .entry(target.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Source ConfigMaps currently monitored, sorted
    pub fn monitored_sources(&self) -> Vec<ObjectRef> {
        let mut sources: Vec<_> = self.by_source.iter().map(|e| e.key().clone()).collect();
        sources.sort();
        sources
    }

    /// Number of specifications registered by identity
    pub fn specification_count(&self) -> usize {
        self.by_identity.len()
    }

    /// Number of source locks handed out so far
    pub fn source_lock_count(&self) -> usize {
        self.source_locks.len()
    }
}
