//! Render a target ConfigMap offline

use anyhow::{Context, Result};
use cmtransform_core::rules::apply_rules;
use cmtransform_core::{ConfigMap, TransformResource, TransformSpecification};

/// Run the render command
pub async fn run(source_path: &str, transform_path: &str) -> Result<()> {
    let source = std::fs::read_to_string(source_path)
        .with_context(|| format!("Failed to read {source_path}"))?;
    let source = ConfigMap::from_yaml(&source).context("Failed to parse source ConfigMap")?;

    let transform = std::fs::read_to_string(transform_path)
        .with_context(|| format!("Failed to read {transform_path}"))?;
    let resource =
        TransformResource::from_yaml(&transform).context("Failed to parse ConfigMapTransform")?;
    let spec = TransformSpecification::from_resource(&resource)?;

    if source.object_ref() != spec.source.object_ref() {
        tracing::warn!(
            "Source {} is not the one referenced by {} ({})",
            source.object_ref(),
            spec.identity,
            spec.source.object_ref()
        );
    }

    let target_ref = spec.target_ref();
    let target = ConfigMap::new(
        target_ref.namespace,
        target_ref.name,
        apply_rules(&spec.rules, &source)?,
    );
    print!("{}", serde_yaml::to_string(&target)?);
    Ok(())
}
