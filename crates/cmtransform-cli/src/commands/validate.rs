//! Validate a transform manifest

use anyhow::{Context, Result};
use cmtransform_core::{TransformResource, TransformSpecification};

/// Run the validate command
pub async fn run(file: &str) -> Result<()> {
    tracing::info!("Validating manifest: {}", file);

    let contents =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {file}"))?;
    let resource = TransformResource::from_yaml(&contents).context("Failed to parse manifest")?;
    let spec = TransformSpecification::from_resource(&resource)?;

    tracing::info!("✓ Transform: {}", spec.identity);
    tracing::info!("✓ Source: {}", spec.source.object_ref());
    tracing::info!("✓ Target: {}", spec.target_ref());
    for rule in &spec.rules {
        tracing::info!(
            "✓ Rule: {} ({})",
            rule.key,
            rule.kind.as_deref().unwrap_or("no type")
        );
    }
    if let Some(version) = &spec.last_applied_version {
        tracing::info!("✓ Last applied source version: {}", version);
    }

    tracing::info!("✓ Manifest is valid");
    Ok(())
}
