//! Show transform status

use anyhow::{Context, Result};
use cmtransform_core::{Config, TransformSpecification};

use crate::local_cluster::LocalCluster;

/// Run the status command
pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    tracing::info!("Controller: {}", config.controller.name);

    let mut cluster = LocalCluster::open(config)?;
    cluster.scan()?;
    let store = cluster.store();

    let mut transforms = store.transforms();
    transforms.sort_by_key(|r| r.object_ref());
    if transforms.is_empty() {
        println!("No ConfigMapTransforms found");
        return Ok(());
    }

    for resource in &transforms {
        let spec = match TransformSpecification::from_resource(resource) {
            Ok(spec) => spec,
            Err(e) => {
                println!("{}: invalid ({})", resource.object_ref(), e);
                continue;
            }
        };
        let target = spec.target_ref();
        let target_state = if store.configmap(&target).is_some() {
            "present"
        } else {
            "missing"
        };
        println!(
            "{}: {} -> {} ({}), last applied source version: {}",
            spec.identity,
            spec.source.object_ref(),
            target,
            target_state,
            spec.last_applied_version.as_deref().unwrap_or("never")
        );
    }

    Ok(())
}
