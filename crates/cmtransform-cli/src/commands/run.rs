//! Run the controller against the local manifest directory

use anyhow::{Context, Result};
use cmtransform_core::Config;
use cmtransform_runtime::{
    Controller, ControllerHandle, ControllerStats, Dispatcher, Registry, Router, TransformEngine,
};
use std::sync::Arc;
use std::time::Duration;

use crate::local_cluster::LocalCluster;

/// Run the controller
pub async fn run(config_path: &str, once: bool) -> Result<()> {
    tracing::info!("Loading configuration from {}", config_path);

    let config = Config::load(config_path).context("Failed to load configuration")?;
    let settings = config.controller.controller.clone();
    let poll_interval = Duration::from_millis(settings.poll_interval_ms);

    tracing::info!("Controller: {}", config.controller.name);

    let mut cluster = LocalCluster::open(config)?;
    let store = cluster.store();
    let engine = Arc::new(TransformEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(Registry::new()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(engine, Router::default()));
    let (controller, handle) = Controller::new(dispatcher, settings);
    let mut controller = tokio::spawn(controller.run());

    deliver(&handle, &mut cluster).await?;
    handle.resume(store.as_ref()).await?;

    if once {
        // Closing the streams lets the loop drain and stop
        drop(handle);
        let stats = controller.await.context("Controller task failed")?;
        let written = cluster.persist()?;
        report(&stats, written);
        if stats.failed > 0 {
            anyhow::bail!("{} notification(s) failed", stats.failed);
        }
        return Ok(());
    }

    tracing::info!("Watching manifests (press Ctrl+C to stop)");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received shutdown signal");
    };
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cluster.persist()?;
                deliver(&handle, &mut cluster).await?;
            }
            joined = &mut controller => {
                joined.context("Controller task failed")?;
                anyhow::bail!("Controller stopped unexpectedly");
            }
            _ = &mut shutdown => {
                handle.shutdown();
                break;
            }
        }
    }

    let stats = controller.await.context("Controller task failed")?;
    let written = cluster.persist()?;
    report(&stats, written);

    tracing::info!("cmtransform stopped");
    Ok(())
}

/// Scan the manifests and hand every change to the controller
async fn deliver(handle: &ControllerHandle, cluster: &mut LocalCluster) -> Result<()> {
    for notification in cluster.scan()? {
        tracing::debug!(%notification, "delivering");
        handle.notify(notification).await?;
    }
    Ok(())
}

fn report(stats: &ControllerStats, written: usize) {
    tracing::info!(
        "✓ {} notification(s): {} applied, {} unchanged, {} retried, {} failed",
        stats.received,
        stats.applied,
        stats.unchanged,
        stats.retried,
        stats.failed
    );
    tracing::info!("✓ {} derived ConfigMap(s) in state", written);
}
