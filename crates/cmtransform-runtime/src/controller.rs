//! Controller loop
//!
//! Owns one watch stream per resource kind and hands every notification to
//! the [`Dispatcher`] on its own task. Failed notifications whose error is
//! transient are redelivered with exponential backoff until
//! `max_retries` is exhausted.

use anyhow::Context;
use cmtransform_core::TransformApi;
use cmtransform_core::config::LoopConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::dispatch::{Dispatcher, EventKind, Notification, ResourceKind};
use crate::engine::Outcome;
use crate::error::Result;

/// Capacity of each watch stream
const STREAM_CAPACITY: usize = 256;

type HandlerResult = (Notification, Result<Option<Outcome>>);

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Notifications received from the watch streams
    pub received: usize,
    /// Handler runs that wrote a target
    pub applied: usize,
    /// Handler runs that found nothing to do
    pub unchanged: usize,
    /// Redeliveries scheduled
    pub retried: usize,
    /// Notifications dropped after a failure
    pub failed: usize,
}

/// Sending side of the controller's watch streams
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    configmaps: mpsc::Sender<Notification>,
    transforms: mpsc::Sender<Notification>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ControllerHandle {
    /// Deliver a notification on the stream for its resource kind
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        let stream = match notification.kind {
            ResourceKind::ConfigMap => &self.configmaps,
            ResourceKind::ConfigMapTransform => &self.transforms,
        };
        stream
            .send(notification)
            .await
            .map_err(|e| anyhow::anyhow!("controller stopped, dropped {}", e.0))
    }

    /// Replay every stored specification as a resumed notification.
    ///
    /// Called once at startup so specifications that already exist are
    /// registered and reconciled. Returns the number of notifications sent.
    pub async fn resume(&self, transforms: &dyn TransformApi) -> Result<usize> {
        let resources = transforms
            .list()
            .await
            .context("failed to list ConfigMapTransforms")?;
        let count = resources.len();
        for resource in resources {
            self.notify(Notification::transform(EventKind::Resumed, resource))
                .await?;
        }
        tracing::info!(count, "resumed existing specifications");
        Ok(count)
    }

    /// Stop accepting notifications and cancel pending redeliveries.
    ///
    /// Handlers already running are allowed to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The controller loop
pub struct Controller {
    dispatcher: Arc<Dispatcher>,
    settings: LoopConfig,
    configmaps: mpsc::Receiver<Notification>,
    transforms: mpsc::Receiver<Notification>,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    /// Create a controller and the handle feeding it
    pub fn new(dispatcher: Arc<Dispatcher>, settings: LoopConfig) -> (Self, ControllerHandle) {
        let (configmap_tx, configmap_rx) = mpsc::channel(STREAM_CAPACITY);
        let (transform_tx, transform_rx) = mpsc::channel(STREAM_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Self {
            dispatcher,
            settings,
            configmaps: configmap_rx,
            transforms: transform_rx,
            shutdown: shutdown_rx,
        };
        let handle = ControllerHandle {
            configmaps: configmap_tx,
            transforms: transform_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (controller, handle)
    }

    /// Run until shut down, or until every handle is dropped and all work
    /// has drained.
    pub async fn run(mut self) -> ControllerStats {
        tracing::info!("Starting controller loop");

        let mut stats = ControllerStats::default();
        let mut in_flight: JoinSet<HandlerResult> = JoinSet::new();
        let mut retries: JoinSet<Notification> = JoinSet::new();
        let mut configmaps_open = true;
        let mut transforms_open = true;
        let mut shutdown_armed = true;
        let mut shutting_down = false;

        loop {
            tokio::select! {
                changed = self.shutdown.changed(), if shutdown_armed && !shutting_down => {
                    match changed {
                        Ok(()) if *self.shutdown.borrow() => {
                            tracing::info!(
                                in_flight = in_flight.len(),
                                pending_retries = retries.len(),
                                "Received shutdown signal"
                            );
                            shutting_down = true;
                            retries.abort_all();
                        }
                        Ok(()) => {}
                        Err(_) => shutdown_armed = false,
                    }
                }
                received = self.configmaps.recv(), if configmaps_open && !shutting_down => {
                    match received {
                        Some(notification) => {
                            stats.received += 1;
                            self.spawn(&mut in_flight, notification);
                        }
                        None => configmaps_open = false,
                    }
                }
                received = self.transforms.recv(), if transforms_open && !shutting_down => {
                    match received {
                        Some(notification) => {
                            stats.received += 1;
                            self.spawn(&mut in_flight, notification);
                        }
                        None => transforms_open = false,
                    }
                }
                Some(joined) = in_flight.join_next() => {
                    match joined {
                        Ok((notification, result)) => {
                            self.complete(
                                notification,
                                result,
                                &mut retries,
                                &mut stats,
                                shutting_down,
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "notification handler aborted");
                            stats.failed += 1;
                        }
                    }
                }
                Some(joined) = retries.join_next() => {
                    if let Ok(notification) = joined
                        && !shutting_down
                    {
                        self.spawn(&mut in_flight, notification);
                    }
                }
                else => break,
            }
        }

        tracing::info!(?stats, "Controller loop stopped");
        stats
    }

    fn spawn(&self, in_flight: &mut JoinSet<HandlerResult>, notification: Notification) {
        let dispatcher = self.dispatcher.clone();
        in_flight.spawn(async move {
            let result = dispatcher.dispatch(&notification).await;
            (notification, result)
        });
    }

    fn complete(
        &self,
        mut notification: Notification,
        result: Result<Option<Outcome>>,
        retries: &mut JoinSet<Notification>,
        stats: &mut ControllerStats,
        shutting_down: bool,
    ) {
        let err = match result {
            Ok(Some(Outcome::Applied { .. })) => {
                stats.applied += 1;
                return;
            }
            Ok(_) => {
                stats.unchanged += 1;
                return;
            }
            Err(err) => err,
        };

        let retryable = err
            .downcast_ref::<cmtransform_core::Error>()
            .is_some_and(cmtransform_core::Error::is_retryable);

        if retryable && !shutting_down && notification.attempt < self.settings.max_retries {
            notification.attempt += 1;
            let delay = self.settings.backoff(notification.attempt);
            tracing::warn!(
                %notification,
                attempt = notification.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "handler failed, scheduling redelivery"
            );
            stats.retried += 1;
            retries.spawn(async move {
                tokio::time::sleep(delay).await;
                notification
            });
        } else {
            tracing::error!(
                %notification,
                attempts = notification.attempt + 1,
                error = %format!("{err:#}"),
                "handler failed, dropping notification"
            );
            stats.failed += 1;
        }
    }
}
