//! cmtransform Runtime
//!
//! This crate provides the reconciliation runtime for `ConfigMapTransform`
//! resources.
//!
//! # Features
//!
//! - Registry of specifications by identity and by source ConfigMap
//! - Transform engine with version-token idempotency
//! - Explicit routing table for notifications
//! - Controller loop with redelivery and backoff
//!
//! # Usage
//!
//! ```rust,ignore
//! use cmtransform_runtime::{Controller, Dispatcher, Registry, Router, TransformEngine};
//!
//! let engine = Arc::new(TransformEngine::new(configmaps, transforms, Arc::new(Registry::new())));
//! let dispatcher = Arc::new(Dispatcher::new(engine, Router::default()));
//! let (controller, handle) = Controller::new(dispatcher, settings);
//! tokio::spawn(controller.run());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod controller;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod registry;

pub use controller::{Controller, ControllerHandle, ControllerStats};
pub use dispatch::{Dispatcher, EventKind, Notification, ResourceKind, Route, Router};
pub use engine::{Outcome, TransformEngine};
pub use error::{Error, Result};
pub use registry::Registry;
