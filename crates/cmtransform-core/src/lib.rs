//! cmtransform Core Library
//!
//! This crate provides the building blocks of the ConfigMap transform
//! controller:
//! - Resource model for ConfigMaps and `ConfigMapTransform` resources
//! - Transform specification parsing and validation
//! - Rule conversion (base64)
//! - Store client traits and an in-memory store
//! - Controller configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│   Rules     │────▶│   Target    │
//! │  ConfigMap  │     │  (base64)   │     │  ConfigMap  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        └──── ConfigMapTransform (status) ◀─────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cmtransform_core::{TransformResource, TransformSpecification};
//!
//! let resource = TransformResource::from_yaml(&manifest)?;
//! let spec = TransformSpecification::from_resource(&resource)?;
//! println!("{} -> {}", spec.source.object_ref(), spec.target);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod resource;
pub mod rules;
pub mod spec;
pub mod store;

pub use config::{Config, ControllerConfig};
pub use error::{Error, Result};
pub use resource::{ConfigMap, ObjectRef, TransformResource};
pub use rules::Rule;
pub use spec::{SourceReference, TransformSpecification};
pub use store::{ConfigMapApi, MemoryStore, StoreError, StoreResult, TransformApi};
