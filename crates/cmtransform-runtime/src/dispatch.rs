//! Notification routing
//!
//! Maps `(resource kind, event kind)` pairs to handlers through an explicit
//! routing table, and runs the matching engine operation.

use anyhow::Context;
use cmtransform_core::{ObjectRef, TransformResource};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::{Outcome, TransformEngine};
use crate::error::Result;

/// Kind of resource a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A ConfigMap (potential transform source)
    ConfigMap,
    /// A `ConfigMapTransform` specification
    ConfigMapTransform,
}

/// What happened to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Object created
    Created,
    /// Object updated
    Updated,
    /// Object already present at controller start
    Resumed,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::ConfigMapTransform => write!(f, "ConfigMapTransform"),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Resumed => write!(f, "resumed"),
        }
    }
}

/// Handler a notification is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Re-run the specification monitoring the changed ConfigMap
    ReconcileSource,
    /// Rebuild, register, and apply the changed specification
    RefreshSpecification,
}

/// A change notification delivered by a watch stream
#[derive(Debug, Clone)]
pub struct Notification {
    /// Resource kind
    pub kind: ResourceKind,
    /// Event kind
    pub event: EventKind,
    /// Identity of the changed object
    pub object: ObjectRef,
    /// Full body, carried for specification notifications
    pub body: Option<TransformResource>,
    /// Redelivery count, zero on first delivery
    pub attempt: u32,
}

impl Notification {
    /// A ConfigMap was created or updated
    pub fn configmap(event: EventKind, object: ObjectRef) -> Self {
        Self {
            kind: ResourceKind::ConfigMap,
            event,
            object,
            body: None,
            attempt: 0,
        }
    }

    /// A `ConfigMapTransform` was created, updated, or resumed
    pub fn transform(event: EventKind, resource: TransformResource) -> Self {
        Self {
            kind: ResourceKind::ConfigMapTransform,
            event,
            object: resource.object_ref(),
            body: Some(resource),
            attempt: 0,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.object, self.event)
    }
}

/// Routing table from `(ResourceKind, EventKind)` to [`Route`]
#[derive(Debug, Clone)]
pub struct Router {
    routes: HashMap<(ResourceKind, EventKind), Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::empty()
            .with_route(ResourceKind::ConfigMap, EventKind::Created, Route::ReconcileSource)
            .with_route(ResourceKind::ConfigMap, EventKind::Updated, Route::ReconcileSource)
            .with_route(
                ResourceKind::ConfigMapTransform,
                EventKind::Created,
                Route::RefreshSpecification,
            )
            .with_route(
                ResourceKind::ConfigMapTransform,
                EventKind::Updated,
                Route::RefreshSpecification,
            )
            .with_route(
                ResourceKind::ConfigMapTransform,
                EventKind::Resumed,
                Route::RefreshSpecification,
            )
    }
}

impl Router {
    /// A router with no routes
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Add or replace a route
    pub fn with_route(mut self, kind: ResourceKind, event: EventKind, route: Route) -> Self {
        self.routes.insert((kind, event), route);
        self
    }

    /// Route for a `(kind, event)` pair
    pub fn route(&self, kind: ResourceKind, event: EventKind) -> Option<Route> {
        self.routes.get(&(kind, event)).copied()
    }
}

/// Routes notifications to the transform engine
pub struct Dispatcher {
    engine: Arc<TransformEngine>,
    router: Router,
}

impl Dispatcher {
    /// Create a dispatcher over `engine` with the given routing table
    pub fn new(engine: Arc<TransformEngine>, router: Router) -> Self {
        Self { engine, router }
    }

    /// Handle one notification.
    ///
    /// `Ok(None)` means nothing was attempted: no route, or the ConfigMap is
    /// not monitored.
    pub async fn dispatch(&self, notification: &Notification) -> Result<Option<Outcome>> {
        let Some(route) = self.router.route(notification.kind, notification.event) else {
            tracing::debug!(%notification, "no route for notification");
            return Ok(None);
        };

        match route {
            Route::ReconcileSource => {
                tracing::info!(source = %notification.object, "ConfigMap has been updated");
                self.engine
                    .reconcile_source(&notification.object)
                    .await
                    .with_context(|| format!("failed to handle {notification}"))
            }
            Route::RefreshSpecification => {
                let body = notification
                    .body
                    .as_ref()
                    .with_context(|| format!("{notification} carries no resource body"))?;
                self.engine
                    .refresh_specification(body)
                    .await
                    .map(Some)
                    .with_context(|| format!("failed to handle {notification}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ResourceKind::ConfigMap, EventKind::Created, Some(Route::ReconcileSource))]
    #[case(ResourceKind::ConfigMap, EventKind::Updated, Some(Route::ReconcileSource))]
    #[case(ResourceKind::ConfigMap, EventKind::Resumed, None)]
    #[case(ResourceKind::ConfigMapTransform, EventKind::Created, Some(Route::RefreshSpecification))]
    #[case(ResourceKind::ConfigMapTransform, EventKind::Updated, Some(Route::RefreshSpecification))]
    #[case(ResourceKind::ConfigMapTransform, EventKind::Resumed, Some(Route::RefreshSpecification))]
    fn test_default_routes(
        #[case] kind: ResourceKind,
        #[case] event: EventKind,
        #[case] expected: Option<Route>,
    ) {
        assert_eq!(Router::default().route(kind, event), expected);
    }

    #[test]
    fn test_with_route_overrides() {
        let router = Router::empty().with_route(
            ResourceKind::ConfigMap,
            EventKind::Resumed,
            Route::ReconcileSource,
        );
        assert_eq!(
            router.route(ResourceKind::ConfigMap, EventKind::Resumed),
            Some(Route::ReconcileSource)
        );
        assert_eq!(router.route(ResourceKind::ConfigMap, EventKind::Created), None);
    }

    #[test]
    fn test_notification_display() {
        let n = Notification::configmap(EventKind::Updated, ObjectRef::new("default", "cm"));
        assert_eq!(n.to_string(), "ConfigMap default/cm updated");
        assert_eq!(n.attempt, 0);
        assert!(n.body.is_none());
    }
}
