//! Ordered route tables and the dispatch entry point.
//!
//! A [`Router`] is an ordered collection of [`Route`]s plus the entry point
//! that begins dispatch for an inbound request. Routes are consulted in
//! ascending declared order, ties broken by registration sequence. The
//! sorted view is a copy-on-write snapshot rebuilt lazily on the first
//! dispatch after a mutation, so bursty registration at startup sorts once
//! and in-flight requests always iterate a consistent table.
//!
//! Routers nest: [`Router::mount`] attaches a whole router under a path
//! prefix of a parent route; the sub-router then sees paths relative to its
//! mount point and shares per-request state with the parent's handlers.
//!
//! The concurrency contract is configure-before-serve: registering routes
//! while requests are in flight is snapshot-safe but the exact request that
//! first observes the mutation is unspecified.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Response, StatusCode};
use relay_core::protocol::{ServerRequest, ServerResponse};
use tracing::{debug, error, trace};

use crate::context::RoutingContext;
use crate::error::{RouteError, WebError};
use crate::handler::{Handler, SharedHandler};
use crate::route::Route;

type ExceptionFn = dyn Fn(&WebError) + Send + Sync;

macro_rules! method_route {
    ($method:ident, $constant:ident) => {
        #[doc = concat!("Appends a route matching HTTP ", stringify!($constant), " requests on the given path.")]
        pub fn $method(&self, path: &str) -> Result<Route, RouteError> {
            self.route_with_method(Method::$constant, path)
        }
    };
}

/// An ordered collection of routes with a dispatch entry point.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    routes: Mutex<Vec<Route>>,
    /// Bumped by every router/route mutation; drives lazy snapshot rebuild.
    version: Arc<AtomicU64>,
    snapshot: ArcSwap<Snapshot>,
    error_handlers: Mutex<HashMap<StatusCode, SharedHandler>>,
    exception_handler: Mutex<Option<Arc<ExceptionFn>>>,
}

struct Snapshot {
    version: u64,
    routes: Arc<Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: Mutex::new(Vec::new()),
                version: Arc::new(AtomicU64::new(0)),
                snapshot: ArcSwap::from_pointee(Snapshot { version: 0, routes: Arc::new(Vec::new()) }),
                error_handlers: Mutex::new(HashMap::new()),
                exception_handler: Mutex::new(None),
            }),
        }
    }

    /// Appends a route matching the given path pattern (any method).
    pub fn route(&self, path: &str) -> Result<Route, RouteError> {
        let route = self.append();
        route.path(path)?;
        Ok(route)
    }

    /// Appends a route with no criteria at all: matches every request.
    pub fn route_any(&self) -> Route {
        self.append()
    }

    /// Appends a route matching the given regex; named capture groups
    /// become path parameters.
    pub fn route_with_regex(&self, source: &str) -> Result<Route, RouteError> {
        let route = self.append();
        route.regex(source)?;
        Ok(route)
    }

    /// Appends a route constrained to one method and a path pattern.
    pub fn route_with_method(&self, method: Method, path: &str) -> Result<Route, RouteError> {
        let route = self.route(path)?;
        route.method(method);
        Ok(route)
    }

    method_route!(get, GET);
    method_route!(post, POST);
    method_route!(put, PUT);
    method_route!(delete, DELETE);
    method_route!(head, HEAD);
    method_route!(options, OPTIONS);
    method_route!(patch, PATCH);
    method_route!(trace, TRACE);

    /// Mounts a sub-router under the given path prefix. Requests matching
    /// `prefix/*` are dispatched through the sub-router's own route table
    /// before control falls back to this router. A trailing slash on the
    /// prefix is stripped so mount points never produce double slashes.
    ///
    /// The prefix must be literal: `:param` and `*` segments would make the
    /// mount point ambiguous, so they are rejected.
    pub fn mount(&self, prefix: &str, sub_router: Router) -> Result<Route, RouteError> {
        let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(RouteError::invalid_path(prefix));
        }
        if prefix.contains(':') || prefix.contains('*') {
            return Err(RouteError::invalid_path(prefix));
        }
        let route = if prefix.is_empty() { self.route_any() } else { self.route(&format!("{prefix}/*"))? };
        route.handler_shared(Arc::new(SubRouterHandler { prefix: prefix.to_string(), router: sub_router }));
        Ok(route)
    }

    /// Registers a handler invoked when dispatch terminates with the given
    /// status and no failure route resolved it; takes precedence over the
    /// built-in error response.
    pub fn error_handler(&self, status: StatusCode, handler: impl Handler + 'static) -> &Self {
        self.lock(&self.inner.error_handlers).insert(status, Arc::new(handler));
        self
    }

    /// Registers a catch-all observer for errors that escape failure
    /// dispatch (including failure handlers that themselves fail).
    pub fn exception_handler(&self, f: impl Fn(&WebError) + Send + Sync + 'static) -> &Self {
        *self.lock(&self.inner.exception_handler) = Some(Arc::new(f));
        self
    }

    /// Removes every route.
    pub fn clear(&self) -> &Self {
        self.lock(&self.inner.routes).clear();
        self.inner.version.fetch_add(1, Ordering::Release);
        self
    }

    /// The dispatch entry point: builds the per-request context, starts the
    /// iteration and resolves once the response has been ended, whether
    /// that happens on this call stack or later from a spawned task.
    pub async fn handle(&self, request: impl Into<ServerRequest>) -> Response<Bytes> {
        let request = request.into();
        debug!(method = %request.method(), path = request.path(), "dispatching request");

        let response = ServerResponse::new();
        let ctx = RoutingContext::new_root(self.clone(), self.snapshot(), request, response.clone());
        ctx.next().await;

        response.ended_signal().await;
        response.to_http()
    }

    /// The sorted route view, rebuilt when stale.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Route>> {
        let version = self.inner.version.load(Ordering::Acquire);
        {
            let snapshot = self.inner.snapshot.load();
            if snapshot.version == version {
                return snapshot.routes.clone();
            }
        }

        let mut routes = self.lock(&self.inner.routes).clone();
        routes.sort_by_key(|route| route.sort_key());
        let routes = Arc::new(routes);
        self.inner.snapshot.store(Arc::new(Snapshot { version, routes: routes.clone() }));
        trace!(version, routes = routes.len(), "rebuilt route snapshot");
        routes
    }

    pub(crate) fn error_handler_for(&self, status: StatusCode) -> Option<SharedHandler> {
        self.lock(&self.inner.error_handlers).get(&status).cloned()
    }

    pub(crate) fn notify_exception(&self, cause: &WebError) {
        error!(%cause, "unhandled error escaped failure dispatch");
        let handler = self.lock(&self.inner.exception_handler).clone();
        if let Some(handler) = handler {
            handler(cause);
        }
    }

    fn append(&self) -> Route {
        let mut routes = self.lock(&self.inner.routes);
        let route = Route::new(routes.len(), self.inner.version.clone());
        routes.push(route.clone());
        drop(routes);
        self.inner.version.fetch_add(1, Ordering::Release);
        route
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Enters a mounted sub-router with a child context view.
struct SubRouterHandler {
    prefix: String,
    router: Router,
}

#[async_trait]
impl Handler for SubRouterHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let mount_point = format!("{}{}", ctx.mount_point(), self.prefix);
        trace!(mount_point, "entering sub-router");
        let child = ctx.new_child(self.router.clone(), self.router.snapshot(), mount_point);
        child.next().await;
        Ok(())
    }
}
