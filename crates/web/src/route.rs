//! Route descriptors.
//!
//! A [`Route`] is one entry of a router's ordered table: match criteria
//! (path pattern or regex, methods, consumed/produced content types) plus an
//! ordered list of normal-flow handlers and an ordered list of failure-flow
//! handlers. Routes are handed out by the [`Router`](crate::router::Router)
//! builder methods as cloneable handles; the fluent setters mutate shared
//! state and stamp the owning router so its sorted snapshot is rebuilt on
//! the next dispatch.
//!
//! Mutating a route while requests are in flight is tolerated but not
//! synchronized: configure routes before serving traffic.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use http::{Method, header};
use mime::Mime;

use crate::context::RoutingContext;
use crate::error::RouteError;
use crate::handler::{Handler, SharedHandler};
use crate::path::PathMatcher;

/// A single match-criteria-plus-handlers entry in a router.
#[derive(Clone)]
pub struct Route {
    inner: Arc<RouteInner>,
}

struct RouteInner {
    insertion_index: usize,
    /// Version stamp of the owning router, bumped on every mutation.
    router_version: Arc<AtomicU64>,
    state: Mutex<RouteState>,
}

struct RouteState {
    order: i64,
    matcher: Option<PathMatcher>,
    declared_path: Option<String>,
    methods: HashSet<Method>,
    consumes: Vec<Mime>,
    produces: Vec<Mime>,
    handlers: Vec<SharedHandler>,
    failure_handlers: Vec<SharedHandler>,
    enabled: bool,
    use_normalized_path: bool,
}

/// The outcome of a successful [`Route::matches`] call.
pub(crate) struct RouteMatch {
    pub params: HashMap<String, String>,
    /// The produced content type selected against the `Accept` header.
    pub produced: Option<Mime>,
}

impl Route {
    pub(crate) fn new(insertion_index: usize, router_version: Arc<AtomicU64>) -> Self {
        let state = RouteState {
            order: insertion_index as i64,
            matcher: None,
            declared_path: None,
            methods: HashSet::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
            handlers: Vec::new(),
            failure_handlers: Vec::new(),
            enabled: true,
            use_normalized_path: true,
        };
        Self { inner: Arc::new(RouteInner { insertion_index, router_version, state: Mutex::new(state) }) }
    }

    /// Sets the path pattern (literal, `:name` params, trailing `*`).
    /// Fails if the route already has a path or regex criteria.
    pub fn path(&self, spec: &str) -> Result<&Self, RouteError> {
        let matcher = PathMatcher::pattern(spec)?;
        let mut state = self.lock();
        if state.matcher.is_some() {
            return Err(RouteError::conflicting_pattern(if state.declared_path.is_some() {
                "path"
            } else {
                "regex"
            }));
        }
        state.matcher = Some(matcher);
        state.declared_path = Some(spec.to_string());
        drop(state);
        self.touch();
        Ok(self)
    }

    /// Sets a raw regex criteria, mutually exclusive with a path pattern.
    pub fn regex(&self, source: &str) -> Result<&Self, RouteError> {
        let matcher = PathMatcher::regex(source)?;
        let mut state = self.lock();
        if state.matcher.is_some() {
            return Err(RouteError::conflicting_pattern(if state.declared_path.is_some() {
                "path"
            } else {
                "regex"
            }));
        }
        state.matcher = Some(matcher);
        drop(state);
        self.touch();
        Ok(self)
    }

    /// Adds an allowed HTTP method. An empty method set matches any method.
    pub fn method(&self, method: Method) -> &Self {
        self.lock().methods.insert(method);
        self.touch();
        self
    }

    /// Adds a consumed content-type pattern, checked against `Content-Type`.
    /// MIME wildcards (`type/*`, `*/*`) are supported.
    pub fn consumes(&self, pattern: &str) -> Result<&Self, RouteError> {
        let mime: Mime = pattern.parse().map_err(|_| RouteError::invalid_content_type(pattern))?;
        self.lock().consumes.push(mime);
        self.touch();
        Ok(self)
    }

    /// Adds a produced content-type pattern, negotiated against `Accept`.
    pub fn produces(&self, pattern: &str) -> Result<&Self, RouteError> {
        let mime: Mime = pattern.parse().map_err(|_| RouteError::invalid_content_type(pattern))?;
        self.lock().produces.push(mime);
        self.touch();
        Ok(self)
    }

    /// Overrides the declared order (defaults to the insertion index).
    pub fn order(&self, order: i64) -> &Self {
        self.lock().order = order;
        self.touch();
        self
    }

    /// Pushes this route behind every explicitly ordered one.
    pub fn last(&self) -> &Self {
        self.order(i64::MAX)
    }

    /// Appends a normal-flow handler. Handlers run in registration order as
    /// the chain calls `next()`.
    pub fn handler(&self, handler: impl Handler + 'static) -> &Self {
        self.handler_shared(Arc::new(handler))
    }

    pub(crate) fn handler_shared(&self, handler: SharedHandler) -> &Self {
        self.lock().handlers.push(handler);
        self.touch();
        self
    }

    /// Appends a failure-flow handler, consulted only in failure dispatch.
    pub fn failure_handler(&self, handler: impl Handler + 'static) -> &Self {
        self.lock().failure_handlers.push(Arc::new(handler));
        self.touch();
        self
    }

    pub fn enable(&self) -> &Self {
        self.lock().enabled = true;
        self.touch();
        self
    }

    /// A disabled route never matches, in either dispatch mode.
    pub fn disable(&self) -> &Self {
        self.lock().enabled = false;
        self.touch();
        self
    }

    /// Whether matching runs against the normalized request path (default)
    /// or the raw one.
    pub fn use_normalized_path(&self, enabled: bool) -> &Self {
        self.lock().use_normalized_path = enabled;
        self.touch();
        self
    }

    /// The declared path pattern, if one was set.
    pub fn path_spec(&self) -> Option<String> {
        self.lock().declared_path.clone()
    }

    /// The core match predicate: combines enabled state, path/regex, method
    /// and content-type criteria. Content-type criteria are skipped in
    /// failure mode; path and method still apply.
    pub(crate) fn matches(&self, ctx: &RoutingContext, mount_point: &str, failure: bool) -> Option<RouteMatch> {
        let state = self.lock();
        if !state.enabled {
            return None;
        }
        if failure && state.failure_handlers.is_empty() {
            return None;
        }

        if !state.methods.is_empty() && !state.methods.contains(ctx.request().method()) {
            return None;
        }

        let path = if state.use_normalized_path {
            ctx.normalized_path().to_string()
        } else {
            ctx.request().path().to_string()
        };
        let relative = relative_path(&path, mount_point)?;

        let path_match = match &state.matcher {
            // a route with no path criteria matches every path
            None => crate::path::PathMatch::default(),
            Some(matcher) => matcher.matches(relative)?,
        };

        let mut produced = None;
        if !failure {
            if !state.consumes.is_empty() {
                let content_type = request_mime(ctx, header::CONTENT_TYPE)?;
                if !state.consumes.iter().any(|pattern| mime_matches(pattern, &content_type)) {
                    return None;
                }
            }
            if !state.produces.is_empty() {
                produced = Some(negotiate(ctx, &state.produces)?);
            }
        }

        Some(RouteMatch { params: path_match.into_params(), produced })
    }

    pub(crate) fn handler_at(&self, failure: bool, index: usize) -> Option<SharedHandler> {
        let state = self.lock();
        let chain = if failure { &state.failure_handlers } else { &state.handlers };
        chain.get(index).cloned()
    }

    /// Sort key for the router's ordered scan: ascending declared order,
    /// ties broken by insertion sequence.
    pub(crate) fn sort_key(&self) -> (i64, usize) {
        (self.lock().order, self.inner.insertion_index)
    }

    fn touch(&self) {
        self.inner.router_version.fetch_add(1, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, RouteState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Route")
            .field("path", &state.declared_path)
            .field("order", &state.order)
            .field("methods", &state.methods)
            .field("enabled", &state.enabled)
            .finish()
    }
}

/// Strips the mount point from a request path; `None` means the path is not
/// under the mount point at all.
fn relative_path<'a>(path: &'a str, mount_point: &str) -> Option<&'a str> {
    if mount_point.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(mount_point) {
        Some("") => Some("/"),
        Some(rest) if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

fn request_mime(ctx: &RoutingContext, name: header::HeaderName) -> Option<Mime> {
    ctx.request().headers().get(name)?.to_str().ok()?.parse().ok()
}

/// Picks the first declared produces pattern acceptable to the request.
/// A missing `Accept` header accepts anything.
fn negotiate(ctx: &RoutingContext, produces: &[Mime]) -> Option<Mime> {
    let accept = match ctx.request().headers().get(header::ACCEPT) {
        None => return produces.first().cloned(),
        Some(value) => value.to_str().ok()?,
    };

    for entry in accept.split(',') {
        let entry = entry.split(';').next().unwrap_or("").trim();
        let Ok(accepted) = entry.parse::<Mime>() else {
            continue;
        };
        if let Some(found) = produces.iter().find(|mime| mime_matches(&accepted, mime)) {
            return Some(found.clone());
        }
    }
    None
}

/// MIME pattern semantics: `*/*` accepts anything, `type/*` accepts the
/// type, otherwise type and subtype must both match.
fn mime_matches(pattern: &Mime, value: &Mime) -> bool {
    (pattern.type_() == mime::STAR || pattern.type_() == value.type_())
        && (pattern.subtype() == mime::STAR || pattern.subtype() == value.subtype())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_wildcards() {
        let any: Mime = "*/*".parse().unwrap();
        let json: Mime = "application/json".parse().unwrap();
        let app_any: Mime = "application/*".parse().unwrap();
        let text: Mime = "text/plain".parse().unwrap();

        assert!(mime_matches(&any, &json));
        assert!(mime_matches(&app_any, &json));
        assert!(mime_matches(&json, &json));
        assert!(!mime_matches(&app_any, &text));
        assert!(!mime_matches(&json, &text));
    }

    #[test]
    fn relative_path_strips_mount_point() {
        assert_eq!(relative_path("/a/b", ""), Some("/a/b"));
        assert_eq!(relative_path("/a/b", "/a"), Some("/b"));
        assert_eq!(relative_path("/a", "/a"), Some("/"));
        assert_eq!(relative_path("/ab", "/a"), None);
        assert_eq!(relative_path("/x/b", "/a"), None);
    }

    #[test]
    fn conflicting_pattern_is_rejected() {
        let route = Route::new(0, Arc::new(AtomicU64::new(0)));
        route.path("/a").unwrap();
        assert!(matches!(route.regex("^/a$"), Err(RouteError::ConflictingPattern { .. })));
        assert!(matches!(route.path("/b"), Err(RouteError::ConflictingPattern { .. })));
    }

    #[test]
    fn mutation_bumps_router_version() {
        let version = Arc::new(AtomicU64::new(0));
        let route = Route::new(0, version.clone());
        route.order(5).method(Method::GET);
        assert!(version.load(Ordering::Acquire) >= 2);
    }
}
