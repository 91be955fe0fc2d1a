//! Per-request dispatch state.
//!
//! A [`RoutingContext`] is created once per inbound request by the root
//! router and threaded through every handler invocation. It is a cheap
//! cloneable handle: handlers may stash a clone and resume dispatch later
//! from a spawned task, because the iteration state lives here and not on
//! any call stack.
//!
//! Mounting a sub-router creates a *child view* of the same request: the
//! child gets its own route cursor and mount point but shares the request,
//! response, attribute map, failure state, body, session, user and cookies
//! with every other view. State written below a mount point is therefore
//! visible to handlers above it, and vice versa.

mod dispatch;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use cookie::{Cookie, CookieJar};
use futures::future::BoxFuture;
use http::{StatusCode, header};
use mime::Mime;
use relay_core::protocol::{ServerRequest, ServerResponse};
use tracing::warn;

use crate::error::WebError;
use crate::path::normalize_path;
use crate::route::Route;
use crate::router::Router;
use crate::session::Session;
use crate::user::User;

/// Per-request mutable state threaded through the handler chain.
#[derive(Clone)]
pub struct RoutingContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    /// Router owning the routes visible at this level.
    router: Router,
    /// Sorted route snapshot taken when this level was entered.
    routes: Arc<Vec<Route>>,
    mount_point: String,
    /// Parent view, present on sub-router levels only.
    parent: Option<RoutingContext>,
    shared: Arc<SharedState>,
    cursor: Mutex<Cursor>,
}

/// Request-scoped state shared by every context view.
struct SharedState {
    request: ServerRequest,
    response: ServerResponse,
    normalized_path: String,
    attributes: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    failure: Mutex<Option<Arc<WebError>>>,
    body: Mutex<Option<Bytes>>,
    session: Mutex<Option<Session>>,
    user: Mutex<Option<User>>,
    cookies: Arc<Mutex<CookieJar>>,
}

/// Iteration state of one context level.
#[derive(Default)]
struct Cursor {
    /// Index of the next route to consider in the snapshot.
    route_index: usize,
    current: Option<CurrentRoute>,
}

struct CurrentRoute {
    route: Route,
    /// Whether the route was matched in failure mode.
    failure: bool,
    /// Next untried handler in the matched chain.
    handler_index: usize,
    params: HashMap<String, String>,
    produced: Option<Mime>,
}

impl RoutingContext {
    pub(crate) fn new_root(
        router: Router,
        routes: Arc<Vec<Route>>,
        request: ServerRequest,
        response: ServerResponse,
    ) -> Self {
        let normalized_path = normalize_path(request.path());
        let cookies = Arc::new(Mutex::new(parse_request_cookies(&request)));
        register_cookie_flush(&response, &cookies);

        let shared = Arc::new(SharedState {
            request,
            response,
            normalized_path,
            attributes: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            body: Mutex::new(None),
            session: Mutex::new(None),
            user: Mutex::new(None),
            cookies,
        });
        Self {
            inner: Arc::new(ContextInner {
                router,
                routes,
                mount_point: String::new(),
                parent: None,
                shared,
                cursor: Mutex::new(Cursor::default()),
            }),
        }
    }

    /// Creates a sub-router view: fresh cursor and mount point, shared
    /// request-scoped state.
    pub(crate) fn new_child(&self, router: Router, routes: Arc<Vec<Route>>, mount_point: String) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                router,
                routes,
                mount_point,
                parent: Some(self.clone()),
                shared: self.inner.shared.clone(),
                cursor: Mutex::new(Cursor::default()),
            }),
        }
    }

    /// The inbound request.
    pub fn request(&self) -> &ServerRequest {
        &self.inner.shared.request
    }

    /// A handle to the response being built.
    pub fn response(&self) -> ServerResponse {
        self.inner.shared.response.clone()
    }

    /// Continues dispatch: tries the next untried handler of the current
    /// route, then the next matching route, then delegates to the parent
    /// view or enters the not-found/unhandled-failure path.
    ///
    /// The returned future is `'static`, so it can equally be awaited in
    /// place or handed to `tokio::spawn` for deferred continuation.
    pub fn next(&self) -> BoxFuture<'static, ()> {
        let ctx = self.clone();
        Box::pin(async move { dispatch::run(ctx).await })
    }

    /// Fails the request with a bare status code and starts failure-mode
    /// dispatch from the top of this level's route list.
    pub fn fail(&self, status: StatusCode) -> BoxFuture<'static, ()> {
        self.fail_with(WebError::status(status))
    }

    /// Fails the request with a full error; the status code is taken from
    /// the error (500 for plain internal errors).
    pub fn fail_with(&self, error: WebError) -> BoxFuture<'static, ()> {
        let ctx = self.clone();
        Box::pin(async move {
            ctx.record_failure(error);
            dispatch::run(ctx).await
        })
    }

    /// Whether the request is in failure-mode dispatch.
    pub fn failed(&self) -> bool {
        self.inner.shared.failure.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// The recorded failure, if any. Persists until the request ends.
    pub fn failure(&self) -> Option<Arc<WebError>> {
        self.inner.shared.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The failure status code, if the request has failed.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.failure().map(|e| e.status_code())
    }

    /// Stores a request-scoped attribute, visible to every handler of this
    /// request including across sub-router boundaries.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) -> &Self {
        self.inner
            .shared
            .attributes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::new(value));
        self
    }

    /// Fetches a request-scoped attribute stored with [`put`](Self::put).
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let attributes = self.inner.shared.attributes.lock().unwrap_or_else(|e| e.into_inner());
        attributes.get(key).cloned().and_then(|value| value.downcast::<T>().ok())
    }

    pub fn remove(&self, key: &str) -> &Self {
        self.inner.shared.attributes.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        self
    }

    /// The named path parameter of the currently matched route.
    pub fn path_param(&self, name: &str) -> Option<String> {
        self.cursor().current.as_ref().and_then(|cur| cur.params.get(name).cloned())
    }

    /// All path parameters of the currently matched route.
    pub fn path_params(&self) -> HashMap<String, String> {
        self.cursor().current.as_ref().map(|cur| cur.params.clone()).unwrap_or_default()
    }

    /// Every value of the named query parameter.
    pub fn query_param(&self, name: &str) -> Vec<String> {
        self.request().query_param(name).into_iter().map(str::to_string).collect()
    }

    /// The mount point of this view: empty for the root router, the
    /// composed prefix (`/parent/child`) inside nested sub-routers.
    pub fn mount_point(&self) -> &str {
        &self.inner.mount_point
    }

    /// The route currently being dispatched, if any.
    pub fn current_route(&self) -> Option<Route> {
        self.cursor().current.as_ref().map(|cur| cur.route.clone())
    }

    /// The content type selected by the matched route's `produces` criteria.
    pub fn acceptable_content_type(&self) -> Option<Mime> {
        self.cursor().current.as_ref().and_then(|cur| cur.produced.clone())
    }

    /// The normalized request path (duplicate slashes collapsed, dot
    /// segments resolved).
    pub fn normalized_path(&self) -> &str {
        &self.inner.shared.normalized_path
    }

    /// The request body, once a body handler has published it.
    pub fn body(&self) -> Option<Bytes> {
        self.inner.shared.body.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_body(&self, body: Bytes) -> &Self {
        *self.inner.shared.body.lock().unwrap_or_else(|e| e.into_inner()) = Some(body);
        self
    }

    /// The session, once a session handler has loaded one.
    pub fn session(&self) -> Option<Session> {
        self.inner.shared.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_session(&self, session: Session) -> &Self {
        *self.inner.shared.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        self
    }

    /// The authenticated user, once an auth handler has set one.
    pub fn user(&self) -> Option<User> {
        self.inner.shared.user.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_user(&self, user: User) -> &Self {
        *self.inner.shared.user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user);
        self
    }

    pub fn clear_user(&self) -> &Self {
        *self.inner.shared.user.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self
    }

    /// A request cookie (or one added during this request) by name.
    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.jar().get(name).cloned()
    }

    /// Adds (or overwrites) a response cookie; flushed as `Set-Cookie`
    /// headers when the response ends.
    pub fn add_cookie(&self, cookie: Cookie<'static>) -> &Self {
        self.jar().add(cookie);
        self
    }

    /// Removes a cookie; the removal is flushed as an expired `Set-Cookie`.
    pub fn remove_cookie(&self, name: &str) -> &Self {
        self.jar().remove(Cookie::build(name.to_string()));
        self
    }

    pub(crate) fn record_failure(&self, error: WebError) {
        let mut failure = self.inner.shared.failure.lock().unwrap_or_else(|e| e.into_inner());
        *failure = Some(Arc::new(error));
        drop(failure);

        // failure scan restarts from the top of this level's route list
        let mut cursor = self.cursor();
        cursor.route_index = 0;
        cursor.current = None;
    }

    pub(crate) fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Picks the next handler to invoke, advancing the cursor. See
    /// [`dispatch`] for the surrounding state machine.
    pub(crate) fn advance(&self, failure: bool) -> dispatch::Step {
        let mut cursor = self.cursor();

        if let Some(current) = &mut cursor.current {
            if current.failure == failure {
                if let Some(handler) = current.route.handler_at(failure, current.handler_index) {
                    current.handler_index += 1;
                    return dispatch::Step::Invoke(handler);
                }
            }
            // chain exhausted (or mode switched underneath us): resume scanning
            cursor.current = None;
        }

        while cursor.route_index < self.inner.routes.len() {
            let route = self.inner.routes[cursor.route_index].clone();
            cursor.route_index += 1;

            let Some(matched) = route.matches(self, &self.inner.mount_point, failure) else {
                continue;
            };
            let Some(handler) = route.handler_at(failure, 0) else {
                continue;
            };
            cursor.current = Some(CurrentRoute {
                route,
                failure,
                handler_index: 1,
                params: matched.params,
                produced: matched.produced,
            });
            return dispatch::Step::Invoke(handler);
        }

        cursor.current = None;
        match (&self.inner.parent, failure) {
            (Some(parent), _) => dispatch::Step::Delegate(parent.clone()),
            (None, false) => dispatch::Step::NotFound,
            (None, true) => dispatch::Step::Unhandled,
        }
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.inner.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn jar(&self) -> MutexGuard<'_, CookieJar> {
        self.inner.shared.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_request_cookies(request: &ServerRequest) -> CookieJar {
    let mut jar = CookieJar::new();
    for value in request.headers().get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for part in value.split(';') {
            match Cookie::parse(part.trim().to_string()) {
                Ok(cookie) => jar.add_original(cookie),
                Err(e) => warn!(cause = %e, "ignoring unparsable request cookie"),
            }
        }
    }
    jar
}

/// Flushes cookie changes (additions and removals) as `Set-Cookie` headers
/// when the response ends.
fn register_cookie_flush(response: &ServerResponse, cookies: &Arc<Mutex<CookieJar>>) {
    let cookies = cookies.clone();
    let result = response.on_end(move |state| {
        let jar = cookies.lock().unwrap_or_else(|e| e.into_inner());
        for cookie in jar.delta() {
            match http::HeaderValue::from_str(&cookie.encoded().to_string()) {
                Ok(value) => {
                    state.headers.append(header::SET_COOKIE, value);
                }
                Err(e) => warn!(cause = %e, "dropping unencodable response cookie"),
            }
        }
    });
    if let Err(e) = result {
        warn!(cause = %e, "response ended before cookie flush could be registered");
    }
}
