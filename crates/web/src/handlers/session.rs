use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cookie::{Cookie, SameSite};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;
use crate::session::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore};

const DEFAULT_COOKIE_NAME: &str = "relay.session";
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Loads (or creates) the session named by the session cookie, exposes it
/// via [`RoutingContext::session`] and flushes it back to the store when the
/// response ends.
///
/// Store lookups are retried on error inside `retry_timeout`, since stores
/// may be remote. Unmodified sessions are still re-put on flush to refresh
/// their expiry; destroyed sessions are deleted instead.
pub struct SessionHandler {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    cookie_path: String,
    cookie_http_only: bool,
    cookie_secure: bool,
    session_timeout: Duration,
    retry_timeout: Duration,
}

impl SessionHandler {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_path: "/".to_string(),
            cookie_http_only: true,
            cookie_secure: false,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            retry_timeout: Duration::from_secs(5),
        }
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    pub fn cookie_http_only(mut self, enabled: bool) -> Self {
        self.cookie_http_only = enabled;
        self
    }

    pub fn cookie_secure(mut self, enabled: bool) -> Self {
        self.cookie_secure = enabled;
        self
    }

    /// Lifetime of newly created sessions.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// How long store lookups are retried before giving up and creating a
    /// fresh session.
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Store lookup with fixed-interval retries until the deadline.
    async fn load(&self, id: &str) -> Option<Session> {
        let deadline = Instant::now() + self.retry_timeout;
        loop {
            match self.store.get(id).await {
                Ok(found) => return found,
                Err(cause) if Instant::now() + RETRY_INTERVAL < deadline => {
                    debug!(%cause, "session lookup failed, retrying");
                    sleep(RETRY_INTERVAL).await;
                }
                Err(cause) => {
                    warn!(%cause, "session lookup failed, starting a fresh session");
                    return None;
                }
            }
        }
    }

    fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), session.id()))
            .path(self.cookie_path.clone())
            .http_only(self.cookie_http_only)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .build()
    }

    fn register_flush(&self, ctx: &RoutingContext, session: Session) {
        let store = self.store.clone();
        let result = ctx.response().on_end(move |_state| {
            // the store may be remote; flush outside the end() call path
            tokio::spawn(async move {
                let outcome = if session.destroyed() {
                    store.delete(&session.id()).await
                } else {
                    store.put(&session).await
                };
                if let Err(cause) = outcome {
                    warn!(%cause, session = session.id(), "session flush failed");
                }
            });
        });
        if let Err(cause) = result {
            warn!(%cause, "response ended before session flush could be registered");
        }
    }
}

#[async_trait]
impl Handler for SessionHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let from_cookie = match ctx.cookie(&self.cookie_name) {
            Some(cookie) => self.load(cookie.value()).await,
            None => None,
        };

        let session = match from_cookie {
            Some(session) => session,
            None => {
                let session = Session::new(self.session_timeout);
                debug!(session = session.id(), "created session");
                session
            }
        };

        // the cookie is (re)issued every request so regenerated ids and
        // rolling expiries reach the client
        ctx.add_cookie(self.session_cookie(&session));
        ctx.set_session(session.clone());
        self.register_flush(&ctx, session);

        ctx.next().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::router::Router;
    use crate::session::{LocalSessionStore, MockSessionStore};
    use http::{Request, StatusCode, header};
    use serde_json::Value;

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<()> {
        Request::builder().uri(uri).header(header::COOKIE, cookie).body(()).unwrap()
    }

    fn session_router(store: Arc<dyn SessionStore>) -> Router {
        let router = Router::new();
        router.route_any().handler(SessionHandler::new(store));
        router.get("/count").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            let session = ctx.session().unwrap();
            let count = session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            session.put("count", count);
            ctx.response().end_with(bytes::Bytes::from(count.to_string()))?;
            Ok(())
        }));
        router
    }

    fn extract_session_id(response: &http::Response<bytes::Bytes>) -> String {
        let set_cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .find_map(|v| v.to_str().ok())
            .expect("session cookie issued");
        let cookie = Cookie::parse(set_cookie.to_string()).unwrap();
        assert_eq!(cookie.name(), DEFAULT_COOKIE_NAME);
        cookie.value().to_string()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn creates_session_and_issues_cookie() {
        let router = session_router(Arc::new(LocalSessionStore::new()));
        let response = router.handle(get("/count")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"1");
        assert!(!extract_session_id(&response).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn state_survives_across_requests() {
        let store = Arc::new(LocalSessionStore::new());
        let router = session_router(store.clone());

        let first = router.handle(get("/count")).await;
        let id = extract_session_id(&first);

        // the flush runs on a spawned task after end(); wait for it
        for _ in 0..50 {
            if store.get(&id).await.unwrap().is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let cookie = format!("{DEFAULT_COOKIE_NAME}={id}");
        let second = router.handle(get_with_cookie("/count", &cookie)).await;
        assert_eq!(second.body().as_ref(), b"2");

        let session = store.get(&id).await.unwrap();
        assert!(session.is_some());
        assert_eq!(session.unwrap().get("count"), Some(Value::from(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_cookie_gets_fresh_session() {
        let router = session_router(Arc::new(LocalSessionStore::new()));
        let cookie = format!("{DEFAULT_COOKIE_NAME}=no-such-session");
        let response = router.handle(get_with_cookie("/count", &cookie)).await;

        assert_eq!(response.body().as_ref(), b"1");
        assert_ne!(extract_session_id(&response), "no-such-session");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn failing_store_is_retried_then_bypassed() {
        let mut mock = MockSessionStore::new();
        mock.expect_get()
            .times(2..)
            .returning(|_| Err(WebError::message(StatusCode::BAD_GATEWAY, "store down")));
        mock.expect_put().returning(|_| Ok(()));

        let router = Router::new();
        router.route_any().handler(
            SessionHandler::new(Arc::new(mock)).retry_timeout(Duration::from_millis(250)),
        );
        router.get("/count").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            assert!(ctx.session().is_some());
            ctx.response().end()?;
            Ok(())
        }));

        let cookie = format!("{DEFAULT_COOKIE_NAME}=abc");
        let response = router.handle(get_with_cookie("/count", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
