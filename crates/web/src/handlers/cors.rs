use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode, header};
use tracing::debug;

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;

/// Cross-origin resource sharing.
///
/// Non-CORS requests (no `Origin` header) pass straight through. Allowed
/// origins get the response headers; preflight `OPTIONS` requests are
/// answered directly with 204; disallowed origins fail with 403.
pub struct CorsHandler {
    allow_any_origin: bool,
    allowed_origins: Vec<String>,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    max_age: Option<Duration>,
    allow_credentials: bool,
}

impl CorsHandler {
    /// Allows every origin (`Access-Control-Allow-Origin: *`).
    pub fn any_origin() -> Self {
        Self {
            allow_any_origin: true,
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            max_age: None,
            allow_credentials: false,
        }
    }

    /// Allows exactly the given origins.
    pub fn origins(origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow_any_origin: false,
            allowed_origins: origins.into_iter().map(Into::into).collect(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            max_age: None,
            allow_credentials: false,
        }
    }

    pub fn allowed_method(mut self, method: Method) -> Self {
        self.allowed_methods.push(method);
        self
    }

    pub fn allowed_header(mut self, name: impl Into<String>) -> Self {
        self.allowed_headers.push(name.into());
        self
    }

    /// How long clients may cache the preflight answer.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn allow_credentials(mut self, enabled: bool) -> Self {
        self.allow_credentials = enabled;
        self
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_any_origin || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// The `Access-Control-Allow-Origin` value for an allowed origin.
    fn allow_origin_value(&self, origin: &str) -> String {
        // credentialed responses must echo the origin, never `*`
        if self.allow_any_origin && !self.allow_credentials {
            "*".to_string()
        } else {
            origin.to_string()
        }
    }

    fn apply_common_headers(&self, ctx: &RoutingContext, origin: &str) -> Result<(), WebError> {
        let response = ctx.response();
        response.put_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin_value(origin))?;
        response.put_header(header::VARY, "Origin")?;
        if self.allow_credentials {
            response.put_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true")?;
        }
        Ok(())
    }

    fn answer_preflight(&self, ctx: &RoutingContext, origin: &str) -> Result<(), WebError> {
        self.apply_common_headers(ctx, origin)?;
        let response = ctx.response();

        if !self.allowed_methods.is_empty() {
            let methods =
                self.allowed_methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            response.put_header(header::ACCESS_CONTROL_ALLOW_METHODS, methods)?;
        }
        if !self.allowed_headers.is_empty() {
            response.put_header(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allowed_headers.join(", "))?;
        }
        if let Some(max_age) = self.max_age {
            response.put_header(header::ACCESS_CONTROL_MAX_AGE, max_age.as_secs().to_string())?;
        }

        response.set_status(StatusCode::NO_CONTENT)?;
        response.end()?;
        Ok(())
    }
}

#[async_trait]
impl Handler for CorsHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let origin = match ctx.request().headers().get(header::ORIGIN) {
            None => {
                ctx.next().await;
                return Ok(());
            }
            Some(value) => match value.to_str() {
                Ok(origin) => origin.to_string(),
                Err(_) => {
                    ctx.fail(StatusCode::FORBIDDEN).await;
                    return Ok(());
                }
            },
        };

        if !self.origin_allowed(&origin) {
            debug!(origin, "rejecting disallowed origin");
            ctx.fail(StatusCode::FORBIDDEN).await;
            return Ok(());
        }

        if ctx.request().method() == Method::OPTIONS {
            return self.answer_preflight(&ctx, &origin);
        }

        self.apply_common_headers(&ctx, &origin)?;
        ctx.next().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::router::Router;
    use http::Request;

    fn cors_router(cors: CorsHandler) -> Router {
        let router = Router::new();
        router.route_any().handler(cors);
        router.get("/data").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            ctx.response().end_with(bytes::Bytes::from_static(b"ok"))?;
            Ok(())
        }));
        router
    }

    fn request(method: Method, origin: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method(method).uri("/data");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn non_cors_request_passes_through() {
        let router = cors_router(CorsHandler::origins(["https://app.example"]));
        let response = router.handle(request(Method::GET, None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn allowed_origin_gets_cors_headers() {
        let router = cors_router(CorsHandler::origins(["https://app.example"]));
        let response = router.handle(request(Method::GET, Some("https://app.example"))).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn disallowed_origin_is_rejected() {
        let router = cors_router(CorsHandler::origins(["https://app.example"]));
        let response = router.handle(request(Method::GET, Some("https://evil.example"))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn preflight_is_answered_directly() {
        let cors = CorsHandler::any_origin()
            .allowed_method(Method::GET)
            .allowed_method(Method::POST)
            .allowed_header("content-type")
            .max_age(Duration::from_secs(600));
        let router = cors_router(cors);

        let response = router.handle(request(Method::OPTIONS, Some("https://app.example"))).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(response.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "GET, POST");
        assert_eq!(response.headers().get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "600");
    }
}
