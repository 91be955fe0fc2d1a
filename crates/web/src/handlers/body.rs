use async_trait::async_trait;
use http::StatusCode;
use tracing::debug;

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;

/// Publishes the request body on the context so downstream handlers can
/// read it via [`RoutingContext::body`]. Requests whose body exceeds the
/// configured limit fail with 413 before any downstream handler runs.
pub struct BodyHandler {
    limit: Option<usize>,
}

impl BodyHandler {
    /// A body handler with no size limit.
    pub fn new() -> Self {
        Self { limit: None }
    }

    /// Rejects bodies larger than `limit` bytes with 413.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

impl Default for BodyHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for BodyHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let body = ctx.request().body().clone();

        if let Some(limit) = self.limit {
            if body.len() > limit {
                debug!(size = body.len(), limit, "request body over limit");
                ctx.fail(StatusCode::PAYLOAD_TOO_LARGE).await;
                return Ok(());
            }
        }

        ctx.set_body(body);
        ctx.next().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::router::Router;
    use bytes::Bytes;
    use http::Request;

    fn post(body: &'static [u8]) -> Request<Bytes> {
        Request::builder()
            .method(http::Method::POST)
            .uri("/upload")
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn publishes_body_to_downstream_handlers() {
        let router = Router::new();
        router.route_any().handler(BodyHandler::new());
        router.post("/upload").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            let body = ctx.body().unwrap();
            ctx.response().end_with(body)?;
            Ok(())
        }));

        let response = router.handle(post(b"hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"hello");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn oversized_body_fails_with_413() {
        let router = Router::new();
        router.route_any().handler(BodyHandler::with_limit(3));
        router.post("/upload").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            ctx.response().end()?;
            Ok(())
        }));

        let response = router.handle(post(b"too large")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
