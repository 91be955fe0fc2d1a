use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;

/// Request log via `tracing`: one line at arrival, one with the status and
/// elapsed time when the response ends.
pub struct LoggerHandler;

impl LoggerHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggerHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for LoggerHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let method = ctx.request().method().clone();
        let path = ctx.request().path().to_string();
        let started = Instant::now();
        info!(%method, path, "request received");

        let result = ctx.response().on_end(move |state| {
            info!(%method, path, status = %state.status, elapsed = ?started.elapsed(), "request completed");
        });
        if let Err(cause) = result {
            warn!(%cause, "response ended before the completion log could be registered");
        }

        ctx.next().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::router::Router;
    use http::{Request, StatusCode};

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn logging_does_not_disturb_dispatch() {
        let router = Router::new();
        router.route_any().handler(LoggerHandler::new());
        router.get("/ping").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
            ctx.response().end_with(bytes::Bytes::from_static(b"pong"))?;
            Ok(())
        }));

        let request = Request::builder().uri("/ping").body(()).unwrap();
        let response = router.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"pong");
    }
}
