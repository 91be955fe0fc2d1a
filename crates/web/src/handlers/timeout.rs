use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tokio::time::sleep;
use tracing::debug;

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;

/// Arms a per-request timer and fails the context (408 by default) if the
/// response has not ended when it fires. Handlers still running at that
/// point keep running; the failure path just wins the response.
pub struct TimeoutHandler {
    timeout: Duration,
    status: StatusCode,
}

impl TimeoutHandler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, status: StatusCode::REQUEST_TIMEOUT }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl Handler for TimeoutHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let timeout = self.timeout;
        let status = self.status;
        let timer_ctx = ctx.clone();
        tokio::spawn(async move {
            sleep(timeout).await;
            if !timer_ctx.response().ended() {
                debug!(?timeout, "request timed out");
                timer_ctx.fail(status).await;
            }
        });

        ctx.next().await;
        Ok(())
    }
}
