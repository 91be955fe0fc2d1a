//! The per-request dispatch state machine.
//!
//! A request is in one of three states: dispatching normally, dispatching a
//! failure, or terminated (response ended). `next()` drives the first two;
//! the transitions are:
//!
//! - normal iteration exhausts with no match → fail with 404 and rescan
//! - a handler fails (explicitly or by returning `Err`) → failure iteration
//!   from the top of the level where the failure was raised
//! - failure iteration exhausts → status-specific error handler, else the
//!   built-in error response; the router exception handler is notified when
//!   a live error is attached
//! - a handler fails *during* failure iteration → the exception handler is
//!   notified exactly once and the built-in response is written, without
//!   re-entering failure dispatch (prevents infinite failure loops)
//!
//! Child views delegate to their parent on exhaustion instead of entering
//! the terminal paths; only the root context synthesizes responses.

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, trace};

use super::RoutingContext;
use crate::error::WebError;
use crate::handler::SharedHandler;

/// What `advance` decided the dispatch loop should do next.
pub(crate) enum Step {
    /// Invoke this handler of the current/newly matched route.
    Invoke(SharedHandler),
    /// This level is exhausted; resume the parent view's iteration.
    Delegate(RoutingContext),
    /// Root normal iteration exhausted with no match.
    NotFound,
    /// Root failure iteration exhausted with no failure route.
    Unhandled,
}

/// One `next()` step: advance the cursor, run the chosen handler, translate
/// its outcome.
pub(crate) async fn run(ctx: RoutingContext) {
    if ctx.response().ended() {
        // tolerated for lenient callers, never an error
        trace!("next() called after the response ended, ignoring");
        return;
    }

    let failure = ctx.failed();
    match ctx.advance(failure) {
        Step::Invoke(handler) => {
            if let Err(error) = handler.handle(ctx.clone()).await {
                if failure {
                    // a failing failure handler must not re-enter failure dispatch
                    debug!(cause = %error, "failure handler failed, invoking exception handler");
                    ctx.router().notify_exception(&error);
                    let status = ctx.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    write_default_response(&ctx, status);
                } else {
                    trace!(cause = %error, "handler failed, entering failure dispatch");
                    ctx.record_failure(error);
                    Box::pin(run(ctx)).await;
                }
            }
        }
        Step::Delegate(parent) => {
            trace!(mount_point = ctx.mount_point(), "sub-router exhausted, delegating to parent");
            Box::pin(run(parent)).await;
        }
        Step::NotFound => {
            trace!(path = ctx.normalized_path(), "no route matched, failing with 404");
            ctx.record_failure(WebError::status(StatusCode::NOT_FOUND));
            Box::pin(run(ctx)).await;
        }
        Step::Unhandled => {
            unhandled_failure(ctx).await;
        }
    }
}

/// Terminal failure path: a registered status-specific error handler takes
/// precedence over the built-in response.
async fn unhandled_failure(ctx: RoutingContext) {
    let status = ctx.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let Some(handler) = ctx.router().error_handler_for(status) {
        if let Err(error) = handler.handle(ctx.clone()).await {
            debug!(cause = %error, "error handler failed, invoking exception handler");
            ctx.router().notify_exception(&error);
            write_default_response(&ctx, status);
        }
        return;
    }

    write_default_response(&ctx, status);

    // a live error (as opposed to a bare status code) is reported upstream
    if let Some(failure) = ctx.failure() {
        if matches!(failure.as_ref(), WebError::Internal { .. }) {
            ctx.router().notify_exception(failure.as_ref());
        }
    }
}

/// Writes the minimal built-in error response: the status code and its
/// reason phrase, no internal details.
fn write_default_response(ctx: &RoutingContext, status: StatusCode) {
    let response = ctx.response();
    if response.ended() {
        return;
    }
    let body = status.canonical_reason().unwrap_or("Error");
    // a concurrent end wins; losing these writes is acceptable
    let _ = response.set_status(status);
    let _ = response.put_header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8");
    let _ = response.end_with(Bytes::from_static(body.as_bytes()));
}
