use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RoutingContext;
use crate::error::WebError;

/// A unit of work in a route's handler chain.
///
/// A handler receives the per-request [`RoutingContext`] and either ends the
/// response, calls `ctx.next()` (synchronously or later, from a spawned
/// task), fails the context, or returns `Err`, which the dispatch loop
/// treats exactly like an explicit `fail`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError>;
}

/// A [`Handler`] built from an async function or closure.
pub struct FnHandler<F> {
    f: F,
}

/// Adapts an async `Fn(RoutingContext) -> Result<(), WebError>` into a
/// [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RoutingContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WebError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RoutingContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WebError>> + Send,
{
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        (self.f)(ctx).await
    }
}

/// Shared, type-erased handler reference as stored on routes.
pub type SharedHandler = Arc<dyn Handler>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_handler<T: Handler>(_handler: &T) {
        // no op
    }

    #[test]
    fn async_fn_is_a_handler() {
        async fn noop(_ctx: RoutingContext) -> Result<(), WebError> {
            Ok(())
        }

        let handler = handler_fn(noop);
        assert_is_handler(&handler);
    }

    #[test]
    fn async_closure_is_a_handler() {
        let handler = handler_fn(|_ctx: RoutingContext| async move { Ok(()) });
        assert_is_handler(&handler);
    }
}
