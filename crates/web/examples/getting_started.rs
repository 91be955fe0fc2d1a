use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use relay_web::handlers::{BodyHandler, LoggerHandler, SessionHandler};
use relay_web::{LocalSessionStore, Router, RoutingContext, handler_fn};

async fn whoami(ctx: RoutingContext) -> Result<(), relay_web::WebError> {
    let session = ctx.session().unwrap();
    let visits = session.get("visits").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    session.put("visits", visits);
    ctx.response().end_with(Bytes::from(format!("visit number {visits}\n")))?;
    Ok(())
}

async fn echo(ctx: RoutingContext) -> Result<(), relay_web::WebError> {
    let body = ctx.body().unwrap_or_default();
    ctx.response().end_with(body)?;
    Ok(())
}

async fn admin_area(ctx: RoutingContext) -> Result<(), relay_web::WebError> {
    // no user attached: reject, the failure route below answers
    if ctx.user().is_none() {
        ctx.fail(StatusCode::UNAUTHORIZED).await;
        return Ok(());
    }
    ctx.response().end_with(Bytes::from_static(b"welcome back\n"))?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let router = Router::new();
    router.route_any().handler(LoggerHandler::new());
    router.route_any().handler(BodyHandler::with_limit(64 * 1024));
    router.route_any().handler(SessionHandler::new(Arc::new(LocalSessionStore::new())));

    router.get("/whoami").unwrap().handler(handler_fn(whoami));
    router.post("/echo").unwrap().handler(handler_fn(echo));

    // a whole sub-application mounted under /admin
    let admin = Router::new();
    admin.get("/").unwrap().handler(handler_fn(admin_area));
    router.mount("/admin", admin).unwrap();

    router.route_any().last().failure_handler(handler_fn(|ctx: RoutingContext| async move {
        let status = ctx.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let response = ctx.response();
        response.set_status(status)?;
        response.end_with(Bytes::from(format!("sorry: {status}\n")))?;
        Ok(())
    }));

    for uri in ["/whoami", "/admin", "/missing"] {
        let request = http::Request::builder().uri(uri).body(()).unwrap();
        let response = router.handle(request).await;
        println!("{uri}: {} {:?}", response.status(), response.body());
    }
}
