use bytes::Bytes;
use relay_web::{Router, RoutingContext, handler_fn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let router = Router::new();
    router.get("/hello/:name").unwrap().handler(handler_fn(|ctx: RoutingContext| async move {
        let name = ctx.path_param("name").unwrap_or_else(|| "world".to_string());
        ctx.response().end_with(Bytes::from(format!("hello {name}\n")))?;
        Ok(())
    }));

    // the router is transport-agnostic; feed it requests from any server
    let request = http::Request::builder().uri("/hello/rust").body(()).unwrap();
    let response = router.handle(request).await;

    println!("{} {:?}", response.status(), response.body());
}
