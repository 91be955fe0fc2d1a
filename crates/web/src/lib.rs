mod path;

pub mod context;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod route;
pub mod router;
pub mod session;
pub mod template;
pub mod user;

pub use context::RoutingContext;
pub use error::RouteError;
pub use error::WebError;
pub use handler::FnHandler;
pub use handler::Handler;
pub use handler::handler_fn;
pub use path::normalize_path;
pub use route::Route;
pub use router::Router;
pub use session::LocalSessionStore;
pub use session::Session;
pub use session::SessionStore;
pub use template::TemplateEngine;
pub use user::User;
