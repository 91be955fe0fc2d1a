//! Ready-made handlers for common request plumbing.
//!
//! These are ordinary [`Handler`](crate::handler::Handler) implementations
//! meant to be registered early on a catch-all route (`router.route_any()`)
//! so the routes behind them see their effects: a published body, a loaded
//! session, CORS headers, request logs.

mod body;
mod cors;
mod logger;
mod session;
mod timeout;

pub use body::BodyHandler;
pub use cors::CorsHandler;
pub use logger::LoggerHandler;
pub use session::SessionHandler;
pub use timeout::TimeoutHandler;
