//! Protocol-facing abstractions the routing engine depends on.
//!
//! The routing engine never touches sockets; it sees a [`ServerRequest`]
//! (method, uri, headers, buffered body) and drives a [`ServerResponse`]
//! (status, headers, buffered body, write/end). Both are built from the
//! `http` crate's vocabulary types so any transport that can produce an
//! `http::Request<Bytes>` plugs in.

mod request;
pub use request::ServerRequest;

mod response;
pub use response::ResponseState;
pub use response::ServerResponse;

mod error;
pub use error::ProtocolError;
