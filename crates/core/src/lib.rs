//! Transport abstraction for the relay routing framework
//!
//! This crate defines the request and response objects the routing engine
//! dispatches against. It deliberately contains no wire protocol: a concrete
//! transport (an HTTP/1.1 server, an HTTP/2 stack, a test harness) parses
//! bytes into a [`protocol::ServerRequest`], hands it to the web layer, and
//! serializes the finished [`protocol::ServerResponse`] back out.
//!
//! # Core Components
//!
//! - [`protocol::ServerRequest`]: immutable view of method, uri, headers and
//!   the buffered request body, with lazy query-string parsing
//! - [`protocol::ServerResponse`]: a cheaply cloneable response handle with
//!   write/end semantics, end hooks and an ended signal so callers can await
//!   completion even when a handler finishes the response from a spawned task
//! - [`protocol::ProtocolError`]: error type for misuse of the above
//!
//! The response handle is shared by every context view of a single request,
//! which is why it is a handle rather than an owned value: ending the
//! response from any view terminates dispatch for all of them.

pub mod protocol;
