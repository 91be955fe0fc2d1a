//! Server response abstraction.
//!
//! [`ServerResponse`] is a handle, not a value: the routing engine threads
//! one response through an arbitrary number of context views, any of which
//! may write to it or end it. Ending the response is the terminal event of
//! a request's dispatch, so the handle also carries a signal that resolves
//! once `end` has run; the dispatch entry point awaits it instead of
//! assuming the handler chain finishes on the caller's stack.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use tokio::sync::Notify;

use crate::protocol::ProtocolError;

/// Mutable response state handed to end hooks.
///
/// End hooks get direct access to this struct (status, headers, body) right
/// before the response is published, which is how cookies, session ids and
/// response-time headers make it onto responses ended deep inside a handler
/// chain.
#[derive(Debug)]
pub struct ResponseState {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BytesMut,
}

type EndHook = Box<dyn FnOnce(&mut ResponseState) + Send>;

struct Shared {
    state: ResponseState,
    end_hooks: Vec<EndHook>,
    ended: bool,
}

/// A cheaply cloneable handle over the per-request response state.
#[derive(Clone)]
pub struct ServerResponse {
    shared: Arc<Mutex<Shared>>,
    end_notify: Arc<Notify>,
}

impl ServerResponse {
    /// Creates a fresh `200 OK` response with no headers and an empty body.
    pub fn new() -> Self {
        let state = ResponseState { status: StatusCode::OK, headers: HeaderMap::new(), body: BytesMut::new() };
        Self {
            shared: Arc::new(Mutex::new(Shared { state, end_hooks: Vec::new(), ended: false })),
            end_notify: Arc::new(Notify::new()),
        }
    }

    /// Returns the current status code.
    pub fn status(&self) -> StatusCode {
        self.lock().state.status
    }

    /// Sets the status code. Fails once the response has ended.
    pub fn set_status(&self, status: StatusCode) -> Result<(), ProtocolError> {
        let mut shared = self.lock();
        if shared.ended {
            return Err(ProtocolError::ResponseEnded);
        }
        shared.state.status = status;
        Ok(())
    }

    /// Appends a header. Fails once the response has ended.
    pub fn put_header<K, V>(&self, name: K, value: V) -> Result<(), ProtocolError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: fmt::Display,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: fmt::Display,
    {
        let name = HeaderName::try_from(name).map_err(ProtocolError::invalid_header)?;
        let value = HeaderValue::try_from(value).map_err(ProtocolError::invalid_header)?;
        let mut shared = self.lock();
        if shared.ended {
            return Err(ProtocolError::ResponseEnded);
        }
        shared.state.headers.append(name, value);
        Ok(())
    }

    /// Returns a copy of the first value of the named header, if present.
    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.lock().state.headers.get(name).cloned()
    }

    /// Appends a chunk to the buffered body. Fails once the response has ended.
    pub fn write(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        let mut shared = self.lock();
        if shared.ended {
            return Err(ProtocolError::ResponseEnded);
        }
        shared.state.body.extend_from_slice(&chunk);
        Ok(())
    }

    /// Ends the response: runs the registered end hooks against the final
    /// state, publishes the ended flag and wakes everything waiting on
    /// [`ended_signal`](Self::ended_signal). Ending twice is an error.
    pub fn end(&self) -> Result<(), ProtocolError> {
        {
            let mut shared = self.lock();
            if shared.ended {
                return Err(ProtocolError::ResponseEnded);
            }
            let hooks: Vec<EndHook> = shared.end_hooks.drain(..).collect();
            for hook in hooks {
                hook(&mut shared.state);
            }
            shared.ended = true;
        }
        self.end_notify.notify_waiters();
        Ok(())
    }

    /// Writes a final chunk and ends the response.
    pub fn end_with(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        self.write(chunk)?;
        self.end()
    }

    /// Returns true once the response has ended.
    pub fn ended(&self) -> bool {
        self.lock().ended
    }

    /// Returns the number of body bytes buffered so far.
    pub fn bytes_written(&self) -> usize {
        self.lock().state.body.len()
    }

    /// Registers a hook that runs inside [`end`](Self::end), in registration
    /// order, with mutable access to the final response state.
    ///
    /// Hooks must work through the given [`ResponseState`] only; calling back
    /// into the handle from a hook deadlocks.
    pub fn on_end<F>(&self, hook: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut ResponseState) + Send + 'static,
    {
        let mut shared = self.lock();
        if shared.ended {
            return Err(ProtocolError::ResponseEnded);
        }
        shared.end_hooks.push(Box::new(hook));
        Ok(())
    }

    /// Resolves once the response has ended. Safe to call before or after
    /// the fact; an already-ended response resolves immediately.
    pub async fn ended_signal(&self) {
        loop {
            let notified = self.end_notify.notified();
            if self.ended() {
                return;
            }
            notified.await;
        }
    }

    /// Snapshots the response into an `http::Response<Bytes>`.
    pub fn to_http(&self) -> Response<Bytes> {
        let shared = self.lock();
        let mut response = Response::new(Bytes::copy_from_slice(&shared.state.body));
        *response.status_mut() = shared.state.status;
        *response.headers_mut() = shared.state.headers.clone();
        response
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // the mutex only guards plain data mutation, poisoning is unrecoverable anyway
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock();
        f.debug_struct("ServerResponse")
            .field("status", &shared.state.status)
            .field("ended", &shared.ended)
            .field("bytes_written", &shared.state.body.len())
            .finish()
    }
}
