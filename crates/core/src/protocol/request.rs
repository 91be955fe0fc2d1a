//! Server request abstraction.
//!
//! [`ServerRequest`] wraps an `http::Request<Bytes>` whose body has already
//! been read by the transport. The routing engine only needs the request
//! line, headers and the buffered payload; streaming bodies stay on the
//! transport side of the boundary.

use std::sync::OnceLock;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri, Version};
use tracing::warn;

/// An inbound request as seen by the routing engine.
///
/// The query string is parsed lazily on first access and cached for the
/// lifetime of the request.
#[derive(Debug)]
pub struct ServerRequest {
    inner: Request<Bytes>,
    query_params: OnceLock<Vec<(String, String)>>,
}

impl ServerRequest {
    /// Returns a reference to the request's HTTP method.
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Returns a reference to the request's URI.
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// Returns the raw (undecoded) request path.
    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    /// Returns the raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.inner.uri().query()
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns a reference to the request's headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Returns the buffered request body.
    pub fn body(&self) -> &Bytes {
        self.inner.body()
    }

    /// Returns the parsed query parameters in document order.
    ///
    /// A malformed query string yields no parameters rather than an error:
    /// routing decisions must not fail on garbage a client put after `?`.
    pub fn query_params(&self) -> &[(String, String)] {
        self.query_params.get_or_init(|| {
            let Some(query) = self.query() else {
                return Vec::new();
            };
            match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
                Ok(params) => params,
                Err(e) => {
                    warn!(cause = %e, query, "ignoring unparsable query string");
                    Vec::new()
                }
            }
        })
    }

    /// Returns every value of the named query parameter, in document order.
    pub fn query_param(&self, name: &str) -> Vec<&str> {
        self.query_params().iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str()).collect()
    }
}

impl From<Request<Bytes>> for ServerRequest {
    fn from(inner: Request<Bytes>) -> Self {
        Self { inner, query_params: OnceLock::new() }
    }
}

/// Converts a bodyless request, attaching an empty payload.
impl From<Request<()>> for ServerRequest {
    fn from(request: Request<()>) -> Self {
        request.map(|()| Bytes::new()).into()
    }
}
