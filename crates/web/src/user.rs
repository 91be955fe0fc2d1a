//! Authenticated identities.

use std::sync::Arc;

use serde_json::Value;

/// The authenticated identity attached to a request by an auth handler.
///
/// The principal is an opaque JSON object owned by whatever authentication
/// scheme produced it (a username/roles pair, a decoded token, ...); this
/// crate only transports it.
#[derive(Clone, Debug)]
pub struct User {
    principal: Arc<Value>,
}

impl User {
    pub fn new(principal: Value) -> Self {
        Self { principal: Arc::new(principal) }
    }

    pub fn principal(&self) -> &Value {
        &self.principal
    }

    /// Convenience lookup of a top-level principal field.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.principal.get(key)
    }
}
