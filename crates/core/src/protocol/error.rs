use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response has already ended")]
    ResponseEnded,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid query string: {reason}")]
    InvalidQuery { reason: String },
}

impl ProtocolError {
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_query<S: ToString>(str: S) -> Self {
        Self::InvalidQuery { reason: str.to_string() }
    }
}
