//! Envelope decode error types.

use thiserror::Error;

/// Envelope decode errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Payload is not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Top level is not a JSON object
    #[error("envelope is not an object")]
    NotAnObject,

    /// Object carries neither a `res` nor an `err` member
    #[error("unknown envelope shape")]
    UnknownShape,

    /// Envelope body is not the expected array
    #[error("malformed envelope body")]
    Malformed,

    /// Required body field missing or mistyped
    #[error("missing field {0}")]
    Field(&'static str),
}
