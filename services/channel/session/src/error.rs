//! Client error types.

use thiserror::Error;

/// Errors surfaced by the broker session client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport open or send failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// The liveness probe reported the broker explicitly unavailable
    #[error("broker service is unavailable")]
    ServiceDown,

    /// No ready signal within the open deadline
    #[error("timed out waiting for the connection to open")]
    ConnectionTimeout,

    /// Broker explicitly rejected the verification, or the handshake
    /// response was unusable
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No principal address available
    #[error("no wallet connected")]
    WalletNotConnected,

    /// Session operation attempted before the handshake completed
    #[error("not authenticated")]
    NotAuthenticated,

    /// Action or settlement attempted without a created session
    #[error("no active application session")]
    NoActiveSession,

    /// An application session is already active on this connection
    #[error("an application session is already active")]
    SessionActive,

    /// Broker-reported error, including error-shaped success envelopes
    #[error("broker error {code}: {message}")]
    Protocol {
        /// Broker error code
        code: i64,
        /// Broker error message
        message: String,
    },

    /// Success envelope declared a different method than the request awaited
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Method the pending request expected
        expected: String,
        /// Method the broker declared
        actual: String,
    },

    /// No response within the per-request deadline
    #[error("request {0} timed out")]
    RequestTimeout(String),

    /// A confirmed response is missing a field the protocol requires
    #[error("response missing field {0}")]
    MissingField(&'static str),

    /// The wallet signing capability failed
    #[error("signing failed: {0}")]
    Signing(String),
}
