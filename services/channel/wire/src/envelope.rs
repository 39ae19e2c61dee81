//! Request/response envelope encoding and decoding.
//!
//! Every message on the control channel is a JSON object wrapping a
//! four-element body array. Requests carry `{"req": [id, method, params,
//! timestamp], "sig": [..]}`; success responses carry the same shape under
//! `"res"`, and error responses carry `{"err": [id, code, message,
//! timestamp]}`. Some brokers additionally report application errors as a
//! success envelope whose method is literally `"error"` — decoding maps
//! those to the error variant so callers see a single error shape.

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::WireError;

/// Method name a broker uses when it wraps an application error in a
/// success envelope.
pub const METHOD_ERROR: &str = "error";

/// Error code reported for error-shaped success envelopes that carry no
/// explicit code of their own.
pub const CODE_UNSPECIFIED: i64 = -1;

/// Well-known request method names.
pub mod method {
    /// Fetch broker configuration (broker address, supported assets).
    pub const GET_CONFIG: &str = "get_config";
    /// Open the authentication handshake; the broker answers with a challenge.
    pub const AUTH_REQUEST: &str = "auth_request";
    /// Method name of the broker's challenge response.
    pub const AUTH_CHALLENGE: &str = "auth_challenge";
    /// Submit the signed challenge for verification.
    pub const AUTH_VERIFY: &str = "auth_verify";
    /// Create an application session.
    pub const CREATE_APP_SESSION: &str = "create_app_session";
    /// Submit a state update against the active application session.
    pub const SUBMIT_APP_STATE: &str = "submit_app_state";
    /// Close the active application session and trigger settlement.
    pub const CLOSE_APP_SESSION: &str = "close_app_session";
    /// Liveness probe; no response is expected.
    pub const PING: &str = "ping";
}

/// Milliseconds since the Unix epoch, the envelope timestamp unit.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An outbound request envelope.
#[derive(Debug, Clone)]
pub struct Request {
    /// Locally unique, monotonically increasing request id
    pub id: u64,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl Request {
    /// Create a request stamped with the current time.
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
            timestamp: now_millis(),
        }
    }

    /// The canonical `[id, method, params, timestamp]` body array. This is
    /// the portion covered by the envelope signature.
    pub fn body(&self) -> Value {
        json!([self.id, self.method, self.params, self.timestamp])
    }

    /// Serialize the full envelope with the given signatures attached.
    pub fn encode(&self, signatures: &[String]) -> String {
        json!({ "req": self.body(), "sig": signatures }).to_string()
    }
}

/// A decoded inbound envelope.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Success envelope: `{"res": [id, method, result, timestamp]}`
    Response {
        /// Request id this response answers
        id: u64,
        /// Method name declared by the broker
        method: String,
        /// Result body
        result: Value,
        /// Broker-side timestamp (milliseconds)
        timestamp: u64,
    },
    /// Error envelope: `{"err": [id, code, message, timestamp]}`, or an
    /// error-shaped success envelope
    Error {
        /// Request id this error answers
        id: u64,
        /// Broker error code
        code: i64,
        /// Broker error message
        message: String,
        /// Broker-side timestamp (milliseconds)
        timestamp: u64,
    },
}

impl Envelope {
    /// The request id the envelope correlates to.
    pub fn id(&self) -> u64 {
        match self {
            Envelope::Response { id, .. } | Envelope::Error { id, .. } => *id,
        }
    }

    /// Decode a raw text frame into an envelope.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value.as_object().ok_or(WireError::NotAnObject)?;

        if let Some(body) = obj.get("res") {
            decode_success(body)
        } else if let Some(body) = obj.get("err") {
            decode_error(body)
        } else {
            Err(WireError::UnknownShape)
        }
    }
}

fn decode_success(body: &Value) -> Result<Envelope, WireError> {
    let arr = body.as_array().ok_or(WireError::Malformed)?;

    let id = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or(WireError::Field("id"))?;
    let method = arr
        .get(1)
        .and_then(Value::as_str)
        .ok_or(WireError::Field("method"))?
        .to_string();
    let result = arr.get(2).cloned().unwrap_or(Value::Null);
    let timestamp = arr.get(3).and_then(Value::as_u64).unwrap_or_default();

    // An error wrapped in a success envelope collapses to the error variant.
    if method == METHOD_ERROR {
        let code = result
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(CODE_UNSPECIFIED);
        let message = result
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| result.as_str())
            .unwrap_or("unspecified broker error")
            .to_string();
        return Ok(Envelope::Error {
            id,
            code,
            message,
            timestamp,
        });
    }

    Ok(Envelope::Response {
        id,
        method,
        result,
        timestamp,
    })
}

fn decode_error(body: &Value) -> Result<Envelope, WireError> {
    let arr = body.as_array().ok_or(WireError::Malformed)?;

    let id = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or(WireError::Field("id"))?;
    let code = arr
        .get(1)
        .and_then(Value::as_i64)
        .ok_or(WireError::Field("code"))?;
    let message = arr
        .get(2)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let timestamp = arr.get(3).and_then(Value::as_u64).unwrap_or_default();

    Ok(Envelope::Error {
        id,
        code,
        message,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encode() {
        let req = Request::new(7, method::PING, json!({}));
        let encoded = req.encode(&["0xsig".to_string()]);

        let value: Value = serde_json::from_str(&encoded).unwrap();
        let body = value.get("req").unwrap().as_array().unwrap();
        assert_eq!(body[0], json!(7));
        assert_eq!(body[1], json!("ping"));
        assert_eq!(body[2], json!({}));
        assert!(body[3].as_u64().unwrap() > 0);
        assert_eq!(value.get("sig").unwrap(), &json!(["0xsig"]));
    }

    #[test]
    fn test_decode_success() {
        let text = r#"{"res": [42, "get_config", {"broker_address": "0xb"}, 1700000000000]}"#;
        match Envelope::decode(text).unwrap() {
            Envelope::Response {
                id,
                method,
                result,
                timestamp,
            } => {
                assert_eq!(id, 42);
                assert_eq!(method, "get_config");
                assert_eq!(result["broker_address"], "0xb");
                assert_eq!(timestamp, 1_700_000_000_000);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error() {
        let text = r#"{"err": [42, 4001, "unauthorized", 1700000000000]}"#;
        match Envelope::decode(text).unwrap() {
            Envelope::Error { id, code, message, .. } => {
                assert_eq!(id, 42);
                assert_eq!(code, 4001);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_shaped_success_collapses_to_error() {
        let text = r#"{"res": [9, "error", {"error": "insufficient funds"}, 0]}"#;
        match Envelope::decode(text).unwrap() {
            Envelope::Error { id, code, message, .. } => {
                assert_eq!(id, 9);
                assert_eq!(code, CODE_UNSPECIFIED);
                assert_eq!(message, "insufficient funds");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(WireError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode("[1, 2, 3]"),
            Err(WireError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"msg": "hello"}"#),
            Err(WireError::UnknownShape)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"res": ["nope"]}"#),
            Err(WireError::Field("id"))
        ));
    }

    #[test]
    fn test_envelope_id_extraction() {
        let ok = Envelope::decode(r#"{"res": [5, "ping", null, 0]}"#).unwrap();
        let err = Envelope::decode(r#"{"err": [6, 500, "boom", 0]}"#).unwrap();
        assert_eq!(ok.id(), 5);
        assert_eq!(err.id(), 6);
    }
}
