//! Authentication handshake against the broker.
//!
//! The handshake runs in four steps, each one correlator round trip:
//! configuration fetch, challenge request, challenge signing via the
//! wallet capability, and verification. The driving sequence lives in the
//! connection actor; this module holds the stage machine and the payload
//! builders/parsers for each step.

use serde_json::{json, Value};

use crate::error::ClientError;

/// Handshake progress. `Failed` is terminal and absorbs any step's error;
/// recovering from it means reconnecting and re-running the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// No handshake attempted on this connection yet
    Disconnected,
    /// Broker configuration received
    ConfigFetched,
    /// Challenge received, awaiting signature and verification
    ChallengeIssued,
    /// Verification confirmed by the broker
    Authenticated,
    /// A handshake step failed
    Failed,
}

/// Broker identity learned from the configuration fetch; immutable for the
/// rest of the connection.
#[derive(Debug, Clone)]
pub struct BrokerIdentity {
    /// The broker's settlement address
    pub address: String,
}

/// Session credential produced by a successful handshake.
#[derive(Debug, Clone)]
pub struct AuthCredential {
    /// Principal address the handshake verified
    pub principal: String,
    /// Bearer token for the rest of the connection, when the broker
    /// issues one
    pub token: Option<String>,
    /// Whether the broker explicitly confirmed verification
    pub verified: bool,
}

/// Caller-supplied handshake parameters.
#[derive(Debug, Clone)]
pub struct AuthParams {
    /// Application name; also the domain scope for challenge signing
    pub application: String,
    /// Requested permission scope
    pub scope: String,
    /// Spending allowance cap declared to the broker
    pub allowance: String,
    /// Expiry of the session authorization, seconds since the Unix epoch
    pub expire: u64,
}

/// Extract the broker identity from a `get_config` result.
pub fn config_identity(result: &Value) -> Result<BrokerIdentity, ClientError> {
    let address = result
        .get("broker_address")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ClientError::AuthenticationFailed("configuration carries no broker address".to_string())
        })?;
    Ok(BrokerIdentity {
        address: address.to_string(),
    })
}

/// Parameters for the `auth_request` step: declares the ephemeral signing
/// identity, the allowance cap, the expiry and the requested scope.
pub fn auth_request_params(principal: &str, session_key: &str, params: &AuthParams) -> Value {
    json!({
        "address": principal,
        "session_key": session_key,
        "application": params.application,
        "scope": params.scope,
        "expire": params.expire,
        "allowance": params.allowance,
    })
}

/// The domain-scoped payload the wallet signs: the requested scope, the
/// session key, the expiry, the allowance, and the full parsed challenge.
pub fn challenge_payload(session_key: &str, params: &AuthParams, challenge: &Value) -> Value {
    json!({
        "scope": params.scope,
        "session_key": session_key,
        "expire": params.expire,
        "allowance": params.allowance,
        "challenge": challenge,
    })
}

/// Parameters for the `auth_verify` step, built from the signer and the
/// full parsed challenge.
pub fn verify_params(principal: &str, challenge: &Value, signature: &str) -> Value {
    json!({
        "address": principal,
        "challenge": challenge,
        "signature": signature,
    })
}

/// Interpret an `auth_verify` result.
///
/// Success is the explicit boolean flag, never the mere absence of an
/// error. The credential token may arrive under either `jwtToken` or
/// `jwt_token` depending on the broker build; both spellings are accepted,
/// preferring the first present.
pub fn verification_outcome(principal: &str, result: &Value) -> Result<AuthCredential, ClientError> {
    let verified = result
        .get("success")
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            ClientError::AuthenticationFailed(
                "verification response carries no success flag".to_string(),
            )
        })?;
    if !verified {
        return Err(ClientError::AuthenticationFailed(
            "broker rejected the challenge signature".to_string(),
        ));
    }

    let token = result
        .get("jwtToken")
        .or_else(|| result.get("jwt_token"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AuthCredential {
        principal: principal.to_string(),
        token,
        verified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AuthParams {
        AuthParams {
            application: "clearway".to_string(),
            scope: "app.create".to_string(),
            allowance: "100".to_string(),
            expire: 1_700_003_600,
        }
    }

    #[test]
    fn test_config_identity() {
        let result = json!({"broker_address": "0xbroker", "networks": []});
        assert_eq!(config_identity(&result).unwrap().address, "0xbroker");

        let err = config_identity(&json!({})).unwrap_err();
        assert!(matches!(err, ClientError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_auth_request_declares_identity_and_limits() {
        let value = auth_request_params("0xme", "0xsession", &params());
        assert_eq!(value["address"], "0xme");
        assert_eq!(value["session_key"], "0xsession");
        assert_eq!(value["application"], "clearway");
        assert_eq!(value["scope"], "app.create");
        assert_eq!(value["allowance"], "100");
        assert_eq!(value["expire"], 1_700_003_600u64);
    }

    #[test]
    fn test_challenge_payload_carries_full_challenge() {
        let challenge = json!({"challenge_message": "uuid-1234"});
        let payload = challenge_payload("0xsession", &params(), &challenge);
        assert_eq!(payload["challenge"]["challenge_message"], "uuid-1234");
        assert_eq!(payload["session_key"], "0xsession");
    }

    #[test]
    fn test_verification_requires_explicit_success() {
        // Explicit rejection
        let err = verification_outcome("0xme", &json!({"success": false})).unwrap_err();
        assert!(matches!(err, ClientError::AuthenticationFailed(_)));

        // Absence of the flag is not success
        let err = verification_outcome("0xme", &json!({"jwtToken": "t"})).unwrap_err();
        assert!(matches!(err, ClientError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_token_accepted_under_both_spellings() {
        let camel = verification_outcome("0xme", &json!({"success": true, "jwtToken": "tok-a"}))
            .unwrap();
        assert_eq!(camel.token.as_deref(), Some("tok-a"));

        let snake = verification_outcome("0xme", &json!({"success": true, "jwt_token": "tok-b"}))
            .unwrap();
        assert_eq!(snake.token.as_deref(), Some("tok-b"));

        // Both present: the first spelling wins.
        let both = verification_outcome(
            "0xme",
            &json!({"success": true, "jwtToken": "tok-a", "jwt_token": "tok-b"}),
        )
        .unwrap();
        assert_eq!(both.token.as_deref(), Some("tok-a"));

        // A missing token is still a verified credential.
        let none = verification_outcome("0xme", &json!({"success": true})).unwrap();
        assert!(none.verified);
        assert_eq!(none.token, None);
    }
}
