//! Pending-request registry with per-request timeouts.
//!
//! Every outbound request is registered here before it is sent; inbound
//! envelopes are matched back by id, not arrival order, so responses may
//! arrive out of order relative to send order. A timed-out entry is removed
//! from the registry, which makes a late response for the same id fall
//! through unmatched and get dropped.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;
use channel_wire::Envelope;

/// A registered in-flight request.
struct Pending {
    expected_method: String,
    tx: oneshot::Sender<Result<Value, ClientError>>,
}

/// Matches inbound envelopes to outstanding requests by id.
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: DashMap<u64, Pending>,
}

impl RequestCorrelator {
    /// Create an empty registry. Request ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate the next locally-unique request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a pending entry for `id` before the request is sent.
    ///
    /// A success envelope for this id must declare `expected_method`;
    /// anything else resolves the entry with an unexpected-response error.
    pub fn register(
        &self,
        id: u64,
        expected_method: &str,
    ) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            Pending {
                expected_method: expected_method.to_string(),
                tx,
            },
        );
        rx
    }

    /// Remove a pending entry without resolving it (failed sends).
    pub fn unregister(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Await the response for a registered entry.
    ///
    /// On timeout the entry is removed so a coincidental later match cannot
    /// falsely resolve it, and the caller gets a request-timeout error.
    pub async fn await_response(
        &self,
        id: u64,
        method: &str,
        rx: oneshot::Receiver<Result<Value, ClientError>>,
        deadline: Duration,
    ) -> Result<Value, ClientError> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Connection(
                "connection closed before response".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&id);
                debug!("request {} ({}) timed out after {:?}", id, method, deadline);
                Err(ClientError::RequestTimeout(method.to_string()))
            }
        }
    }

    /// Dispatch an inbound envelope to its pending entry.
    ///
    /// Envelopes with no matching id are dropped without error; that covers
    /// both unsolicited broker messages and responses arriving after their
    /// request timed out.
    pub fn dispatch(&self, envelope: Envelope) {
        let id = envelope.id();
        let Some((_, entry)) = self.pending.remove(&id) else {
            debug!("dropping envelope for unknown request id {}", id);
            return;
        };

        let outcome = match envelope {
            Envelope::Response { method, result, .. } => {
                if method == entry.expected_method {
                    Ok(result)
                } else {
                    Err(ClientError::UnexpectedResponse {
                        expected: entry.expected_method,
                        actual: method,
                    })
                }
            }
            Envelope::Error { code, message, .. } => Err(ClientError::Protocol { code, message }),
        };

        if entry.tx.send(outcome).is_err() {
            debug!("requester for id {} already gone", id);
        }
    }

    /// Resolve every outstanding request with a connection error.
    pub fn fail_all(&self, reason: &str) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry
                    .tx
                    .send(Err(ClientError::Connection(reason.to_string())));
            }
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(id: u64, method: &str, result: Value) -> Envelope {
        Envelope::Response {
            id,
            method: method.to_string(),
            result,
            timestamp: 0,
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let correlator = RequestCorrelator::new();
        let a = correlator.next_id();
        let b = correlator.next_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_dispatch_resolves_matching_entry() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(1, "get_config");

        correlator.dispatch(success(1, "get_config", json!({"broker_address": "0xb"})));

        let result = correlator
            .await_response(1, "get_config", rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result["broker_address"], "0xb");
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_method_mismatch_is_an_error() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(1, "get_config");

        correlator.dispatch(success(1, "auth_challenge", json!({})));

        let err = correlator
            .await_response(1, "get_config", rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            ClientError::UnexpectedResponse { expected, actual } => {
                assert_eq!(expected, "get_config");
                assert_eq!(actual, "auth_challenge");
            }
            other => panic!("expected UnexpectedResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_envelope_rejects() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(1, "create_app_session");

        correlator.dispatch(Envelope::Error {
            id: 1,
            code: 4003,
            message: "insufficient balance".to_string(),
            timestamp: 0,
        });

        let err = correlator
            .await_response(1, "create_app_session", rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol { code: 4003, .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let correlator = RequestCorrelator::new();
        let _rx = correlator.register(1, "ping");

        // No entry for id 99; dispatch must be a no-op.
        correlator.dispatch(success(99, "ping", Value::Null));
        assert_eq!(correlator.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_late_response_is_ignored() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(1, "submit_app_state");

        let err = correlator
            .await_response(1, "submit_app_state", rx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestTimeout(_)));
        assert_eq!(correlator.outstanding(), 0);

        // The late response finds no entry and is silently dropped.
        correlator.dispatch(success(1, "submit_app_state", json!({"version": 3})));
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_by_id() {
        let correlator = RequestCorrelator::new();
        let rx_a = correlator.register(1, "get_config");
        let rx_b = correlator.register(2, "ping");

        // Second request answered first.
        correlator.dispatch(success(2, "ping", json!("pong")));
        correlator.dispatch(success(1, "get_config", json!({"broker_address": "0xb"})));

        let b = correlator
            .await_response(2, "ping", rx_b, Duration::from_secs(1))
            .await
            .unwrap();
        let a = correlator
            .await_response(1, "get_config", rx_a, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(b, json!("pong"));
        assert_eq!(a["broker_address"], "0xb");
    }

    #[tokio::test]
    async fn test_fail_all_drains_registry() {
        let correlator = RequestCorrelator::new();
        let rx_a = correlator.register(1, "ping");
        let rx_b = correlator.register(2, "ping");

        correlator.fail_all("disconnecting");
        assert_eq!(correlator.outstanding(), 0);

        for rx in [rx_a, rx_b] {
            let err = correlator
                .await_response(0, "ping", rx, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::Connection(_)));
        }
    }
}
