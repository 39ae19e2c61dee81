//! Periodic liveness probes on the open control channel.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::correlator::RequestCorrelator;
use crate::signer::SessionKey;
use crate::transport::Transport;
use channel_wire::{method, Request};

/// Spawn the keepalive loop.
///
/// Emits a `ping` request every `interval` while the transport reports
/// open. The open flag is re-checked immediately before each emission so a
/// probe is never queued against a closed or closing transport. No pending
/// entry is registered — the broker does not answer pings. The returned
/// handle is aborted synchronously as part of disconnect and of
/// failed-connect cleanup.
pub fn spawn(
    transport: Arc<Transport>,
    correlator: Arc<RequestCorrelator>,
    session_key: Arc<SessionKey>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; the first probe waits one period
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if !transport.is_open() {
                debug!("keepalive stopping: transport closed");
                break;
            }

            let request = Request::new(correlator.next_id(), method::PING, json!({}));
            let signature = session_key.sign(request.body().to_string().as_bytes());
            if transport.send(request.encode(&[signature])).is_err() {
                debug!("keepalive stopping: send failed");
                break;
            }
            debug!("sent keepalive ping (id: {})", request.id);
        }
    })
}
