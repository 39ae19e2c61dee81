//! Liveness probe and message-stream transport for the control channel.
//!
//! The transport owns the write half of one WebSocket connection behind a
//! channel-fed writer task; the read half is handed to the connection
//! actor's receive loop. An atomic open flag lets other tasks (keepalive,
//! receive loop) observe and flip the transport state without locking.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::ClientError;

/// Read half of the control channel, consumed by the receive loop.
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long the probe waits before it is considered inconclusive.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame counters for one transport.
#[derive(Debug, Default)]
pub struct TransportStats {
    frames_out: AtomicU64,
    frames_in: AtomicU64,
}

impl TransportStats {
    /// Record one outbound frame.
    pub fn record_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one inbound frame.
    pub fn record_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Current (outbound, inbound) frame counts.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.frames_out.load(Ordering::Relaxed),
            self.frames_in.load(Ordering::Relaxed),
        )
    }
}

/// Probe the endpoint out of band before opening the stream.
///
/// Only an explicit HTTP 503 is treated as the service being down; probe
/// transport failures are inconclusive and do not block the open, since the
/// stream endpoint may be reachable when the probe path is not.
pub async fn probe(endpoint: &str) -> Result<(), ClientError> {
    let url = probe_url(endpoint);
    let client = reqwest::Client::new();
    match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) if resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
            warn!("liveness probe: {} reports service unavailable", url);
            Err(ClientError::ServiceDown)
        }
        Ok(resp) => {
            debug!("liveness probe: {} answered {}", url, resp.status());
            Ok(())
        }
        Err(e) => {
            debug!("liveness probe inconclusive for {}: {}", url, e);
            Ok(())
        }
    }
}

/// Map a stream endpoint to its probe URL (`wss://` to `https://`,
/// `ws://` to `http://`).
fn probe_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        endpoint.to_string()
    }
}

/// One open control-channel connection.
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    stats: Arc<TransportStats>,
}

impl Transport {
    /// Open the stream against `endpoint`, failing with
    /// [`ClientError::ConnectionTimeout`] if no ready signal arrives within
    /// `open_timeout`. On failure nothing is left running.
    pub async fn open(
        endpoint: &str,
        open_timeout: Duration,
    ) -> Result<(Self, WsStream), ClientError> {
        let (ws, _response) = tokio::time::timeout(open_timeout, connect_async(endpoint))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)?
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        debug!("control channel open to {}", endpoint);

        let (sink, stream) = ws.split();
        let open = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(TransportStats::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            Arc::clone(&open),
            Arc::clone(&stats),
        ));

        Ok((
            Self {
                outbound,
                open,
                writer,
                stats,
            },
            stream,
        ))
    }

    /// Queue a text frame for sending.
    pub fn send(&self, frame: String) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::Connection("transport is closed".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Connection("writer task gone".to_string()))
    }

    /// Whether the transport currently reports open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Shared open flag for tasks that must observe or flip transport state.
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    /// Shared frame counters.
    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Mark the transport closed and stop the writer task.
    ///
    /// The caller aborts its receive loop first, so no event consumer
    /// remains attached to the old stream when a reconnect opens a new one.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.writer.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.writer.abort();
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        match sink.send(Message::Text(frame.into())).await {
            Ok(()) => stats.record_out(),
            Err(e) => {
                warn!("control channel write failed: {}", e);
                open.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    let _ = sink.close().await;
}
