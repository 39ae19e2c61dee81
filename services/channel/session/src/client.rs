//! The broker connection actor.
//!
//! [`BrokerClient`] owns the transport, the pending-request registry, the
//! handshake state and the application session, and serializes every
//! protocol operation: version-affecting submissions run one at a time
//! behind the session lock, while independent round trips (configuration
//! fetches, pings) may overlap and are matched by request id.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthCredential, AuthParams, AuthStage, BrokerIdentity};
use crate::broadcast::{ClientSnapshot, SnapshotBroadcaster};
use crate::correlator::RequestCorrelator;
use crate::error::ClientError;
use crate::keepalive;
use crate::session::{Action, Allocation, AppSession};
use crate::signer::{SessionKey, WalletSigner};
use crate::transport::{self, Transport, TransportStats, WsStream};
use channel_wire::{method, Envelope, Request};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker control-channel endpoint, e.g. `wss://broker.example/ws`
    pub endpoint: String,
    /// Application name, also the signing domain for the auth challenge
    pub application: String,
    /// Permission scope requested during authentication
    pub scope: String,
    /// Spending allowance cap declared during authentication
    pub allowance: String,
    /// Asset symbol used for session allocations
    pub asset: String,
    /// Principal's initial allocation amount for new sessions
    pub session_amount: String,
    /// Lifetime of the session authorization
    pub auth_ttl: Duration,
    /// Deadline for the transport ready signal
    pub open_timeout: Duration,
    /// Per-request response deadline
    pub request_timeout: Duration,
    /// Keepalive probe interval
    pub ping_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".to_string(),
            application: "clearway".to_string(),
            scope: "app.create".to_string(),
            allowance: "0".to_string(),
            asset: "usdc".to_string(),
            session_amount: "0".to_string(),
            auth_ttl: Duration::from_secs(3600),
            open_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Everything owned by one open connection. Dropped as a unit on
/// disconnect, which also discards the session key and credential.
struct Connection {
    transport: Arc<Transport>,
    correlator: Arc<RequestCorrelator>,
    session_key: Arc<SessionKey>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
    stage: AuthStage,
    broker: Option<BrokerIdentity>,
    credential: Option<AuthCredential>,
}

/// Cloned handles for one round trip, taken without holding the
/// connection lock across the await.
struct ConnHandles {
    transport: Arc<Transport>,
    correlator: Arc<RequestCorrelator>,
    session_key: Arc<SessionKey>,
    principal: String,
    broker: String,
}

/// Session protocol client for a settlement broker.
pub struct BrokerClient {
    config: ClientConfig,
    wallet: Option<Arc<dyn WalletSigner>>,
    conn: Mutex<Option<Connection>>,
    session: Arc<Mutex<AppSession>>,
    connected: Arc<AtomicBool>,
    broadcaster: Arc<SnapshotBroadcaster>,
}

impl BrokerClient {
    /// Create a client. No connection is opened until [`connect`] is
    /// called.
    ///
    /// [`connect`]: BrokerClient::connect
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            wallet: None,
            conn: Mutex::new(None),
            session: Arc::new(Mutex::new(AppSession::default())),
            connected: Arc::new(AtomicBool::new(false)),
            broadcaster: Arc::new(SnapshotBroadcaster::new()),
        }
    }

    /// Attach the wallet capability the handshake verifies against.
    pub fn with_wallet(mut self, wallet: Arc<dyn WalletSigner>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Register a snapshot observer.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientSnapshot> {
        self.broadcaster.subscribe()
    }

    /// Whether the control channel is currently open and authenticated.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frame counters for the current connection, if one is open.
    pub async fn transport_stats(&self) -> Option<(u64, u64)> {
        let guard = self.conn.lock().await;
        guard.as_ref().map(|c| c.transport.stats().snapshot())
    }

    /// The current externally observable state.
    pub async fn snapshot(&self) -> ClientSnapshot {
        let session = self.session.lock().await;
        snapshot_of(self.connected.load(Ordering::SeqCst), &session)
    }

    /// Connect to the broker and run the authentication handshake.
    ///
    /// Idempotent: a second call while a connection is open or an open is
    /// in flight awaits the in-flight attempt and opens no second
    /// transport. On any failure every partially initialized resource is
    /// torn down before the error surfaces, so a retry starts clean.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let wallet = self
            .wallet
            .clone()
            .ok_or(ClientError::WalletNotConnected)?;
        let principal = wallet.address();
        if principal.is_empty() {
            return Err(ClientError::WalletNotConnected);
        }

        // The lock is held for the whole attempt: a concurrent connect
        // parks here, then observes the open connection and becomes a
        // no-op instead of opening a second transport.
        let mut conn_guard = self.conn.lock().await;
        if let Some(conn) = conn_guard.as_ref() {
            if conn.transport.is_open() {
                debug!("connect: already connected");
                return Ok(());
            }
        }
        // A previous connection lost its stream; tear it down before
        // opening a new one so the failed transport is never reused.
        if let Some(stale) = conn_guard.take() {
            teardown(stale, "reconnecting");
        }

        transport::probe(&self.config.endpoint).await?;

        let (transport, stream) =
            Transport::open(&self.config.endpoint, self.config.open_timeout).await?;
        let transport = Arc::new(transport);
        let correlator = Arc::new(RequestCorrelator::new());
        let session_key = Arc::new(SessionKey::generate());

        let reader = spawn_receive_loop(
            stream,
            Arc::clone(&correlator),
            transport.open_flag(),
            transport.stats(),
            Arc::clone(&self.connected),
            Arc::clone(&self.session),
            Arc::clone(&self.broadcaster),
        );
        let keepalive = keepalive::spawn(
            Arc::clone(&transport),
            Arc::clone(&correlator),
            Arc::clone(&session_key),
            self.config.ping_interval,
        );

        let mut conn = Connection {
            transport,
            correlator,
            session_key,
            reader,
            keepalive,
            stage: AuthStage::Disconnected,
            broker: None,
            credential: None,
        };

        match self.handshake(&mut conn, wallet.as_ref(), &principal).await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                *conn_guard = Some(conn);
                drop(conn_guard);
                info!("connected to {} as {}", self.config.endpoint, principal);
                self.publish_snapshot().await;
                Ok(())
            }
            Err(e) => {
                conn.stage = AuthStage::Failed;
                teardown(conn, "connect failed");
                warn!("connect to {} failed: {}", self.config.endpoint, e);
                Err(e)
            }
        }
    }

    /// Drive the four handshake steps on a fresh connection.
    async fn handshake(
        &self,
        conn: &mut Connection,
        wallet: &dyn WalletSigner,
        principal: &str,
    ) -> Result<(), ClientError> {
        let auth_params = AuthParams {
            application: self.config.application.clone(),
            scope: self.config.scope.clone(),
            allowance: self.config.allowance.clone(),
            expire: now_secs() + self.config.auth_ttl.as_secs(),
        };

        // 1. Learn who we settle against.
        let result = self
            .round_trip_on(conn, method::GET_CONFIG, method::GET_CONFIG, json!({}))
            .await?;
        conn.broker = Some(auth::config_identity(&result)?);
        conn.stage = AuthStage::ConfigFetched;

        // 2. Declare the session identity; the broker answers with a
        //    challenge under its own method name.
        let request_params =
            auth::auth_request_params(principal, conn.session_key.address(), &auth_params);
        let challenge = self
            .round_trip_on(
                conn,
                method::AUTH_REQUEST,
                method::AUTH_CHALLENGE,
                request_params,
            )
            .await?;
        conn.stage = AuthStage::ChallengeIssued;

        // 3. Sign under the application-scoped domain and verify.
        let payload =
            auth::challenge_payload(conn.session_key.address(), &auth_params, &challenge);
        let signature = wallet
            .sign_challenge(&self.config.application, &payload)
            .await?;
        let result = self
            .round_trip_on(
                conn,
                method::AUTH_VERIFY,
                method::AUTH_VERIFY,
                auth::verify_params(principal, &challenge, &signature),
            )
            .await?;

        // 4. Adopt the credential.
        conn.credential = Some(auth::verification_outcome(principal, &result)?);
        conn.stage = AuthStage::Authenticated;
        debug!("handshake complete for {}", principal);
        Ok(())
    }

    /// Create an application session. Requires an authenticated
    /// connection and no session currently active.
    pub async fn create_session(&self) -> Result<String, ClientError> {
        let handles = self.handles().await?;

        let mut session = self.session.lock().await;
        if session.active {
            return Err(ClientError::SessionActive);
        }

        let allocations = self.two_party_allocations(
            &handles.principal,
            &handles.broker,
            &self.config.session_amount,
        );
        let params = json!({
            "definition": {
                "application": self.config.application,
                "participants": [handles.principal, handles.broker],
            },
            "allocations": allocations,
        });

        let result = round_trip(
            &handles,
            method::CREATE_APP_SESSION,
            method::CREATE_APP_SESSION,
            params,
            self.config.request_timeout,
        )
        .await?;

        let id = result
            .get("app_session_id")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingField("app_session_id"))?
            .to_string();
        // The broker owns the version sequence; adopt what it returned.
        let version = result
            .get("version")
            .and_then(Value::as_u64)
            .ok_or(ClientError::MissingField("version"))?;

        session.open(id.clone(), version, self.config.session_amount.clone());
        drop(session);

        info!("application session {} created at version {}", id, version);
        self.publish_snapshot().await;
        Ok(id)
    }

    /// Submit a state-mutating action against the active session.
    ///
    /// Only a broker-confirmed submission advances the version and the
    /// ledger; a rejected or timed-out one leaves both untouched. Returns
    /// the confirmed version.
    pub async fn submit_action(&self, action: Action) -> Result<u64, ClientError> {
        // Session lock held across the round trip: concurrent submissions
        // must not compute the same next version from a stale base.
        let mut session = self.session.lock().await;
        if !session.active {
            return Err(ClientError::NoActiveSession);
        }
        let session_id = session
            .id
            .clone()
            .ok_or(ClientError::NoActiveSession)?;
        let handles = self.handles().await?;

        let next_version = session.version + 1;
        // Actions do not reallocate funds; the allocation shape is
        // resubmitted unchanged alongside the opaque session data.
        let allocations = self.two_party_allocations(
            &handles.principal,
            &handles.broker,
            &session.initial_amount,
        );
        let params = json!({
            "app_session_id": session_id,
            "intent": "operate",
            "version": next_version,
            "allocations": allocations,
            "session_data": {
                "type": action.kind,
                "data": action.payload,
            },
        });

        let result = round_trip(
            &handles,
            method::SUBMIT_APP_STATE,
            method::SUBMIT_APP_STATE,
            params,
            self.config.request_timeout,
        )
        .await;

        match result {
            Ok(_) => {
                session.confirm_action(&action, next_version);
                drop(session);
                debug!(
                    "action {} confirmed at version {}",
                    action.kind, next_version
                );
                self.publish_snapshot().await;
                Ok(next_version)
            }
            Err(e) => {
                // version, counters and breakdown stay exactly as they were
                debug!("action {} not confirmed: {}", action.kind, e);
                Err(e)
            }
        }
    }

    /// Close the active session and trigger settlement.
    ///
    /// Without explicit final allocations the full initial allocation
    /// returns to the principal. The control channel stays open and
    /// authenticated; a new session can be created without reconnecting.
    pub async fn settle(
        &self,
        final_allocations: Option<Vec<Allocation>>,
    ) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if !session.active {
            return Err(ClientError::NoActiveSession);
        }
        let session_id = session
            .id
            .clone()
            .ok_or(ClientError::NoActiveSession)?;
        let handles = self.handles().await?;

        let allocations = final_allocations.unwrap_or_else(|| {
            self.two_party_allocations(
                &handles.principal,
                &handles.broker,
                &session.initial_amount,
            )
        });
        let params = json!({
            "app_session_id": session_id,
            "allocations": allocations,
        });

        round_trip(
            &handles,
            method::CLOSE_APP_SESSION,
            method::CLOSE_APP_SESSION,
            params,
            self.config.request_timeout,
        )
        .await?;

        session.settle();
        drop(session);

        info!("application session {} settled", session_id);
        self.publish_snapshot().await;
        Ok(())
    }

    /// Tear down the connection from any state.
    ///
    /// Cancels the keepalive, detaches the reader from the stream, fails
    /// outstanding requests and discards the session key and credential.
    /// The action tallies survive for settlement display.
    pub async fn disconnect(&self) {
        let mut conn_guard = self.conn.lock().await;
        if let Some(conn) = conn_guard.take() {
            teardown(conn, "client disconnect");
            info!("disconnected from {}", self.config.endpoint);
        }
        self.connected.store(false, Ordering::SeqCst);
        drop(conn_guard);

        let mut session = self.session.lock().await;
        session.on_disconnect();
        drop(session);

        self.publish_snapshot().await;
    }

    /// Clone the per-round-trip handles of the authenticated connection.
    async fn handles(&self) -> Result<ConnHandles, ClientError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(ClientError::NotAuthenticated)?;
        if conn.stage != AuthStage::Authenticated {
            return Err(ClientError::NotAuthenticated);
        }
        let principal = conn
            .credential
            .as_ref()
            .ok_or(ClientError::NotAuthenticated)?
            .principal
            .clone();
        let broker = conn
            .broker
            .as_ref()
            .ok_or(ClientError::NotAuthenticated)?
            .address
            .clone();
        Ok(ConnHandles {
            transport: Arc::clone(&conn.transport),
            correlator: Arc::clone(&conn.correlator),
            session_key: Arc::clone(&conn.session_key),
            principal,
            broker,
        })
    }

    /// One round trip on a connection still being handshaken.
    async fn round_trip_on(
        &self,
        conn: &Connection,
        method: &str,
        expected: &str,
        params: Value,
    ) -> Result<Value, ClientError> {
        let handles = ConnHandles {
            transport: Arc::clone(&conn.transport),
            correlator: Arc::clone(&conn.correlator),
            session_key: Arc::clone(&conn.session_key),
            principal: String::new(),
            broker: String::new(),
        };
        round_trip(&handles, method, expected, params, self.config.request_timeout).await
    }

    /// The two-party allocation shape: the principal holds the amount,
    /// the broker side starts empty.
    fn two_party_allocations(
        &self,
        principal: &str,
        broker: &str,
        amount: &str,
    ) -> Vec<Allocation> {
        vec![
            Allocation::new(principal, &self.config.asset, amount),
            Allocation::new(broker, &self.config.asset, "0"),
        ]
    }

    async fn publish_snapshot(&self) {
        let snapshot = self.snapshot().await;
        self.broadcaster.publish(snapshot);
    }
}

/// Register, sign, send and await one request.
async fn round_trip(
    handles: &ConnHandles,
    method: &str,
    expected: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, ClientError> {
    let id = handles.correlator.next_id();
    let rx = handles.correlator.register(id, expected);

    let request = Request::new(id, method, params);
    let signature = handles
        .session_key
        .sign(request.body().to_string().as_bytes());
    if let Err(e) = handles.transport.send(request.encode(&[signature])) {
        handles.correlator.unregister(id);
        return Err(e);
    }

    handles
        .correlator
        .await_response(id, method, rx, deadline)
        .await
}

/// Consume the read half of the stream, dispatching envelopes by id.
///
/// A malformed frame is logged and dropped; it never terminates the loop.
/// Stream loss flips the open/connected flags, fails every outstanding
/// request and publishes a disconnected snapshot.
fn spawn_receive_loop(
    mut stream: WsStream,
    correlator: Arc<RequestCorrelator>,
    open: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    connected: Arc<AtomicBool>,
    session: Arc<Mutex<AppSession>>,
    broadcaster: Arc<SnapshotBroadcaster>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Text(text)) => {
                    stats.record_in();
                    match Envelope::decode(text.as_str()) {
                        Ok(envelope) => correlator.dispatch(envelope),
                        Err(e) => warn!("dropping malformed frame: {}", e),
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("broker closed the stream");
                    break;
                }
                Ok(_) => {
                    // binary and control frames are not part of the protocol
                }
                Err(e) => {
                    warn!("control channel read error: {}", e);
                    break;
                }
            }
        }

        open.store(false, Ordering::SeqCst);
        let was_connected = connected.swap(false, Ordering::SeqCst);
        correlator.fail_all("connection lost");
        if was_connected {
            let snapshot = {
                let session = session.lock().await;
                snapshot_of(false, &session)
            };
            broadcaster.publish(snapshot);
        }
    })
}

/// Abort a connection's tasks and fail its outstanding requests.
///
/// Order matters: the keepalive stops before the transport flips closed so
/// no probe lands on a closing stream, and the reader detaches before the
/// socket drops so a reconnect cannot receive stray events from the old
/// stream.
fn teardown(conn: Connection, reason: &str) {
    conn.keepalive.abort();
    conn.reader.abort();
    conn.correlator.fail_all(reason);
    conn.transport.close();
}

fn snapshot_of(connected: bool, session: &AppSession) -> ClientSnapshot {
    ClientSnapshot {
        connected,
        session_active: session.active,
        session_id: session.id.clone(),
        action_count: session.ledger.action_count,
        cost_saved: session.ledger.cost_saved,
        action_breakdown: session.ledger.breakdown.clone(),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
