//! Broker connection lifecycle, auth handshake, request correlation, session state machine, and keepalive.
//!
//! This crate implements the session protocol client for a settlement
//! broker: it opens an authenticated control channel, operates a versioned
//! off-chain application session over it, and closes the session to
//! trigger settlement.
//!
//! ## Features
//!
//! - **Transport**: liveness probe plus WebSocket open/close with a ready
//!   deadline and idempotent connect
//! - **Request Correlation**: id-keyed pending registry with per-request
//!   timeouts; responses match by id, not arrival order
//! - **Authentication**: config fetch, challenge, wallet signature,
//!   verification
//! - **Session State Machine**: create/submit/settle with a
//!   broker-confirmed version counter and an action ledger
//! - **Keepalive**: periodic pings while the transport is open
//! - **Snapshots**: immutable state copies fanned out after every
//!   transition
//!
//! ## Example
//!
//! ```rust,no_run
//! use channel_session::{Action, BrokerClient, ClientConfig, WalletSigner};
//! use std::sync::Arc;
//!
//! # async fn example(wallet: Arc<dyn WalletSigner>) -> Result<(), channel_session::ClientError> {
//! let config = ClientConfig {
//!     endpoint: "wss://broker.example/ws".to_string(),
//!     ..ClientConfig::default()
//! };
//! let client = BrokerClient::new(config).with_wallet(wallet);
//!
//! let mut snapshots = client.subscribe();
//! tokio::spawn(async move {
//!     while let Some(snapshot) = snapshots.recv().await {
//!         println!("actions: {} saved: {}", snapshot.action_count, snapshot.cost_saved);
//!     }
//! });
//!
//! client.connect().await?;
//! client.create_session().await?;
//! client
//!     .submit_action(Action::new(
//!         "UPGRADE_BUILDING",
//!         serde_json::json!({"building": "mine"}),
//!         0.4,
//!     ))
//!     .await?;
//! client.settle(None).await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod correlator;
pub mod error;
pub mod keepalive;
pub mod session;
pub mod signer;
pub mod transport;

// Re-export main types
pub use auth::{AuthCredential, AuthParams, AuthStage, BrokerIdentity};
pub use broadcast::{ClientSnapshot, SnapshotBroadcaster};
pub use client::{BrokerClient, ClientConfig};
pub use correlator::RequestCorrelator;
pub use error::ClientError;
pub use session::{Action, ActionLedger, Allocation, AppSession};
pub use signer::{SessionKey, WalletSigner};
pub use transport::{probe, Transport, TransportStats};
