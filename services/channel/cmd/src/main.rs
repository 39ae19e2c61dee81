//! Channel client binary.
//!
//! Connects to a settlement broker, authenticates with a dev wallet
//! signer, and drives a session flow (create, submit actions, settle)
//! from the command line.

use anyhow::Result;
use channel_session::{Action, BrokerClient, ClientConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod wallet;

use config::ChannelConfig;
use wallet::DevWalletSigner;

/// Control-channel client for the clearway settlement broker
#[derive(Parser, Debug)]
#[command(name = "clearway-channel", version, about = "Settlement broker session client")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "clearway.yaml")]
    config: PathBuf,

    /// Broker endpoint, e.g. wss://broker.example/ws (overrides config)
    #[arg(long)]
    endpoint: Option<String>,

    /// Principal address to authenticate as
    #[arg(long)]
    principal: String,

    /// Dev wallet secret used to sign the auth challenge
    #[arg(long, default_value = "dev-secret", env = "CLEARWAY_WALLET_SECRET")]
    wallet_secret: String,

    /// Probe the endpoint and exit without opening the stream
    #[arg(long)]
    probe_only: bool,

    /// Action to submit (repeatable), as KIND=COST_SAVED,
    /// e.g. UPGRADE_BUILDING=0.4
    #[arg(long = "action")]
    actions: Vec<String>,

    /// Leave the session open instead of settling at the end
    #[arg(long)]
    no_settle: bool,

    /// Transport open deadline, e.g. 10s
    #[arg(long, default_value = "10s")]
    open_timeout: humantime::Duration,

    /// Keepalive interval, e.g. 30s
    #[arg(long, default_value = "30s")]
    ping_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_action(spec: &str) -> Result<Action> {
    let (kind, cost) = spec.split_once('=').unwrap_or((spec, "0"));
    let cost: f64 = cost
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid cost in action spec '{}'", spec))?;
    Ok(Action::new(kind, serde_json::json!({}), cost))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut file_config = ChannelConfig::load_from_file(&args.config)?;
    if let Some(endpoint) = args.endpoint {
        file_config.endpoint = endpoint;
    }

    if args.probe_only {
        channel_session::probe(&file_config.endpoint).await?;
        info!("{} is reachable", file_config.endpoint);
        return Ok(());
    }

    let client_config = ClientConfig {
        endpoint: file_config.endpoint,
        application: file_config.application,
        scope: file_config.scope,
        allowance: file_config.allowance,
        asset: file_config.asset,
        session_amount: file_config.session_amount,
        request_timeout: Duration::from_secs(file_config.timeout as u64),
        open_timeout: args.open_timeout.into(),
        ping_interval: args.ping_interval.into(),
        ..ClientConfig::default()
    };

    let wallet = Arc::new(DevWalletSigner::new(&args.principal, &args.wallet_secret));
    let client = BrokerClient::new(client_config).with_wallet(wallet);

    let mut snapshots = client.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            info!(
                "state: connected={} session={:?} actions={} saved={:.2}",
                snapshot.connected, snapshot.session_id, snapshot.action_count, snapshot.cost_saved
            );
        }
    });

    client.connect().await?;

    let session_id = client.create_session().await?;
    info!("application session {} open", session_id);

    for spec in &args.actions {
        let action = parse_action(spec)?;
        let kind = action.kind.clone();
        match client.submit_action(action).await {
            Ok(version) => info!("{} confirmed at version {}", kind, version),
            Err(e) => warn!("{} not confirmed: {}", kind, e),
        }
    }

    if !args.no_settle {
        client.settle(None).await?;
        info!("session settled; connection remains open for a new session");
    }

    if let Some((frames_out, frames_in)) = client.transport_stats().await {
        info!("transport frames: {} out, {} in", frames_out, frames_in);
    }

    client.disconnect().await;
    printer.abort();

    Ok(())
}
