//! Snapshot fan-out to registered observers.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Externally observable client state, published after every transition.
///
/// Every published snapshot is an owned value copy; observers can neither
/// see nor affect the client's internal state through it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    /// Whether the control channel is open and authenticated
    pub connected: bool,
    /// Whether an application session is active
    pub session_active: bool,
    /// Broker-assigned session id, if a session exists
    pub session_id: Option<String>,
    /// Confirmed actions in the current session
    pub action_count: u64,
    /// Cumulative estimated cost avoided
    pub cost_saved: f64,
    /// Confirmed action count per action type
    pub action_breakdown: HashMap<String, u64>,
}

/// Fan-out publisher for [`ClientSnapshot`] values.
///
/// Each subscriber gets its own unbounded channel; subscribers whose
/// receiver has been dropped are pruned on the next publish.
pub struct SnapshotBroadcaster {
    subscribers: RwLock<Vec<mpsc::UnboundedSender<ClientSnapshot>>>,
}

impl SnapshotBroadcaster {
    /// Create a broadcaster with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer; the receiver yields one value copy per
    /// published transition.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver a snapshot to every live observer.
    pub fn publish(&self, snapshot: ClientSnapshot) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
