//! Application session state and the action ledger.
//!
//! The connection actor owns exactly one [`AppSession`]; at most one may be
//! active per connection. The version counter only advances after the
//! broker confirms a mutation, so a rejected or timed-out submission leaves
//! the whole structure untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A state-mutating action submitted against the application session.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action type label, e.g. `UPGRADE_BUILDING`
    pub kind: String,
    /// Opaque payload forwarded to the broker as session data
    pub payload: Value,
    /// Estimated on-chain cost this action avoided
    pub cost_saved: f64,
}

impl Action {
    /// Create an action.
    pub fn new(kind: &str, payload: Value, cost_saved: f64) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            cost_saved,
        }
    }
}

/// A per-participant balance entry within an application session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Participant address
    pub participant: String,
    /// Asset symbol
    pub asset: String,
    /// Decimal amount, kept as a string end to end
    pub amount: String,
}

impl Allocation {
    /// Create an allocation entry.
    pub fn new(participant: &str, asset: &str, amount: &str) -> Self {
        Self {
            participant: participant.to_string(),
            asset: asset.to_string(),
            amount: amount.to_string(),
        }
    }
}

/// Running tallies of confirmed actions.
///
/// `action_count` and `breakdown` are scoped to one session: settlement
/// clears them and the next created session starts them fresh, but a bare
/// disconnect leaves them readable for display. `cost_saved` accumulates
/// across sessions for the lifetime of the client.
#[derive(Debug, Clone, Default)]
pub struct ActionLedger {
    /// Confirmed actions in the current session
    pub action_count: u64,
    /// Cumulative estimated cost avoided across sessions
    pub cost_saved: f64,
    /// Confirmed action count per action type
    pub breakdown: HashMap<String, u64>,
}

impl ActionLedger {
    fn record(&mut self, action: &Action) {
        self.action_count += 1;
        self.cost_saved += action.cost_saved;
        *self.breakdown.entry(action.kind.clone()).or_insert(0) += 1;
    }

    fn reset_session_tallies(&mut self) {
        self.action_count = 0;
        self.breakdown.clear();
    }
}

/// Application session state owned by the connection actor.
#[derive(Debug, Default)]
pub struct AppSession {
    /// Broker-assigned session id, present while a session exists
    pub id: Option<String>,
    /// Monotonic state version; advances only on confirmed mutations
    pub version: u64,
    /// Whether a session is currently active
    pub active: bool,
    /// Amount of the principal's initial allocation
    pub initial_amount: String,
    /// Confirmed-action tallies
    pub ledger: ActionLedger,
}

impl AppSession {
    /// Adopt a broker-created session, taking the version the broker
    /// returned rather than assuming one.
    pub fn open(&mut self, id: String, version: u64, initial_amount: String) {
        self.id = Some(id);
        self.version = version;
        self.active = true;
        self.initial_amount = initial_amount;
        self.ledger.reset_session_tallies();
    }

    /// Record a broker-confirmed state update.
    pub fn confirm_action(&mut self, action: &Action, next_version: u64) {
        self.version = next_version;
        self.ledger.record(action);
    }

    /// Close after settlement. The per-session tallies reset; the
    /// cumulative cost-saved figure survives.
    pub fn settle(&mut self) {
        self.id = None;
        self.version = 0;
        self.active = false;
        self.ledger.reset_session_tallies();
    }

    /// Drop connection-scoped state on disconnect, keeping all tallies
    /// readable for settlement display.
    pub fn on_disconnect(&mut self) {
        self.id = None;
        self.active = false;
    }
}
