//! Decision records awaiting feedback
//!
//! Every routing decision is recorded once, immutable after creation,
//! and resolved at most once by a later feedback event. A second
//! resolution attempt for the same request id is rejected so outcomes
//! are never double-counted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::routing::policy::RankedAction;
use crate::routing::state::StateKey;

/// Immutable record of one routing choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Request id this decision answers; feedback references it
    pub request_id: String,
    /// Derived state the decision was made in
    pub state_key: StateKey,
    /// Chosen agent
    pub agent_id: String,
    /// Ranked alternatives that were considered
    pub alternatives: Vec<RankedAction>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Time spent making the decision, in milliseconds
    pub latency_ms: u64,
    /// Strategy that produced the decision
    pub strategy: String,
    /// Whether the selection was an exploration choice
    pub explored: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Log of decisions keyed by request id, with resolve-at-most-once
/// semantics
#[derive(Default)]
pub struct DecisionLog {
    entries: RwLock<HashMap<String, Entry>>,
}

struct Entry {
    record: DecisionRecord,
    resolved: bool,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new decision
    pub async fn insert(&self, record: DecisionRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(
            record.request_id.clone(),
            Entry {
                record,
                resolved: false,
            },
        );
    }

    /// Resolve a decision, returning its record. Fails with
    /// [`Error::UnknownRequest`] when the request id is unknown or the
    /// decision was already resolved.
    pub async fn resolve(&self, request_id: &str) -> Result<DecisionRecord> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| Error::UnknownRequest(request_id.to_string()))?;
        if entry.resolved {
            return Err(Error::UnknownRequest(request_id.to_string()));
        }
        entry.resolved = true;
        Ok(entry.record.clone())
    }

    /// Look up a decision without resolving it
    pub async fn get(&self, request_id: &str) -> Option<DecisionRecord> {
        let entries = self.entries.read().await;
        entries.get(request_id).map(|e| e.record.clone())
    }

    /// Number of recorded decisions (resolved included)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of decisions still awaiting feedback
    pub async fn pending_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.resolved).count()
    }
}
