//! Agent registry
//!
//! Holds the candidate handling agents, their capability tags, and
//! rolling performance counters. Eligibility listings are returned in
//! registration order, which is the deterministic tie-break order the
//! routing policy relies on. Counters are atomics so concurrent outcome
//! recordings for the same agent never lose an increment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};

/// Agent availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// Point-in-time snapshot of one agent's registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub status: AgentStatus,
    pub tags: Vec<String>,
    pub requests: u64,
    pub successes: u64,
    pub total_latency_ms: u64,
}

impl AgentRecord {
    /// Fraction of recorded outcomes that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.successes as f64 / self.requests as f64
    }

    /// Mean latency across recorded outcomes, in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.requests as f64
    }
}

struct AgentSlot {
    id: String,
    tags: Vec<String>,
    active: AtomicBool,
    requests: AtomicU64,
    successes: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl AgentSlot {
    fn snapshot(&self) -> AgentRecord {
        AgentRecord {
            id: self.id.clone(),
            status: if self.active.load(Ordering::Relaxed) {
                AgentStatus::Active
            } else {
                AgentStatus::Inactive
            },
            tags: self.tags.clone(),
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Registry of candidate handling agents
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<AgentSlot>>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent with its capability tags. Registering an
    /// existing id replaces its tags and reactivates it, keeping its
    /// position and counters.
    pub async fn register(&self, id: impl Into<String>, tags: Vec<String>) {
        let id = id.into();
        let mut agents = self.agents.write().await;
        match agents.iter().position(|a| a.id == id) {
            Some(index) => {
                // Tags are immutable per slot; re-registration with new
                // tags replaces the slot in place.
                let slot = &agents[index];
                let refreshed = Arc::new(AgentSlot {
                    id,
                    tags,
                    active: AtomicBool::new(true),
                    requests: AtomicU64::new(slot.requests.load(Ordering::Relaxed)),
                    successes: AtomicU64::new(slot.successes.load(Ordering::Relaxed)),
                    total_latency_ms: AtomicU64::new(slot.total_latency_ms.load(Ordering::Relaxed)),
                });
                agents[index] = refreshed;
            }
            None => {
                info!(agent = %id, "registered agent");
                agents.push(Arc::new(AgentSlot {
                    id,
                    tags,
                    active: AtomicBool::new(true),
                    requests: AtomicU64::new(0),
                    successes: AtomicU64::new(0),
                    total_latency_ms: AtomicU64::new(0),
                }));
            }
        }
    }

    /// List active agents whose tags are a superset of `required_tags`,
    /// in registration order.
    pub async fn list_eligible(&self, required_tags: &[String]) -> Vec<String> {
        let agents = self.agents.read().await;
        agents
            .iter()
            .filter(|a| a.active.load(Ordering::Relaxed))
            .filter(|a| required_tags.iter().all(|t| a.tags.contains(t)))
            .map(|a| a.id.clone())
            .collect()
    }

    /// Record the outcome of a completed request for an agent.
    ///
    /// Increments are atomic; concurrent recordings for the same agent
    /// never lose an update. An agent deactivated while in flight may
    /// still have its outcome recorded.
    pub async fn record_outcome(&self, id: &str, success: bool, latency_ms: u64) -> Result<()> {
        let slot = self.slot(id).await?;
        slot.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            slot.successes.fetch_add(1, Ordering::Relaxed);
        }
        slot.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        Ok(())
    }

    /// Make an agent eligible for selection again
    pub async fn activate(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        slot.active.store(true, Ordering::Relaxed);
        info!(agent = %id, "agent activated");
        Ok(())
    }

    /// Remove an agent from eligibility. Decisions already made for it
    /// are allowed to complete.
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        slot.active.store(false, Ordering::Relaxed);
        info!(agent = %id, "agent deactivated");
        Ok(())
    }

    /// Snapshot of a single agent
    pub async fn get(&self, id: &str) -> Option<AgentRecord> {
        let agents = self.agents.read().await;
        agents.iter().find(|a| a.id == id).map(|a| a.snapshot())
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Number of active agents
    pub async fn active_count(&self) -> usize {
        let agents = self.agents.read().await;
        agents
            .iter()
            .filter(|a| a.active.load(Ordering::Relaxed))
            .count()
    }

    /// Export all records, in registration order
    pub async fn export_state(&self) -> Vec<AgentRecord> {
        let agents = self.agents.read().await;
        agents.iter().map(|a| a.snapshot()).collect()
    }

    /// Replace registry contents from exported records
    pub async fn import_state(&self, records: Vec<AgentRecord>) {
        let mut agents = self.agents.write().await;
        *agents = records
            .into_iter()
            .map(|r| {
                Arc::new(AgentSlot {
                    id: r.id,
                    tags: r.tags,
                    active: AtomicBool::new(r.status == AgentStatus::Active),
                    requests: AtomicU64::new(r.requests),
                    successes: AtomicU64::new(r.successes),
                    total_latency_ms: AtomicU64::new(r.total_latency_ms),
                })
            })
            .collect();
    }

    async fn slot(&self, id: &str) -> Result<Arc<AgentSlot>> {
        let agents = self.agents.read().await;
        agents
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_eligibility_respects_tags_and_order() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", tags(&["text", "fast"])).await;
        registry.register("agent-b", tags(&["text"])).await;
        registry.register("agent-c", tags(&["image", "text", "fast"])).await;

        let eligible = registry.list_eligible(&tags(&["text", "fast"])).await;
        assert_eq!(eligible, vec!["agent-a", "agent-c"]);

        let all = registry.list_eligible(&[]).await;
        assert_eq!(all, vec!["agent-a", "agent-b", "agent-c"]);
    }

    #[tokio::test]
    async fn test_inactive_agents_are_not_listed() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;
        registry.register("agent-b", vec![]).await;

        registry.deactivate("agent-a").await.unwrap();
        assert_eq!(registry.list_eligible(&[]).await, vec!["agent-b"]);
        assert_eq!(registry.active_count().await, 1);

        registry.activate("agent-a").await.unwrap();
        assert_eq!(registry.list_eligible(&[]).await, vec!["agent-a", "agent-b"]);
    }

    #[tokio::test]
    async fn test_record_outcome_updates_counters() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;

        registry.record_outcome("agent-a", true, 120).await.unwrap();
        registry.record_outcome("agent-a", false, 80).await.unwrap();

        let record = registry.get("agent-a").await.unwrap();
        assert_eq!(record.requests, 2);
        assert_eq!(record.successes, 1);
        assert!((record.success_rate() - 0.5).abs() < 1e-9);
        assert!((record.avg_latency_ms() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_success_strictly_increases_counters() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;

        let before = registry.get("agent-a").await.unwrap();
        registry.record_outcome("agent-a", true, 10).await.unwrap();
        let after = registry.get("agent-a").await.unwrap();

        assert_eq!(after.successes, before.successes + 1);
        assert!(after.success_rate() > before.success_rate());
    }

    #[tokio::test]
    async fn test_outcome_for_unknown_agent() {
        let registry = AgentRegistry::new();
        let err = registry.record_outcome("ghost", true, 1).await.unwrap_err();
        assert_eq!(err.code(), "E201");
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_lose_nothing() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register("agent-a", vec![]).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    registry.record_outcome("agent-a", true, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = registry.get("agent-a").await.unwrap();
        assert_eq!(record.requests, 400);
        assert_eq!(record.successes, 400);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_counters() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", tags(&["text"])).await;
        registry.record_outcome("agent-a", true, 5).await.unwrap();

        registry.register("agent-a", tags(&["text", "image"])).await;
        let record = registry.get("agent-a").await.unwrap();
        assert_eq!(record.requests, 1);
        assert_eq!(record.tags, tags(&["text", "image"]));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_position() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;
        registry.register("agent-b", vec![]).await;

        registry.register("agent-a", tags(&["text"])).await;
        assert_eq!(registry.list_eligible(&[]).await, vec!["agent-a", "agent-b"]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let registry = AgentRegistry::new();
        registry.register("agent-a", tags(&["text"])).await;
        registry.register("agent-b", vec![]).await;
        registry.deactivate("agent-b").await.unwrap();
        registry.record_outcome("agent-a", true, 30).await.unwrap();

        let exported = registry.export_state().await;

        let restored = AgentRegistry::new();
        restored.import_state(exported).await;
        assert_eq!(restored.list_eligible(&[]).await, vec!["agent-a"]);
        assert_eq!(restored.get("agent-a").await.unwrap().requests, 1);
    }
}
