//! Q-learning routing policy
//!
//! Maintains a table of value estimates keyed by (state, action) and
//! selects actions with an ε-greedy rule: with probability ε pick
//! uniformly among the eligible actions, otherwise pick the eligible
//! action with the highest estimate, breaking ties by eligible order so
//! tied decisions stay reproducible.
//!
//! The table is sharded per state: a read lock on the outer map plus a
//! write lock on one state's entry is all an update needs, so updates to
//! different states never contend and there is no global policy lock.
//! ε, α and γ are stored as bit-packed atomics so they can be annealed
//! at runtime without readers ever observing a torn value.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

use super::state::StateKey;

/// A single value estimate for a (state, action) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QEntry {
    /// Current value estimate
    pub value: f64,
    /// When this entry was last updated
    pub updated_at: DateTime<Utc>,
}

impl Default for QEntry {
    fn default() -> Self {
        Self {
            value: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// An action together with its current value estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedAction {
    pub action: String,
    pub value: f64,
}

/// Result of an action selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen action
    pub action: String,
    /// Confidence in [0, 1], derived from the chosen value relative to
    /// the spread across eligible actions
    pub confidence: f64,
    /// Remaining eligible actions, ranked by value (descending)
    pub alternatives: Vec<RankedAction>,
    /// Whether this was an exploration (vs exploitation) choice
    pub explored: bool,
}

/// Read-only snapshot of the policy's learning state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStatistics {
    /// Number of distinct states visited
    pub states_explored: usize,
    /// Total number of (state, action) entries
    pub entries: usize,
    /// Mean value estimate across all entries
    pub avg_q_value: f64,
    /// Counts of state-key feature values, per feature
    pub feature_distribution: HashMap<String, HashMap<String, usize>>,
}

/// Serializable snapshot of the full table, the policy's only
/// persistence contract
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub entries: Vec<SnapshotEntry>,
}

/// One (state, action, value) row of a [`PolicySnapshot`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub state: StateKey,
    pub action: String,
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

type ActionValues = HashMap<String, QEntry>;

/// Q-learning policy with per-state sharded locking
pub struct QLearningPolicy {
    table: RwLock<HashMap<StateKey, Arc<RwLock<ActionValues>>>>,
    epsilon: AtomicU64,
    learning_rate: AtomicU64,
    discount_factor: AtomicU64,
    rng: StdMutex<StdRng>,
}

impl QLearningPolicy {
    /// Create a policy with the given parameters.
    ///
    /// ε is clamped to [0, 1], α to (0, 1], γ to [0, 1].
    pub fn new(epsilon: f64, learning_rate: f64, discount_factor: f64) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            epsilon: AtomicU64::new(clamp_bits(epsilon, 0.0, 1.0)),
            learning_rate: AtomicU64::new(clamp_bits(learning_rate, f64::MIN_POSITIVE, 1.0)),
            discount_factor: AtomicU64::new(clamp_bits(discount_factor, 0.0, 1.0)),
            rng: StdMutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a policy with a fixed RNG seed (for reproducibility in tests)
    pub fn with_seed(epsilon: f64, learning_rate: f64, discount_factor: f64, seed: u64) -> Self {
        let policy = Self::new(epsilon, learning_rate, discount_factor);
        *lock_rng(&policy.rng) = StdRng::seed_from_u64(seed);
        policy
    }

    /// Current exploration rate
    pub fn epsilon(&self) -> f64 {
        f64::from_bits(self.epsilon.load(Ordering::Relaxed))
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        f64::from_bits(self.learning_rate.load(Ordering::Relaxed))
    }

    /// Current discount factor
    pub fn discount_factor(&self) -> f64 {
        f64::from_bits(self.discount_factor.load(Ordering::Relaxed))
    }

    /// Set the exploration rate. Atomic with respect to concurrent
    /// selections; a reader sees either the old or the new value.
    pub fn set_epsilon(&self, epsilon: f64) {
        self.epsilon
            .store(clamp_bits(epsilon, 0.0, 1.0), Ordering::Relaxed);
    }

    /// Set the learning rate
    pub fn set_learning_rate(&self, alpha: f64) {
        self.learning_rate
            .store(clamp_bits(alpha, f64::MIN_POSITIVE, 1.0), Ordering::Relaxed);
    }

    /// Set the discount factor
    pub fn set_discount_factor(&self, gamma: f64) {
        self.discount_factor
            .store(clamp_bits(gamma, 0.0, 1.0), Ordering::Relaxed);
    }

    /// Select an action for a state with the ε-greedy rule.
    ///
    /// Fails with [`Error::NoEligibleAction`] when `eligible` is empty.
    pub async fn select_action(&self, state: &StateKey, eligible: &[String]) -> Result<Selection> {
        let explore = {
            let mut rng = lock_rng(&self.rng);
            rng.gen_range(0.0..1.0) < self.epsilon()
        };

        if explore {
            self.select_uniform(state, eligible).await
        } else {
            self.select_greedy(state, eligible).await
        }
    }

    /// Force an exploration choice: uniform among eligible actions
    pub async fn select_uniform(&self, state: &StateKey, eligible: &[String]) -> Result<Selection> {
        if eligible.is_empty() {
            return Err(Error::NoEligibleAction);
        }
        let index = {
            let mut rng = lock_rng(&self.rng);
            rng.gen_range(0..eligible.len())
        };
        let ranked = self.rank(state, eligible).await;
        Ok(build_selection(&eligible[index], ranked, true))
    }

    /// Force an exploitation choice: highest value, ties broken by
    /// eligible order (never randomly)
    pub async fn select_greedy(&self, state: &StateKey, eligible: &[String]) -> Result<Selection> {
        if eligible.is_empty() {
            return Err(Error::NoEligibleAction);
        }

        let values = self.values_for(state, eligible).await;
        let mut best_index = 0;
        for (i, value) in values.iter().enumerate() {
            // Strict comparison keeps the first of a tie
            if *value > values[best_index] {
                best_index = i;
            }
        }

        let ranked = ranked_from_values(eligible, &values);
        debug!(
            state = %state,
            action = %eligible[best_index],
            value = values[best_index],
            "greedy selection"
        );
        Ok(build_selection(&eligible[best_index], ranked, false))
    }

    /// Rank the eligible actions by current value estimate, descending.
    /// Ties keep eligible order.
    pub async fn rank(&self, state: &StateKey, eligible: &[String]) -> Vec<RankedAction> {
        let values = self.values_for(state, eligible).await;
        ranked_from_values(eligible, &values)
    }

    /// Current value estimate for a single (state, action) pair.
    /// Never-visited pairs have an implicit value of 0.
    pub async fn value(&self, state: &StateKey, action: &str) -> f64 {
        let entry = {
            let table = self.table.read().await;
            table.get(state).cloned()
        };
        match entry {
            Some(actions) => actions
                .read()
                .await
                .get(action)
                .map(|e| e.value)
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Apply the temporal-difference update rule:
    ///
    /// `Q(s,a) ← Q(s,a) + α · (r + γ · max_a' Q(s',a') − Q(s,a))`
    ///
    /// Updates to the same pair serialize on the state's entry lock;
    /// updates to different states proceed concurrently.
    pub async fn update(&self, state: &StateKey, action: &str, reward: f64, next_state: &StateKey) {
        // Read the successor's best value before taking the write lock;
        // when next_state == state this avoids read-then-write deadlock
        // on the same shard.
        let next_max = self.max_value(next_state).await;

        let entry = self.entry_for(state).await;
        let mut actions = entry.write().await;
        let q = actions.entry(action.to_string()).or_default();

        let alpha = self.learning_rate();
        let gamma = self.discount_factor();
        let old = q.value;
        q.value = old + alpha * (reward + gamma * next_max - old);
        q.updated_at = Utc::now();

        debug!(
            state = %state,
            action = %action,
            reward = reward,
            old_value = old,
            new_value = q.value,
            "policy update"
        );
    }

    /// Best known value for a state across all actions; 0 when the
    /// state has no entries yet.
    pub async fn max_value(&self, state: &StateKey) -> f64 {
        let entry = {
            let table = self.table.read().await;
            table.get(state).cloned()
        };
        match entry {
            Some(actions) => actions
                .read()
                .await
                .values()
                .map(|e| e.value)
                .fold(0.0_f64, f64::max),
            None => 0.0,
        }
    }

    /// Read-only snapshot of the learning state
    pub async fn statistics(&self) -> PolicyStatistics {
        let shards: Vec<(StateKey, Arc<RwLock<ActionValues>>)> = {
            let table = self.table.read().await;
            table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut entries = 0usize;
        let mut sum = 0.0;
        let mut features: HashMap<String, HashMap<String, usize>> = HashMap::new();

        for (state, shard) in &shards {
            for (feature, value) in [
                ("input_type", &state.input_type),
                ("priority", &state.priority),
                ("domain", &state.domain),
                ("time_of_day", &state.time_of_day),
                ("audience", &state.audience),
                ("complexity", &state.complexity),
                ("load_hint", &state.load_hint),
            ] {
                *features
                    .entry(feature.to_string())
                    .or_default()
                    .entry(value.clone())
                    .or_default() += 1;
            }

            let actions = shard.read().await;
            entries += actions.len();
            sum += actions.values().map(|e| e.value).sum::<f64>();
        }

        PolicyStatistics {
            states_explored: shards.len(),
            entries,
            avg_q_value: if entries > 0 { sum / entries as f64 } else { 0.0 },
            feature_distribution: features,
        }
    }

    /// Export the full table as a serializable snapshot
    pub async fn export_state(&self) -> PolicySnapshot {
        let shards: Vec<(StateKey, Arc<RwLock<ActionValues>>)> = {
            let table = self.table.read().await;
            table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut entries = Vec::new();
        for (state, shard) in shards {
            let actions = shard.read().await;
            for (action, q) in actions.iter() {
                entries.push(SnapshotEntry {
                    state: state.clone(),
                    action: action.clone(),
                    value: q.value,
                    updated_at: q.updated_at,
                });
            }
        }
        PolicySnapshot { entries }
    }

    /// Replace the table contents from a snapshot
    pub async fn import_state(&self, snapshot: PolicySnapshot) {
        let mut fresh: HashMap<StateKey, Arc<RwLock<ActionValues>>> = HashMap::new();
        let mut staging: HashMap<StateKey, ActionValues> = HashMap::new();

        for entry in snapshot.entries {
            staging.entry(entry.state).or_default().insert(
                entry.action,
                QEntry {
                    value: entry.value,
                    updated_at: entry.updated_at,
                },
            );
        }
        for (state, actions) in staging {
            fresh.insert(state, Arc::new(RwLock::new(actions)));
        }

        let mut table = self.table.write().await;
        *table = fresh;
    }

    async fn values_for(&self, state: &StateKey, eligible: &[String]) -> Vec<f64> {
        let entry = {
            let table = self.table.read().await;
            table.get(state).cloned()
        };
        match entry {
            Some(actions) => {
                let actions = actions.read().await;
                eligible
                    .iter()
                    .map(|a| actions.get(a).map(|e| e.value).unwrap_or(0.0))
                    .collect()
            }
            None => vec![0.0; eligible.len()],
        }
    }

    async fn entry_for(&self, state: &StateKey) -> Arc<RwLock<ActionValues>> {
        {
            let table = self.table.read().await;
            if let Some(entry) = table.get(state) {
                return entry.clone();
            }
        }
        let mut table = self.table.write().await;
        table.entry(state.clone()).or_default().clone()
    }
}

fn clamp_bits(value: f64, min: f64, max: f64) -> u64 {
    value.clamp(min, max).to_bits()
}

fn lock_rng(rng: &StdMutex<StdRng>) -> std::sync::MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ranked_from_values(eligible: &[String], values: &[f64]) -> Vec<RankedAction> {
    let mut ranked: Vec<RankedAction> = eligible
        .iter()
        .zip(values)
        .map(|(action, value)| RankedAction {
            action: action.clone(),
            value: *value,
        })
        .collect();
    ranked.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

pub(crate) fn build_selection(chosen: &str, ranked: Vec<RankedAction>, explored: bool) -> Selection {
    let max = ranked.first().map(|r| r.value).unwrap_or(0.0);
    let min = ranked.last().map(|r| r.value).unwrap_or(0.0);
    let chosen_value = ranked
        .iter()
        .find(|r| r.action == chosen)
        .map(|r| r.value)
        .unwrap_or(0.0);

    let spread = max - min;
    let confidence = if spread > f64::EPSILON {
        ((chosen_value - min) / spread).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let alternatives = ranked.into_iter().filter(|r| r.action != chosen).collect();

    Selection {
        action: chosen.to_string(),
        confidence,
        alternatives,
        explored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::state::RoutingContext;

    fn key() -> StateKey {
        StateKey::derive(&RoutingContext::new("text", "normal"), 14)
    }

    fn agents(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_select_empty_eligible() {
        let policy = QLearningPolicy::new(0.1, 0.5, 0.9);
        let err = policy.select_action(&key(), &[]).await.unwrap_err();
        assert_eq!(err.code(), "E200");
    }

    #[tokio::test]
    async fn test_greedy_picks_highest_value() {
        let policy = QLearningPolicy::with_seed(0.0, 0.5, 0.0, 42);
        let state = key();

        policy.update(&state, "agent-b", 1.0, &state).await;

        let selection = policy
            .select_action(&state, &agents(&["agent-a", "agent-b", "agent-c"]))
            .await
            .unwrap();
        assert_eq!(selection.action, "agent-b");
        assert!(!selection.explored);
        assert_eq!(selection.alternatives.len(), 2);
    }

    #[tokio::test]
    async fn test_tie_break_is_first_in_eligible_order() {
        let policy = QLearningPolicy::with_seed(0.0, 0.5, 0.0, 7);
        let state = key();

        // All values are the implicit 0: the first eligible action wins,
        // every time.
        for _ in 0..20 {
            let selection = policy
                .select_action(&state, &agents(&["agent-z", "agent-a"]))
                .await
                .unwrap();
            assert_eq!(selection.action, "agent-z");
        }
    }

    #[tokio::test]
    async fn test_exploration_stays_within_eligible() {
        let policy = QLearningPolicy::with_seed(1.0, 0.5, 0.9, 3);
        let state = key();
        let eligible = agents(&["agent-a", "agent-b"]);

        for _ in 0..50 {
            let selection = policy.select_action(&state, &eligible).await.unwrap();
            assert!(eligible.contains(&selection.action));
            assert!(selection.explored);
        }
    }

    #[tokio::test]
    async fn test_positive_reward_strictly_increases_value() {
        let policy = QLearningPolicy::new(0.0, 0.3, 0.9);
        let state = key();

        let mut previous = policy.value(&state, "agent-a").await;
        for _ in 0..10 {
            policy.update(&state, "agent-a", 1.0, &state).await;
            let current = policy.value(&state, "agent-a").await;
            assert!(
                current > previous,
                "expected strict increase, {} -> {}",
                previous,
                current
            );
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_unseen_next_state_contributes_zero() {
        let policy = QLearningPolicy::new(0.0, 0.5, 1.0);
        let state = key();
        let next = StateKey::derive(&RoutingContext::new("image", "high"), 2);

        policy.update(&state, "agent-a", 1.0, &next).await;
        // old=0, alpha=0.5, reward=1, next_max=0 -> 0.5
        let value = policy.value(&state, "agent-a").await;
        assert!((value - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_next_state_max_feeds_update() {
        let policy = QLearningPolicy::new(0.0, 1.0, 0.5);
        let state = key();
        let next = StateKey::derive(&RoutingContext::new("image", "high"), 2);

        // Give the successor state a best value of 1.0 (alpha=1, r=1).
        policy.update(&next, "agent-b", 1.0, &state).await;
        assert!((policy.max_value(&next).await - 1.0).abs() < 1e-9);

        // Q(s,a) = 0 + 1.0 * (0.2 + 0.5 * 1.0 - 0) = 0.7
        policy.update(&state, "agent-a", 0.2, &next).await;
        let value = policy.value(&state, "agent-a").await;
        assert!((value - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_confidence_reflects_spread() {
        let policy = QLearningPolicy::new(0.0, 1.0, 0.0);
        let state = key();

        policy.update(&state, "agent-a", 1.0, &state).await;
        policy.update(&state, "agent-b", 0.2, &state).await;

        let selection = policy
            .select_action(&state, &agents(&["agent-a", "agent-b", "agent-c"]))
            .await
            .unwrap();
        assert_eq!(selection.action, "agent-a");
        assert!((selection.confidence - 1.0).abs() < 1e-9);

        // With a single eligible action there is no spread
        let solo = policy
            .select_action(&state, &agents(&["agent-a"]))
            .await
            .unwrap();
        assert!((solo.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_updates_to_disjoint_states() {
        let policy = Arc::new(QLearningPolicy::new(0.0, 0.5, 0.9));
        let state_a = StateKey::derive(&RoutingContext::new("text", "low"), 10);
        let state_b = StateKey::derive(&RoutingContext::new("image", "high"), 22);

        let p1 = policy.clone();
        let a = state_a.clone();
        let h1 = tokio::spawn(async move {
            for _ in 0..100 {
                p1.update(&a, "agent-a", 1.0, &a).await;
            }
        });
        let p2 = policy.clone();
        let b = state_b.clone();
        let h2 = tokio::spawn(async move {
            for _ in 0..100 {
                p2.update(&b, "agent-b", 1.0, &b).await;
            }
        });

        h1.await.unwrap();
        h2.await.unwrap();

        assert!(policy.value(&state_a, "agent-a").await > 0.0);
        assert!(policy.value(&state_b, "agent-b").await > 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_selects_return() {
        let policy = Arc::new(QLearningPolicy::new(0.2, 0.5, 0.9));
        let state_a = StateKey::derive(&RoutingContext::new("text", "low"), 10);
        let state_b = StateKey::derive(&RoutingContext::new("image", "high"), 22);

        let p1 = policy.clone();
        let p2 = policy.clone();
        let (r1, r2) = tokio::join!(
            async move { p1.select_action(&state_a, &agents(&["a1", "a2"])).await },
            async move { p2.select_action(&state_b, &agents(&["b1", "b2"])).await },
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn test_parameter_annealing() {
        let policy = QLearningPolicy::new(0.5, 0.5, 0.9);
        policy.set_epsilon(0.05);
        assert!((policy.epsilon() - 0.05).abs() < 1e-12);

        policy.set_epsilon(2.0);
        assert!((policy.epsilon() - 1.0).abs() < 1e-12);

        policy.set_learning_rate(0.0);
        assert!(policy.learning_rate() > 0.0);

        policy.set_discount_factor(-1.0);
        assert!((policy.discount_factor() - 0.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_statistics_snapshot() {
        let policy = QLearningPolicy::new(0.0, 0.5, 0.9);
        let state = key();
        policy.update(&state, "agent-a", 1.0, &state).await;
        policy.update(&state, "agent-b", 0.5, &state).await;

        let stats = policy.statistics().await;
        assert_eq!(stats.states_explored, 1);
        assert_eq!(stats.entries, 2);
        assert!(stats.avg_q_value > 0.0);
        assert_eq!(
            stats.feature_distribution.get("time_of_day").and_then(|m| m.get("day")),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let policy = QLearningPolicy::new(0.0, 0.5, 0.9);
        let state = key();
        policy.update(&state, "agent-a", 1.0, &state).await;

        let snapshot = policy.export_state().await;
        assert_eq!(snapshot.entries.len(), 1);

        let restored = QLearningPolicy::new(0.0, 0.5, 0.9);
        restored.import_state(snapshot).await;
        let value = restored.value(&state, "agent-a").await;
        assert!((value - policy.value(&state, "agent-a").await).abs() < 1e-12);
    }
}
