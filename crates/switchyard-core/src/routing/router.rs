//! The router: ties policy, registry, decision log and telemetry
//! together behind the envelope protocol

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::envelope::{self, Envelope, PacketType};
use crate::error::{Error, Result};
use crate::health::{self, HealthReport};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::telemetry::TelemetryBroadcaster;

use super::decisions::{DecisionLog, DecisionRecord};
use super::policy::{self, PolicySnapshot, QLearningPolicy, Selection};
use super::state::{RoutingContext, StateKey};

/// How the router picks among eligible agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    /// ε-greedy over learned values (the default)
    #[default]
    Learned,
    /// Force a uniform exploration choice
    Explore,
    /// Rotate through eligible agents, ignoring learned values
    RoundRobin,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Learned => write!(f, "learned"),
            Self::Explore => write!(f, "explore"),
            Self::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl std::str::FromStr for RoutingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "learned" => Ok(Self::Learned),
            "explore" => Ok(Self::Explore),
            "round_robin" => Ok(Self::RoundRobin),
            other => Err(Error::Format(format!("unknown strategy '{}'", other))),
        }
    }
}

/// Combined persistence snapshot of the learning state and the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub policy: PolicySnapshot,
    pub agents: Vec<AgentRecord>,
}

#[derive(Debug, Deserialize)]
struct RequestPayload {
    context: RoutingContext,
    strategy: Option<String>,
}

/// Central request router.
///
/// Owns shared handles to the policy, the agent registry, the decision
/// log and the telemetry broadcaster; every routed request flows through
/// all four.
pub struct Router {
    policy: Arc<QLearningPolicy>,
    registry: Arc<AgentRegistry>,
    decisions: Arc<DecisionLog>,
    broadcaster: Arc<TelemetryBroadcaster>,
    source: String,
    round_robin: AtomicU64,
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    epsilon: f64,
    learning_rate: f64,
    discount_factor: f64,
    seed: Option<u64>,
    source: String,
    broadcaster: Option<Arc<TelemetryBroadcaster>>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            learning_rate: 0.1,
            discount_factor: 0.9,
            seed: None,
            source: "router".to_string(),
            broadcaster: None,
        }
    }
}

impl RouterBuilder {
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn learning_rate(mut self, alpha: f64) -> Self {
        self.learning_rate = alpha;
        self
    }

    pub fn discount_factor(mut self, gamma: f64) -> Self {
        self.discount_factor = gamma;
        self
    }

    /// Fix the policy's RNG seed (for reproducibility in tests)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Source name stamped into emitted envelopes
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Share an existing broadcaster instead of creating one
    pub fn broadcaster(mut self, broadcaster: Arc<TelemetryBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn build(self) -> Router {
        let policy = match self.seed {
            Some(seed) => {
                QLearningPolicy::with_seed(self.epsilon, self.learning_rate, self.discount_factor, seed)
            }
            None => QLearningPolicy::new(self.epsilon, self.learning_rate, self.discount_factor),
        };
        Router {
            policy: Arc::new(policy),
            registry: Arc::new(AgentRegistry::new()),
            decisions: Arc::new(DecisionLog::new()),
            broadcaster: self.broadcaster.unwrap_or_default(),
            source: self.source,
            round_robin: AtomicU64::new(0),
        }
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn policy(&self) -> &Arc<QLearningPolicy> {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn decisions(&self) -> &Arc<DecisionLog> {
        &self.decisions
    }

    pub fn broadcaster(&self) -> &Arc<TelemetryBroadcaster> {
        &self.broadcaster
    }

    /// Route a work item to an agent.
    ///
    /// Derives the state key, filters eligible agents by the context's
    /// required tags, selects per the strategy, records the decision for
    /// later feedback, and announces it on telemetry. Fails with
    /// [`Error::NoEligibleAction`] when no active agent carries the
    /// required tags.
    pub async fn route(
        &self,
        context: &RoutingContext,
        strategy: RoutingStrategy,
    ) -> Result<DecisionRecord> {
        let started = Instant::now();
        let state_key = StateKey::derive_now(context);

        let eligible = self.registry.list_eligible(&context.required_tags).await;
        if eligible.is_empty() {
            return Err(Error::NoEligibleAction);
        }

        let selection = match strategy {
            RoutingStrategy::Learned => self.policy.select_action(&state_key, &eligible).await?,
            RoutingStrategy::Explore => self.policy.select_uniform(&state_key, &eligible).await?,
            RoutingStrategy::RoundRobin => self.select_round_robin(&state_key, &eligible).await,
        };

        let record = DecisionRecord {
            request_id: Uuid::new_v4().to_string(),
            state_key,
            agent_id: selection.action,
            alternatives: selection.alternatives,
            confidence: selection.confidence,
            latency_ms: started.elapsed().as_millis() as u64,
            strategy: strategy.to_string(),
            explored: selection.explored,
            created_at: Utc::now(),
        };
        self.decisions.insert(record.clone()).await;

        info!(
            request_id = %record.request_id,
            agent = %record.agent_id,
            state = %record.state_key,
            strategy = %strategy,
            "routed request"
        );

        let announcement = envelope::wrap(
            serde_json::to_value(&record)?,
            PacketType::RoutingResponse,
            &self.source,
            "observers",
        )?;
        self.broadcaster.publish(announcement);

        Ok(record)
    }

    /// Handle a routing request envelope, producing the response
    /// envelope addressed back to the sender.
    pub async fn handle_request(&self, request: &Envelope) -> Result<Envelope> {
        if request.meta.packet_type != PacketType::RoutingRequest {
            return Err(Error::Format(format!(
                "expected routing_request, got {}",
                request.meta.packet_type
            )));
        }

        let unwrapped = envelope::unwrap(request)?;
        let payload: RequestPayload =
            serde_json::from_value(unwrapped.data).map_err(|e| Error::Format(e.to_string()))?;
        let strategy = match payload.strategy.as_deref() {
            Some(s) => s.parse()?,
            None => RoutingStrategy::default(),
        };

        let record = self.route(&payload.context, strategy).await?;
        request.reply(PacketType::RoutingResponse, serde_json::to_value(&record)?)
    }

    /// Answer a health probe envelope with the current component report
    pub async fn handle_health_check(&self, probe: &Envelope) -> Result<Envelope> {
        if probe.meta.packet_type != PacketType::HealthCheck {
            return Err(Error::Format(format!(
                "expected health_check, got {}",
                probe.meta.packet_type
            )));
        }
        let report = self.health_report().await;
        probe.reply(PacketType::HealthCheck, serde_json::to_value(&report)?)
    }

    /// Health report across the router's components
    pub async fn health_report(&self) -> HealthReport {
        health::report(&self.policy, &self.registry, &self.broadcaster).await
    }

    /// Export the learning state and registry as one snapshot
    pub async fn export_state(&self) -> SystemSnapshot {
        SystemSnapshot {
            policy: self.policy.export_state().await,
            agents: self.registry.export_state().await,
        }
    }

    /// Replace the learning state and registry from a snapshot
    pub async fn import_state(&self, snapshot: SystemSnapshot) {
        self.policy.import_state(snapshot.policy).await;
        self.registry.import_state(snapshot.agents).await;
    }

    async fn select_round_robin(&self, state: &StateKey, eligible: &[String]) -> Selection {
        let index = (self.round_robin.fetch_add(1, Ordering::Relaxed) as usize) % eligible.len();
        let ranked = self.policy.rank(state, eligible).await;
        policy::build_selection(&eligible[index], ranked, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn router_with_agents(agents: &[&str]) -> Router {
        let router = Router::builder().epsilon(0.0).seed(11).build();
        for agent in agents {
            router.registry().register(*agent, vec![]).await;
        }
        router
    }

    #[tokio::test]
    async fn test_route_with_no_agents() {
        let router = Router::builder().build();
        let err = router
            .route(&RoutingContext::new("text", "normal"), RoutingStrategy::Learned)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E200");
    }

    #[tokio::test]
    async fn test_route_records_decision() {
        let router = router_with_agents(&["agent-a", "agent-b"]).await;
        let record = router
            .route(&RoutingContext::new("text", "normal"), RoutingStrategy::Learned)
            .await
            .unwrap();

        assert!(["agent-a", "agent-b"].contains(&record.agent_id.as_str()));
        assert_eq!(record.alternatives.len(), 1);
        assert_eq!(router.decisions().pending_count().await, 1);
        assert!(router.decisions().get(&record.request_id).await.is_some());
    }

    #[tokio::test]
    async fn test_required_tags_filter_candidates() {
        let router = Router::builder().epsilon(0.0).build();
        router.registry().register("text-only", vec!["text".to_string()]).await;
        router
            .registry()
            .register("vision", vec!["image".to_string()])
            .await;

        let context = RoutingContext::new("image", "high")
            .with_required_tags(vec!["image".to_string()]);
        let record = router.route(&context, RoutingStrategy::Learned).await.unwrap();
        assert_eq!(record.agent_id, "vision");
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let router = router_with_agents(&["agent-a", "agent-b", "agent-c"]).await;
        let context = RoutingContext::new("text", "normal");

        let mut chosen = Vec::new();
        for _ in 0..6 {
            let record = router.route(&context, RoutingStrategy::RoundRobin).await.unwrap();
            chosen.push(record.agent_id);
        }
        assert_eq!(
            chosen,
            vec!["agent-a", "agent-b", "agent-c", "agent-a", "agent-b", "agent-c"]
        );
    }

    #[tokio::test]
    async fn test_explore_strategy_marks_exploration() {
        let router = router_with_agents(&["agent-a", "agent-b"]).await;
        let record = router
            .route(&RoutingContext::new("text", "normal"), RoutingStrategy::Explore)
            .await
            .unwrap();
        assert!(record.explored);
    }

    #[tokio::test]
    async fn test_handle_request_roundtrip() {
        let router = router_with_agents(&["agent-a"]).await;
        let request = envelope::wrap(
            json!({
                "context": { "input_type": "text", "priority": "normal" },
                "strategy": "learned"
            }),
            PacketType::RoutingRequest,
            "api",
            "router",
        )
        .unwrap();

        let response = router.handle_request(&request).await.unwrap();
        assert_eq!(response.meta.packet_type, PacketType::RoutingResponse);
        assert_eq!(response.meta.destination, "api");

        let record: DecisionRecord = serde_json::from_value(response.payload.data.clone()).unwrap();
        assert_eq!(record.agent_id, "agent-a");
        assert_eq!(record.strategy, "learned");
    }

    #[tokio::test]
    async fn test_handle_request_rejects_wrong_packet() {
        let router = router_with_agents(&["agent-a"]).await;
        let wrong = envelope::wrap(json!({}), PacketType::MetricsUpdate, "api", "router").unwrap();
        let err = router.handle_request(&wrong).await.unwrap_err();
        assert_eq!(err.code(), "E100");
    }

    #[tokio::test]
    async fn test_handle_request_rejects_unknown_strategy() {
        let router = router_with_agents(&["agent-a"]).await;
        let request = envelope::wrap(
            json!({
                "context": { "input_type": "text", "priority": "normal" },
                "strategy": "psychic"
            }),
            PacketType::RoutingRequest,
            "api",
            "router",
        )
        .unwrap();
        let err = router.handle_request(&request).await.unwrap_err();
        assert_eq!(err.code(), "E100");
    }

    #[tokio::test]
    async fn test_route_publishes_telemetry() {
        let router = router_with_agents(&["agent-a"]).await;
        let mut observer = router.broadcaster().subscribe();

        router
            .route(&RoutingContext::new("text", "normal"), RoutingStrategy::Learned)
            .await
            .unwrap();

        let announced = observer.try_next().unwrap();
        assert_eq!(announced.meta.packet_type, PacketType::RoutingResponse);
    }

    #[tokio::test]
    async fn test_health_probe_roundtrip() {
        let router = router_with_agents(&["agent-a"]).await;
        let probe = Envelope::health_check("probe", "router").unwrap();
        let reply = router.handle_health_check(&probe).await.unwrap();
        assert_eq!(reply.meta.packet_type, PacketType::HealthCheck);
        assert_eq!(reply.meta.destination, "probe");
    }

    #[tokio::test]
    async fn test_export_import_snapshot() {
        let router = router_with_agents(&["agent-a"]).await;
        let context = RoutingContext::new("text", "normal");
        let record = router.route(&context, RoutingStrategy::Learned).await.unwrap();

        // Learn something so the snapshot is non-trivial
        router
            .policy()
            .update(&record.state_key, &record.agent_id, 1.0, &record.state_key)
            .await;

        let snapshot = router.export_state().await;
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored_snapshot: SystemSnapshot = serde_json::from_str(&json).unwrap();

        let fresh = Router::builder().epsilon(0.0).build();
        fresh.import_state(restored_snapshot).await;
        assert_eq!(fresh.registry().list_eligible(&[]).await, vec!["agent-a"]);
        assert!(fresh.policy().value(&record.state_key, &record.agent_id).await > 0.0);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("learned".parse::<RoutingStrategy>().unwrap(), RoutingStrategy::Learned);
        assert_eq!("explore".parse::<RoutingStrategy>().unwrap(), RoutingStrategy::Explore);
        assert_eq!(
            "round_robin".parse::<RoutingStrategy>().unwrap(),
            RoutingStrategy::RoundRobin
        );
        assert!("psychic".parse::<RoutingStrategy>().is_err());
    }
}
