//! Feedback ingestion and learning updates
//!
//! Closes the loop: a feedback envelope referencing an earlier routing
//! decision is turned into a scalar reward, applied to the policy,
//! recorded against the agent's counters, and announced on telemetry.
//! Each decision is resolved at most once; a duplicate or unknown
//! request id is rejected before any state is touched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::envelope::{self, Envelope, PacketType};
use crate::error::{Error, Result};
use crate::registry::AgentRegistry;
use crate::routing::{DecisionLog, QLearningPolicy};
use crate::telemetry::TelemetryBroadcaster;

/// Weight of the success term in the reward
const WEIGHT_SUCCESS: f64 = 0.5;
/// Weight of the accuracy term
const WEIGHT_ACCURACY: f64 = 0.3;
/// Weight of the satisfaction term
const WEIGHT_SATISFACTION: f64 = 0.2;
/// Value substituted for an absent optional quality signal
const NEUTRAL: f64 = 0.5;

/// Outcome report for one routed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSignal {
    /// Request id of the decision this feedback resolves
    pub request_id: String,
    /// Whether the agent completed the request successfully
    pub success: bool,
    /// Optional accuracy score in [0, 1]
    pub accuracy: Option<f64>,
    /// Optional satisfaction score in [0, 1]
    pub satisfaction: Option<f64>,
    /// Observed handling latency, in milliseconds
    pub latency_ms: Option<u64>,
}

impl FeedbackSignal {
    /// Collapse the signal into a scalar reward in [0, 1].
    ///
    /// Weighted sum of success, accuracy and satisfaction. Absent
    /// optional scores count as neutral (0.5). A failed request zeroes
    /// the success term but the quality scores still contribute, so a
    /// graceful failure earns more than a bad one.
    pub fn reward(&self) -> f64 {
        let success = if self.success { 1.0 } else { 0.0 };
        let accuracy = self.accuracy.unwrap_or(NEUTRAL).clamp(0.0, 1.0);
        let satisfaction = self.satisfaction.unwrap_or(NEUTRAL).clamp(0.0, 1.0);

        (WEIGHT_SUCCESS * success
            + WEIGHT_ACCURACY * accuracy
            + WEIGHT_SATISFACTION * satisfaction)
            .clamp(0.0, 1.0)
    }
}

/// Telemetry payload emitted after feedback is applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub request_id: String,
    pub agent_id: String,
    pub state_key: String,
    pub reward: f64,
    pub q_value: f64,
    pub success: bool,
}

/// Applies feedback envelopes to the policy and registry
pub struct FeedbackProcessor {
    policy: Arc<QLearningPolicy>,
    registry: Arc<AgentRegistry>,
    decisions: Arc<DecisionLog>,
    broadcaster: Arc<TelemetryBroadcaster>,
    source: String,
}

impl FeedbackProcessor {
    pub fn new(
        policy: Arc<QLearningPolicy>,
        registry: Arc<AgentRegistry>,
        decisions: Arc<DecisionLog>,
        broadcaster: Arc<TelemetryBroadcaster>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            registry,
            decisions,
            broadcaster,
            source: source.into(),
        }
    }

    /// Ingest a feedback envelope.
    ///
    /// Fails with [`Error::Format`] for a non-feedback packet or a
    /// malformed payload, and with [`Error::UnknownRequest`] when the
    /// request id is unknown or already resolved. On success the policy
    /// update, the agent counters, and the telemetry announcement all
    /// happen, in that order.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<()> {
        if envelope.meta.packet_type != PacketType::FeedbackLog {
            return Err(Error::Format(format!(
                "expected feedback_log, got {}",
                envelope.meta.packet_type
            )));
        }

        let unwrapped = envelope::unwrap(envelope)?;
        let signal: FeedbackSignal =
            serde_json::from_value(unwrapped.data).map_err(|e| Error::Format(e.to_string()))?;

        self.apply(&signal).await
    }

    /// Apply a parsed feedback signal. See [`ingest`](Self::ingest) for
    /// the failure modes.
    ///
    /// Once the decision is resolved, the policy update, the counter
    /// increments and the telemetry announcement are guaranteed to
    /// complete even if the caller abandons this future (a timed-out
    /// caller must not leave the request with partial credit).
    pub async fn apply(&self, signal: &FeedbackSignal) -> Result<()> {
        // Resolving first makes the whole operation at-most-once: a
        // duplicate fails here, before any learning state changes.
        let decision = self.decisions.resolve(&signal.request_id).await?;

        // The decision is now resolved and cannot be retried, so the
        // remaining mutations run in their own task: dropping this
        // future at a later await point no longer aborts them.
        let policy = Arc::clone(&self.policy);
        let registry = Arc::clone(&self.registry);
        let broadcaster = Arc::clone(&self.broadcaster);
        let source = self.source.clone();
        let signal = signal.clone();

        let task = tokio::spawn(async move {
            let reward = signal.reward();

            // No successor observation exists for a routed request, so
            // the decision's own state stands in as the next state.
            policy
                .update(&decision.state_key, &decision.agent_id, reward, &decision.state_key)
                .await;

            let latency = signal.latency_ms.unwrap_or(decision.latency_ms);
            if let Err(e) = registry
                .record_outcome(&decision.agent_id, signal.success, latency)
                .await
            {
                // The agent may have been dropped since the decision was
                // made; the learning update above still counts.
                warn!(agent = %decision.agent_id, "feedback for missing agent: {}", e);
            }

            let q_value = policy.value(&decision.state_key, &decision.agent_id).await;
            debug!(
                request_id = %signal.request_id,
                agent = %decision.agent_id,
                reward = reward,
                q_value = q_value,
                "feedback applied"
            );

            let update = MetricsUpdate {
                request_id: signal.request_id.clone(),
                agent_id: decision.agent_id.clone(),
                state_key: decision.state_key.to_string(),
                reward,
                q_value,
                success: signal.success,
            };
            let announcement = envelope::wrap(
                serde_json::to_value(&update)?,
                PacketType::MetricsUpdate,
                &source,
                "observers",
            )?;
            broadcaster.publish(announcement);
            Ok(())
        });

        task.await
            .unwrap_or_else(|e| Err(Error::Other(format!("feedback task failed: {}", e))))
    }
}
