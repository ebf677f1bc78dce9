//! Component health reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::AgentRegistry;
use crate::routing::QLearningPolicy;
use crate::telemetry::TelemetryBroadcaster;

/// Health verdict for a component or the system as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}

/// One component's check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

/// Aggregated report across all components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across the individual checks
    pub overall_status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.overall_status == HealthStatus::Ok
    }
}

/// Run the component checks and aggregate them into a report.
///
/// A registry with no active agents is a warning rather than an error:
/// the system is up but cannot route until an agent activates.
pub async fn report(
    policy: &QLearningPolicy,
    registry: &AgentRegistry,
    broadcaster: &TelemetryBroadcaster,
) -> HealthReport {
    let mut checks = Vec::new();

    let stats = policy.statistics().await;
    checks.push(HealthCheck {
        name: "policy".to_string(),
        status: HealthStatus::Ok,
        message: format!(
            "{} states, {} entries",
            stats.states_explored, stats.entries
        ),
    });

    let active = registry.active_count().await;
    let total = registry.len().await;
    checks.push(HealthCheck {
        name: "registry".to_string(),
        status: if active > 0 {
            HealthStatus::Ok
        } else {
            HealthStatus::Warning
        },
        message: if active > 0 {
            format!("{} of {} agents active", active, total)
        } else {
            "no active agents".to_string()
        },
    });

    checks.push(HealthCheck {
        name: "telemetry".to_string(),
        status: HealthStatus::Ok,
        message: format!("{} observers attached", broadcaster.observer_count()),
    });

    let overall_status = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Ok);

    HealthReport {
        overall_status,
        checks,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_components_ok() {
        let policy = QLearningPolicy::new(0.1, 0.5, 0.9);
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;
        let broadcaster = TelemetryBroadcaster::new();

        let report = report(&policy, &registry, &broadcaster).await;
        assert!(report.healthy());
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn test_no_active_agents_is_warning() {
        let policy = QLearningPolicy::new(0.1, 0.5, 0.9);
        let registry = AgentRegistry::new();
        registry.register("agent-a", vec![]).await;
        registry.deactivate("agent-a").await.unwrap();
        let broadcaster = TelemetryBroadcaster::new();

        let report = report(&policy, &registry, &broadcaster).await;
        assert_eq!(report.overall_status, HealthStatus::Warning);
        assert!(!report.healthy());

        let registry_check = report.checks.iter().find(|c| c.name == "registry").unwrap();
        assert_eq!(registry_check.status, HealthStatus::Warning);
    }

    #[test]
    fn test_status_ordering_picks_worst() {
        assert!(HealthStatus::Error > HealthStatus::Warning);
        assert!(HealthStatus::Warning > HealthStatus::Ok);
    }
}
