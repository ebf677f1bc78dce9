//! Envelope data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Wire format version stamped into every envelope
pub const ENVELOPE_VERSION: &str = "1.0";

/// The fixed set of packet types an envelope may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// A request to route a work item to an agent
    RoutingRequest,
    /// The decision produced for a routing request
    RoutingResponse,
    /// Outcome feedback for a prior routing decision
    FeedbackLog,
    /// Learning/metrics update emitted after feedback is applied
    MetricsUpdate,
    /// Liveness probe for the core components
    HealthCheck,
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoutingRequest => write!(f, "routing_request"),
            Self::RoutingResponse => write!(f, "routing_response"),
            Self::FeedbackLog => write!(f, "feedback_log"),
            Self::MetricsUpdate => write!(f, "metrics_update"),
            Self::HealthCheck => write!(f, "health_check"),
        }
    }
}

impl std::str::FromStr for PacketType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "routing_request" => Ok(Self::RoutingRequest),
            "routing_response" => Ok(Self::RoutingResponse),
            "feedback_log" => Ok(Self::FeedbackLog),
            "metrics_update" => Ok(Self::MetricsUpdate),
            "health_check" => Ok(Self::HealthCheck),
            other => Err(Error::Format(format!("unknown packet type '{}'", other))),
        }
    }
}

/// Envelope metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// Wire format version
    pub version: String,
    /// Packet type from the fixed enumerated set
    pub packet_type: PacketType,
    /// Creation timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Sender identifier
    pub source: String,
    /// Intended receiver identifier
    pub destination: String,
    /// Globally unique message id
    pub message_id: String,
    /// SHA-256 hex digest of the canonical payload serialization
    pub checksum: String,
}

/// Envelope payload wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Opaque structured value carried by the envelope
    pub data: serde_json::Value,
}

/// A versioned, checksummed wrapper around a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub payload: Payload,
}

impl Envelope {
    /// Build a reply envelope: source/destination swapped, fresh message
    /// id and timestamp, checksum computed over the new payload.
    pub fn reply(&self, packet_type: PacketType, data: serde_json::Value) -> Result<Envelope> {
        super::codec::wrap(data, packet_type, &self.meta.destination, &self.meta.source)
    }

    /// Convenience constructor for a health probe
    pub fn health_check(source: &str, destination: &str) -> Result<Envelope> {
        super::codec::wrap(
            serde_json::json!({ "probe_id": Uuid::new_v4().to_string() }),
            PacketType::HealthCheck,
            source,
            destination,
        )
    }
}
