//! Switchyard Core Library
//!
//! This crate provides the core functionality for Switchyard, including:
//! - Envelope codec (versioned, typed, checksummed message envelopes)
//! - Learned routing (Q-learning policy over request context)
//! - Agent registry (eligibility, capability tags, rolling counters)
//! - Feedback processing (reward attribution and policy updates)
//! - Telemetry fan-out (bounded broadcast with WebSocket delivery)
//! - Health checks

pub mod config;
pub mod envelope;
pub mod error;
pub mod feedback;
pub mod health;
pub mod registry;
pub mod routing;
pub mod telemetry;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::envelope::{Envelope, PacketType};
    pub use crate::error::{Error, Result};
    pub use crate::routing::{Router, RoutingContext};
}
