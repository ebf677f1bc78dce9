//! Error types for Switchyard

use thiserror::Error;

/// Result type alias using Switchyard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchyard error types
#[derive(Error, Debug)]
pub enum Error {
    // Envelope errors (E100-E199)
    #[error("Malformed envelope: {0}")]
    Format(String),

    // Routing errors (E200-E299)
    #[error("No eligible agent available for routing")]
    NoEligibleAction,

    #[error("Agent '{0}' not found in registry")]
    AgentNotFound(String),

    // Feedback errors (E300-E399)
    #[error("Unknown or already resolved request '{0}'")]
    UnknownRequest(String),

    // Telemetry errors (E400-E499)
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Format(_) => "E100",
            Self::NoEligibleAction => "E200",
            Self::AgentNotFound(_) => "E201",
            Self::UnknownRequest(_) => "E300",
            Self::Telemetry(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Serialization(_) => "E800",
            Self::Io(_) | Self::Other(_) => "E9999",
        }
    }
}
