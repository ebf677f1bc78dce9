//! Routing context and state derivation
//!
//! A [`RoutingContext`] is the caller-supplied description of a work
//! item. [`StateKey`] is its deterministic, finite-alphabet encoding
//! used as the learning algorithm's state. The key is a structured
//! record; the `|`-joined string form is reserved for the wire and for
//! debugging.

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator used in the wire form of a state key. Stripped from every
/// component value so the joined form parses unambiguously.
const SEPARATOR: char = '|';

/// Maximum length of a free-form component in the state key
const COMPONENT_MAX_LEN: usize = 16;

/// Confidence requirement above which a request counts as complex
pub const COMPLEXITY_CUTOFF: f64 = 0.8;

/// Caller-supplied attributes describing a work item to route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Kind of input (e.g. "text", "image", "audio")
    pub input_type: String,
    /// Priority label (e.g. "low", "normal", "high")
    pub priority: String,
    /// Subject domain; defaults to "general" when absent
    pub domain: Option<String>,
    /// Identifier of the requesting user, if known
    pub user_id: Option<String>,
    /// Minimum confidence the caller requires of the decision
    pub required_confidence: Option<f64>,
    /// Load-balancing hint; defaults to "balanced" when absent
    pub load_hint: Option<String>,
    /// Capability tags an agent must carry to be eligible
    #[serde(default)]
    pub required_tags: Vec<String>,
}

impl RoutingContext {
    /// Create a context with defaults for the optional attributes
    pub fn new(input_type: impl Into<String>, priority: impl Into<String>) -> Self {
        Self {
            input_type: input_type.into(),
            priority: priority.into(),
            domain: None,
            user_id: None,
            required_confidence: None,
            load_hint: None,
            required_tags: Vec::new(),
        }
    }

    /// Set the subject domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the requesting user id
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the required confidence threshold
    pub fn with_required_confidence(mut self, confidence: f64) -> Self {
        self.required_confidence = Some(confidence);
        self
    }

    /// Set the load-balancing hint
    pub fn with_load_hint(mut self, hint: impl Into<String>) -> Self {
        self.load_hint = Some(hint.into());
        self
    }

    /// Require capability tags of the chosen agent
    pub fn with_required_tags(mut self, tags: Vec<String>) -> Self {
        self.required_tags = tags;
        self
    }
}

/// Deterministic, finite-alphabet encoding of a routing context.
///
/// Equality and hashing operate on the structured fields; the joined
/// string form is produced by `Display` and parsed by `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub input_type: String,
    pub priority: String,
    pub domain: String,
    /// "day" (hours 6..18) or "night"
    pub time_of_day: String,
    /// "returning" when a user id is present, "new" otherwise
    pub audience: String,
    /// "complex" when the required confidence exceeds the cutoff,
    /// "normal" otherwise
    pub complexity: String,
    pub load_hint: String,
}

fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != SEPARATOR)
        .collect::<String>()
        .to_lowercase();
    cleaned.chars().take(COMPONENT_MAX_LEN).collect()
}

impl StateKey {
    /// Derive a state key from a context at the given wall-clock hour.
    ///
    /// Pure: the same context and hour always yield the same key.
    pub fn derive(context: &RoutingContext, hour: u32) -> Self {
        Self {
            input_type: sanitize(&context.input_type),
            priority: sanitize(&context.priority),
            domain: sanitize(context.domain.as_deref().unwrap_or("general")),
            time_of_day: if (6..18).contains(&hour) { "day" } else { "night" }.to_string(),
            audience: if context.user_id.is_some() { "returning" } else { "new" }.to_string(),
            complexity: match context.required_confidence {
                Some(c) if c > COMPLEXITY_CUTOFF => "complex".to_string(),
                _ => "normal".to_string(),
            },
            load_hint: sanitize(context.load_hint.as_deref().unwrap_or("balanced")),
        }
    }

    /// Derive a state key using the current UTC hour
    pub fn derive_now(context: &RoutingContext) -> Self {
        Self::derive(context, Utc::now().hour())
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.input_type,
            self.priority,
            self.domain,
            self.time_of_day,
            self.audience,
            self.complexity,
            self.load_hint,
            sep = SEPARATOR,
        )
    }
}

impl std::str::FromStr for StateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() != 7 {
            return Err(Error::Format(format!(
                "state key '{}' has {} components, expected 7",
                s,
                parts.len()
            )));
        }
        Ok(Self {
            input_type: parts[0].to_string(),
            priority: parts[1].to_string(),
            domain: parts[2].to_string(),
            time_of_day: parts[3].to_string(),
            audience: parts[4].to_string(),
            complexity: parts[5].to_string(),
            load_hint: parts[6].to_string(),
        })
    }
}

// External representation is the joined wire string.
impl Serialize for StateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
