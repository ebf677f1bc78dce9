//! Configuration management with file persistence

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Switchyard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub routing: RoutingConfig,
    pub telemetry: TelemetryConfig,
}

/// Learning parameters for the routing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Exploration rate ε in [0, 1]
    pub epsilon: f64,
    /// Learning rate α in (0, 1]
    pub learning_rate: f64,
    /// Discount factor γ in [0, 1]
    pub discount_factor: f64,
}

/// Telemetry server and observer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Address the WebSocket telemetry server binds to
    pub bind_addr: String,
    /// Events replayed to a newly attached observer
    pub history_limit: usize,
    /// Per-observer live queue capacity
    pub channel_capacity: usize,
    /// First reconnect delay for observers, in milliseconds
    pub reconnect_base_ms: u64,
    /// Upper bound on the observer reconnect delay, in milliseconds
    pub reconnect_cap_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig {
                epsilon: 0.1,
                learning_rate: 0.1,
                discount_factor: 0.9,
            },
            telemetry: TelemetryConfig {
                bind_addr: "127.0.0.1:9400".to_string(),
                history_limit: 100,
                channel_capacity: 256,
                reconnect_base_ms: 250,
                reconnect_cap_ms: 30_000,
            },
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SWITCHYARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("switchyard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or return defaults
    /// if no file exists yet
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        self.save_to(&dir.join("config.toml"))
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration ranges
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.routing.epsilon) {
            return Err(anyhow!("epsilon must be between 0.0 and 1.0"));
        }
        if !(self.routing.learning_rate > 0.0 && self.routing.learning_rate <= 1.0) {
            return Err(anyhow!("learning_rate must be in (0.0, 1.0]"));
        }
        if !(0.0..=1.0).contains(&self.routing.discount_factor) {
            return Err(anyhow!("discount_factor must be between 0.0 and 1.0"));
        }
        if self.telemetry.reconnect_base_ms == 0 {
            return Err(anyhow!("reconnect_base_ms must be positive"));
        }
        if self.telemetry.reconnect_cap_ms < self.telemetry.reconnect_base_ms {
            return Err(anyhow!("reconnect_cap_ms must be at least reconnect_base_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.routing.epsilon = 0.25;
        config.telemetry.bind_addr = "0.0.0.0:9999".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!((loaded.routing.epsilon - 0.25).abs() < 1e-12);
        assert_eq!(loaded.telemetry.bind_addr, "0.0.0.0:9999");
        assert_eq!(loaded.telemetry.history_limit, 100);
    }

    #[test]
    fn test_out_of_range_epsilon_rejected() {
        let mut config = Config::default();
        config.routing.epsilon = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_learning_rate_rejected() {
        let mut config = Config::default();
        config.routing.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "routing = \"not a table\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let mut config = Config::default();
        config.telemetry.reconnect_cap_ms = 10;
        assert!(config.validate().is_err());
    }
}
