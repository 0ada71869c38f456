//! Configuration management

use crate::domain::signaling::liveness::LIVENESS_THRESHOLD_MS;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Collection holding one document per call
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Heartbeat skew beyond which a peer is presumed gone
    pub liveness_threshold_ms: i64,
    /// Suggested heartbeat tick interval for the engine's owner
    pub heartbeat_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            signaling: SignalingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: "call".to_string(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_ms: LIVENESS_THRESHOLD_MS,
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.collection, "call");
        assert_eq!(config.signaling.liveness_threshold_ms, 60_000);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let path = std::env::temp_dir().join("holler-config-test.toml");
        std::fs::write(&path, "[store]\ncollection = \"calls_v2\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.store.collection, "calls_v2");
        assert_eq!(config.signaling.liveness_threshold_ms, 60_000);

        assert!(Config::from_file("/nonexistent/holler.toml").is_err());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [signaling]
            liveness_threshold_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.signaling.liveness_threshold_ms, 30_000);
        assert_eq!(config.signaling.heartbeat_interval_ms, 15_000);
        assert_eq!(config.store.collection, "call");
    }
}
