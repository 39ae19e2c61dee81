//! Configuration handling for the channel client.
//!
//! This module reads configuration from a YAML file and environment
//! variables, providing a unified configuration interface for the binary.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Channel client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Broker control-channel endpoint
    pub endpoint: String,
    /// Application name (and challenge signing domain)
    pub application: String,
    /// Permission scope requested during authentication
    pub scope: String,
    /// Spending allowance cap declared during authentication
    pub allowance: String,
    /// Asset symbol for session allocations
    pub asset: String,
    /// Principal's initial allocation amount for new sessions
    pub session_amount: String,
    /// Per-request timeout (seconds)
    pub timeout: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".to_string(),
            application: "clearway".to_string(),
            scope: "app.create".to_string(),
            allowance: "0".to_string(),
            asset: "usdc".to_string(),
            session_amount: "0".to_string(),
            timeout: 30,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    broker: Option<BrokerSection>,
}

#[derive(Debug, Deserialize)]
struct BrokerSection {
    endpoint: Option<String>,
    application: Option<String>,
    scope: Option<String>,
    allowance: Option<String>,
    asset: Option<String>,
    session_amount: Option<String>,
    timeout: Option<u32>,
}

impl ChannelConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        // Try to read the config file
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(root_config) = serde_yaml::from_str::<RootConfig>(&content) {
                config.apply_root_config(root_config);
                info!("Loaded configuration from {:?}", config_path.as_ref());
            } else {
                warn!(
                    "Failed to parse config file {:?}, using defaults",
                    config_path.as_ref()
                );
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        // Override with environment variables
        config.apply_environment_overrides();

        info!(
            "Final channel configuration: endpoint={}, application={}, asset={}",
            config.endpoint, config.application, config.asset
        );

        Ok(config)
    }

    /// Apply configuration from the root config structure
    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(broker) = root_config.broker {
            if let Some(endpoint) = broker.endpoint {
                self.endpoint = endpoint;
            }
            if let Some(application) = broker.application {
                self.application = application;
            }
            if let Some(scope) = broker.scope {
                self.scope = scope;
            }
            if let Some(allowance) = broker.allowance {
                self.allowance = allowance;
            }
            if let Some(asset) = broker.asset {
                self.asset = asset;
            }
            if let Some(session_amount) = broker.session_amount {
                self.session_amount = session_amount;
            }
            if let Some(timeout) = broker.timeout {
                self.timeout = timeout;
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("CLEARWAY_ENDPOINT") {
            self.endpoint = endpoint;
            info!("Endpoint overridden by environment: {}", self.endpoint);
        }

        if let Ok(application) = std::env::var("CLEARWAY_APPLICATION") {
            self.application = application;
            info!("Application overridden by environment: {}", self.application);
        }

        if let Ok(asset) = std::env::var("CLEARWAY_ASSET") {
            self.asset = asset;
            info!("Asset overridden by environment: {}", self.asset);
        }

        if let Ok(timeout) = std::env::var("CLEARWAY_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u32>() {
                self.timeout = seconds;
                info!("Request timeout overridden by environment: {}s", seconds);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8000/ws");
        assert_eq!(config.application, "clearway");
        assert_eq!(config.asset, "usdc");
        assert_eq!(config.timeout, 30);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
broker:
  endpoint: wss://broker.test/ws
  application: clearway-game
  scope: app.create
  allowance: "250"
  asset: usdc
  session_amount: "10"
  timeout: 15
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ChannelConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.endpoint, "wss://broker.test/ws");
        assert_eq!(config.application, "clearway-game");
        assert_eq!(config.allowance, "250");
        assert_eq!(config.session_amount, "10");
        assert_eq!(config.timeout, 15);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ChannelConfig::load_from_file("/nonexistent/config.yaml").unwrap();
        assert_eq!(config.application, "clearway");
    }
}
