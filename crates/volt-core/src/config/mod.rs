mod cluster;
mod duration;
mod observability;
mod shared;
mod store;

pub use cluster::{ClusterConfig, OverwatchConfig};
pub use duration::{format_duration, parse_duration};
pub use observability::{LoggingConfig, ObservabilityConfig};
pub use shared::{SharedConfig, DEFAULT_SHARED_CONFIG, SHARED_CONFIG_KEY};
pub use store::{StoreBackend, StoreConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, VoltError};

/// Root configuration for a volt process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoltConfig {
    /// Node configuration.
    #[serde(default)]
    pub node: NodeConfig,

    /// Coordination store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Cluster configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Failure supervisor configuration.
    #[serde(default)]
    pub overwatch: OverwatchConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl VoltConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VoltError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| VoltError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VoltError::Serialization(format!("Failed to render config: {}", e)))
    }
}

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the status API listens on; also seeds the member ID.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Member tags (reported in the status blob).
    #[serde(default)]
    pub tags: Vec<String>,

    /// Explicit member ID; derived from hostname and listen address when unset.
    #[serde(default)]
    pub member_id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            tags: Vec::new(),
            member_id: None,
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VoltConfig::default();
        assert_eq!(config.node.listen_address, "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.prefix, "volt");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = VoltConfig::parse_toml("").unwrap();
        assert_eq!(config.cluster.failure_threshold, 3);
        assert_eq!(config.overwatch.health_watch_secs, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [node]
            listen_address = "10.0.0.5:9090"
            tags = ["dc1", "edge"]

            [store]
            backend = "postgres"
            url = "postgres://localhost/volt"
            prefix = "monitoring"

            [cluster]
            heartbeat_interval_secs = 2
            heartbeat_timeout_secs = 5

            [overwatch]
            health_watch_secs = 30

            [observability.logging]
            level = "debug"
            json_format = true
        "#;

        let config = VoltConfig::parse_toml(toml).unwrap();
        assert_eq!(config.node.listen_address, "10.0.0.5:9090");
        assert_eq!(config.node.tags, vec!["dc1", "edge"]);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.prefix, "monitoring");
        assert_eq!(config.cluster.heartbeat_interval_secs, 2);
        assert_eq!(config.overwatch.health_watch_secs, 30);
        assert!(config.observability.logging.json_format);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("VOLT_TEST_STORE_URL", "postgres://volt:volt@db/volt");

        let toml = r#"
            [store]
            backend = "postgres"
            url = "${VOLT_TEST_STORE_URL}"
        "#;

        let config = VoltConfig::parse_toml(toml).unwrap();
        assert_eq!(config.store.url, "postgres://volt:volt@db/volt");

        std::env::remove_var("VOLT_TEST_STORE_URL");
    }

    #[test]
    fn test_default_config_renders_and_parses() {
        let rendered = VoltConfig::default().to_toml().unwrap();
        let parsed = VoltConfig::parse_toml(&rendered).unwrap();
        assert_eq!(parsed.node.listen_address, "0.0.0.0:8080");
    }
}
