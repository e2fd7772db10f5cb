use serde::{Deserialize, Serialize};

/// Coordination store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which store implementation to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL (postgres backend).
    #[serde(default)]
    pub url: String,

    /// Key prefix every key is stored under.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool acquire timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: String::new(),
            prefix: default_prefix(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
        }
    }
}

fn default_prefix() -> String {
    "volt".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    5
}

/// Store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; a single-member cluster.
    #[default]
    Memory,

    /// PostgreSQL table with LISTEN/NOTIFY watches.
    Postgres,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_config() {
        let toml = r#"
            backend = "postgres"
            url = "postgres://localhost/volt"
            pool_size = 4
        "#;

        let config: StoreConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend, StoreBackend::Postgres);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.prefix, "volt");
    }
}
