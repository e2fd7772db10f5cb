use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::cluster::ClusterConfig;
use super::duration::{format_duration, parse_duration};
use crate::error::{Result, VoltError};
use crate::store::{CoordinationStore, SetOptions};

/// Key holding the cluster-wide timing configuration.
pub const SHARED_CONFIG_KEY: &str = "config";

/// Value written when the shared configuration does not exist yet.
pub const DEFAULT_SHARED_CONFIG: &str =
    r#"{"HeartbeatInterval":"3s","HeartbeatTimeout":"6s","StateDumpInterval":"10s"}"#;

/// Timing shared by every member, stored in the coordination store.
///
/// All members must agree on heartbeat timing or leases would be judged
/// inconsistently, so the stored copy wins over local configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(rename = "HeartbeatInterval", with = "duration_str")]
    pub heartbeat_interval: Duration,

    #[serde(rename = "HeartbeatTimeout", with = "duration_str")]
    pub heartbeat_timeout: Duration,

    #[serde(rename = "StateDumpInterval", with = "duration_str")]
    pub state_dump_interval: Duration,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(6),
            state_dump_interval: Duration::from_secs(10),
        }
    }
}

impl SharedConfig {
    /// Seed values from local cluster configuration.
    pub fn from_cluster_config(config: &ClusterConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            ..Self::default()
        }
    }

    /// Parse and validate a stored blob.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| VoltError::Config(format!("Unable to parse shared config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(VoltError::Config("'HeartbeatInterval' cannot be 0".to_string()));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(VoltError::Config("'HeartbeatTimeout' cannot be 0".to_string()));
        }
        if self.state_dump_interval.is_zero() {
            return Err(VoltError::Config("'StateDumpInterval' cannot be 0".to_string()));
        }
        Ok(())
    }

    /// Load the shared configuration, creating it from `seed` if missing.
    pub async fn load(store: &dyn CoordinationStore, seed: &SharedConfig) -> Result<Self> {
        match store.exists(SHARED_CONFIG_KEY).await? {
            None => {
                seed.validate()?;
                let raw = serde_json::to_string(seed)?;
                match store
                    .set(SHARED_CONFIG_KEY, &raw, SetOptions::create_only())
                    .await
                {
                    Ok(()) => {
                        tracing::info!("Created initial shared config");
                        Ok(seed.clone())
                    }
                    // Another member seeded it first; use theirs.
                    Err(e) if e.is_lost_race() => Self::read(store).await,
                    Err(e) => Err(e),
                }
            }
            Some(true) => Err(VoltError::Config(format!(
                "'{}' exists but is a dir",
                SHARED_CONFIG_KEY
            ))),
            Some(false) => Self::read(store).await,
        }
    }

    async fn read(store: &dyn CoordinationStore) -> Result<Self> {
        let nodes = store.get(SHARED_CONFIG_KEY, false).await?;
        let node = nodes.into_iter().next().ok_or_else(|| {
            VoltError::Config(format!("'{}' missing in returned data", SHARED_CONFIG_KEY))
        })?;
        Self::parse(&node.value)
    }
}

mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Nanos(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
            Raw::Nanos(n) => Ok(Duration::from_nanos(n)),
        }
    }
}
