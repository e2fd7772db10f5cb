use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A monitoring job as stored under `monitor/<name>`.
///
/// Only the fields the coordination layer cares about are typed; check
/// specific settings are carried in `extra` for the executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Check type (tcp, http, dns, exec, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Check target.
    #[serde(default)]
    pub target: Option<String>,

    /// Check interval, e.g. "10s".
    #[serde(default)]
    pub interval: Option<String>,

    /// Consecutive failures before a warning alert.
    #[serde(default, rename = "warning-threshold")]
    pub warning_threshold: Option<u32>,

    /// Consecutive failures before a critical alert.
    #[serde(default, rename = "critical-threshold")]
    pub critical_threshold: Option<u32>,

    /// Whether the job is disabled.
    #[serde(default)]
    pub disable: bool,

    /// Only members carrying this tag may run the job.
    #[serde(default, rename = "member-tag", skip_serializing_if = "Option::is_none")]
    pub member_tag: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobDefinition {
    /// Parse a stored job definition.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The required member tag; an empty tag means none.
    pub fn member_tag(&self) -> Option<&str> {
        self.member_tag.as_deref().filter(|tag| !tag.is_empty())
    }
}
