use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a derived member ID in hex characters.
const MEMBER_ID_LEN: usize = 8;

/// Unique, stable member identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the ID for a process from its hostname and listen address.
    ///
    /// The same host and address always yield the same ID, so a restarted
    /// process reclaims its previous membership entry.
    pub fn derive(hostname: &str, listen_address: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", hostname, listen_address).as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(MEMBER_ID_LEN);
        Self(id)
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Convenience status blob each member mirrors under its own entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    /// Member ID.
    pub member_id: MemberId,
    /// Hostname.
    pub hostname: String,
    /// Address the member's API listens on.
    pub listen_address: String,
    /// When this blob was written.
    pub last_updated: DateTime<Utc>,
    /// Member tags; jobs with a `member-tag` only go to members carrying it.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Version string.
    pub version: String,
}

impl MemberStatus {
    /// Build a status blob stamped with the current time.
    pub fn new(
        member_id: MemberId,
        hostname: impl Into<String>,
        listen_address: impl Into<String>,
        tags: Vec<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            member_id,
            hostname: hostname.into(),
            listen_address: listen_address.into(),
            last_updated: Utc::now(),
            tags,
            version: version.into(),
        }
    }

    /// Return a copy with a fresh timestamp.
    pub fn touched(&self) -> Self {
        Self {
            last_updated: Utc::now(),
            ..self.clone()
        }
    }
}
