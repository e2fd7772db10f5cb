use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::member::MemberId;
use crate::error::Result;

/// Contents of the well-known director key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorRecord {
    /// Member holding the director role.
    pub member_id: MemberId,
    /// Last heartbeat written by the director.
    pub last_update: DateTime<Utc>,
}

impl DirectorRecord {
    /// Create a record for `member_id` stamped now.
    pub fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            last_update: Utc::now(),
        }
    }

    /// Check if the lease has lapsed relative to `now`.
    pub fn is_expired_at(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        // A timestamp from the future (clock skew) counts as fresh.
        match now.signed_duration_since(self.last_update).to_std() {
            Ok(elapsed) => elapsed > timeout,
            Err(_) => false,
        }
    }

    /// Check if the lease has lapsed.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.is_expired_at(timeout, Utc::now())
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored record.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A director record together with the exact bytes it was read from.
///
/// Compare-and-swap must be performed against the stored text, not a
/// re-serialization of the parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDirector {
    pub record: DirectorRecord,
    pub raw: String,
}

impl ObservedDirector {
    /// Parse a raw stored value.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let record = DirectorRecord::from_json(&raw)?;
        Ok(Self { record, raw })
    }
}
