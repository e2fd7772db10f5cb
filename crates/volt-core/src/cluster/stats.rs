use std::collections::BTreeMap;

use serde::Serialize;

use super::director::DirectorRecord;
use super::member::MemberId;

/// Snapshot of cluster membership for status consumers.
///
/// Built best-effort: a member whose status cannot be read is listed in
/// `errors` instead of failing the whole snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStats {
    /// Status blob of every member, keyed by member ID.
    pub members: BTreeMap<MemberId, serde_json::Value>,
    /// Current director record, if any.
    pub director: Option<DirectorRecord>,
    /// Number of jobs assigned to each member.
    pub check_counts: BTreeMap<MemberId, usize>,
    /// Errors collected while building the snapshot.
    pub errors: Vec<String>,
}

impl ClusterStats {
    /// Number of members in the snapshot.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if any part of the snapshot failed to load.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}
