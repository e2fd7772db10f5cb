use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use volt_core::cluster::MemberId;
use volt_core::store::keys::{check_reference_key, member_config_dir, member_dir};
use volt_core::store::{CoordinationStore, SetOptions};
use volt_core::Result;

use super::plan::Assignment;

/// Outcome of applying an assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub removed: usize,
    /// Members whose dir vanished before their references were written.
    pub skipped_members: usize,
}

/// Check references stored under each member's `config` dir.
#[derive(Clone)]
pub struct CheckReferences {
    store: Arc<dyn CoordinationStore>,
}

impl CheckReferences {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Reference key -> job key for one member.
    pub async fn fetch(&self, member: &MemberId) -> Result<BTreeMap<String, String>> {
        match self.store.get(&member_config_dir(member), false).await {
            Ok(nodes) => Ok(nodes
                .into_iter()
                .filter(|n| !n.dir)
                .map(|n| (n.key, n.value))
                .collect()),
            Err(e) if e.is_key_not_found() => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Make the stored references match `assignment`.
    ///
    /// References not in the plan are removed and missing ones are created,
    /// member by member; references that already match are left alone.
    pub async fn apply(&self, assignment: &Assignment) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        for (member, jobs) in assignment {
            // Writing under an expired member would resurrect it without a TTL.
            if self.store.exists(&member_dir(member)).await?.is_none() {
                tracing::warn!(member_id = %member, "Member left during distribution; skipping");
                summary.skipped_members += 1;
                continue;
            }

            let existing = self.fetch(member).await?;
            let desired: BTreeMap<String, &String> = jobs
                .iter()
                .map(|job| (check_reference_key(member, job), job))
                .collect();

            for (key, _) in existing.iter().filter(|(k, _)| !desired.contains_key(*k)) {
                match self.store.delete(key, false).await {
                    Ok(()) => summary.removed += 1,
                    Err(e) if e.is_key_not_found() => {}
                    Err(e) => return Err(e),
                }
            }

            let existing: BTreeSet<&String> = existing.keys().collect();
            for (key, job) in desired.iter().filter(|(k, _)| !existing.contains(k)) {
                self.store.set(key, job, SetOptions::default()).await?;
                summary.created += 1;
            }

            tracing::debug!(member_id = %member, checks = jobs.len(), "Applied check references");
        }

        Ok(summary)
    }
}
