use std::sync::Arc;

use volt_core::cluster::{ClusterStats, MemberId, MemberStatus, ObservedDirector};
use volt_core::store::keys::{
    basename, job_name, member_config_dir, member_status_key, DIRECTOR_KEY, MEMBERS_DIR,
    MONITOR_DIR,
};
use volt_core::store::{CoordinationStore, Node};
use volt_core::{Result, VoltError};

/// Read-only view of membership and job definitions.
///
/// Every call reads from the store; nothing is cached.
#[derive(Clone)]
pub struct MemberRegistry {
    store: Arc<dyn CoordinationStore>,
}

impl MemberRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Live member IDs, sorted.
    pub async fn list_members(&self) -> Result<Vec<MemberId>> {
        let nodes = self.children(MEMBERS_DIR).await?;
        let mut members: Vec<MemberId> = nodes
            .into_iter()
            .filter(|n| n.dir)
            .map(|n| MemberId::from(basename(&n.key)))
            .collect();
        members.sort();
        Ok(members)
    }

    /// Read a member's status blob.
    pub async fn member_status(&self, id: &MemberId) -> Result<MemberStatus> {
        let key = member_status_key(id);
        let node = self
            .store
            .get(&key, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VoltError::KeyNotFound(key.clone()))?;
        Ok(serde_json::from_str(&node.value)?)
    }

    /// Tags a member advertises in its status blob.
    ///
    /// A member whose status is missing or unreadable counts as untagged.
    pub async fn member_tags(&self, id: &MemberId) -> Result<Vec<String>> {
        match self.member_status(id).await {
            Ok(status) => Ok(status.tags),
            Err(e) if e.is_key_not_found() => {
                tracing::debug!(member_id = %id, "No status yet; treating member as untagged");
                Ok(Vec::new())
            }
            Err(VoltError::Deserialization(e)) => {
                tracing::warn!(
                    member_id = %id,
                    error = %e,
                    "Unreadable status; treating member as untagged"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Job definition keys and raw values, sorted by key.
    ///
    /// Only direct values under `monitor/` count as jobs.
    pub async fn list_jobs(&self) -> Result<Vec<(String, String)>> {
        let mut jobs: Vec<(String, String)> = self
            .children(MONITOR_DIR)
            .await?
            .into_iter()
            .filter(|n| !n.dir && job_name(&n.key).is_some())
            .map(|n| (n.key, n.value))
            .collect();
        jobs.sort();
        Ok(jobs)
    }

    /// Number of check references held by a member.
    pub async fn check_count(&self, id: &MemberId) -> Result<usize> {
        Ok(self
            .children(&member_config_dir(id))
            .await?
            .into_iter()
            .filter(|n| !n.dir)
            .count())
    }

    /// Best-effort snapshot; per-member failures are collected, not fatal.
    pub async fn cluster_stats(&self) -> Result<ClusterStats> {
        let mut stats = ClusterStats::default();

        match self.store.get(DIRECTOR_KEY, false).await {
            Ok(nodes) => {
                if let Some(node) = nodes.into_iter().next() {
                    match ObservedDirector::parse(node.value) {
                        Ok(observed) => stats.director = Some(observed.record),
                        Err(e) => stats.errors.push(format!("director: {}", e)),
                    }
                }
            }
            Err(e) if e.is_key_not_found() => {}
            Err(e) => stats.errors.push(format!("director: {}", e)),
        }

        for id in self.list_members().await? {
            let key = member_status_key(&id);
            match self.store.get(&key, false).await {
                Ok(nodes) => {
                    let value = nodes.into_iter().next().map(|n| n.value).unwrap_or_default();
                    let blob = serde_json::from_str(&value)
                        .unwrap_or(serde_json::Value::String(value));
                    stats.members.insert(id.clone(), blob);
                }
                Err(e) => stats.errors.push(format!("{}: {}", id, e)),
            }

            match self.check_count(&id).await {
                Ok(count) => {
                    stats.check_counts.insert(id, count);
                }
                Err(e) => stats.errors.push(format!("{} checks: {}", id, e)),
            }
        }

        Ok(stats)
    }

    /// Direct children of a dir; a missing dir has none.
    async fn children(&self, key: &str) -> Result<Vec<Node>> {
        match self.store.get(key, false).await {
            Ok(nodes) => Ok(nodes),
            Err(e) if e.is_key_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::cluster::DirectorRecord;
    use volt_core::store::{MemoryStore, SetOptions};

    async fn seed(store: &MemoryStore) {
        for id in ["m2", "m1"] {
            let status = MemberStatus::new(MemberId::from(id), "host", "127.0.0.1:8080", vec![], "test");
            store
                .set(
                    &format!("cluster/members/{}/status", id),
                    &serde_json::to_string(&status).unwrap(),
                    SetOptions::default(),
                )
                .await
                .unwrap();
        }
        store.set("monitor/b", r#"{"type":"tcp"}"#, SetOptions::default()).await.unwrap();
        store.set("monitor/a", r#"{"type":"http"}"#, SetOptions::default()).await.unwrap();
        store.set("monitor/group/nested", "x", SetOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_members_sorted() {
        let store = MemoryStore::new();
        seed(&store).await;
        let registry = MemberRegistry::new(Arc::new(store));

        let members = registry.list_members().await.unwrap();
        assert_eq!(members, vec![MemberId::from("m1"), MemberId::from("m2")]);
    }

    #[tokio::test]
    async fn test_member_tags() {
        let store = MemoryStore::new();
        seed(&store).await;
        let tagged = MemberStatus::new(
            MemberId::from("m4"),
            "host",
            "127.0.0.1:8080",
            vec!["dc1".to_string()],
            "test",
        );
        store
            .set(
                "cluster/members/m4/status",
                &serde_json::to_string(&tagged).unwrap(),
                SetOptions::default(),
            )
            .await
            .unwrap();
        store.set("cluster/members/m5", "", SetOptions::dir()).await.unwrap();
        store.set("cluster/members/m6/status", "garbage", SetOptions::default()).await.unwrap();
        let registry = MemberRegistry::new(Arc::new(store));

        assert_eq!(registry.member_tags(&MemberId::from("m4")).await.unwrap(), vec!["dc1"]);
        assert!(registry.member_tags(&MemberId::from("m1")).await.unwrap().is_empty());
        assert!(registry.member_tags(&MemberId::from("m5")).await.unwrap().is_empty());
        assert!(registry.member_tags(&MemberId::from("m6")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let registry = MemberRegistry::new(Arc::new(MemoryStore::new()));
        assert!(registry.list_members().await.unwrap().is_empty());
        assert!(registry.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_jobs_skips_nested() {
        let store = MemoryStore::new();
        seed(&store).await;
        let registry = MemberRegistry::new(Arc::new(store));

        let jobs: Vec<String> = registry.list_jobs().await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(jobs, vec!["monitor/a", "monitor/b"]);
    }

    #[tokio::test]
    async fn test_cluster_stats_collects_errors() {
        let store = MemoryStore::new();
        seed(&store).await;
        store
            .set(
                DIRECTOR_KEY,
                &DirectorRecord::new(MemberId::from("m1")).to_json().unwrap(),
                SetOptions::default(),
            )
            .await
            .unwrap();
        // m3 has a dir but no status key.
        store.set("cluster/members/m3", "", SetOptions::dir()).await.unwrap();
        store
            .set("cluster/members/m1/config/6d2f61", "monitor/a", SetOptions::default())
            .await
            .unwrap();

        let registry = MemberRegistry::new(Arc::new(store));
        let stats = registry.cluster_stats().await.unwrap();

        assert_eq!(stats.member_count(), 2);
        assert_eq!(stats.director.unwrap().member_id.as_str(), "m1");
        assert_eq!(stats.check_counts.get(&MemberId::from("m1")), Some(&1));
        assert_eq!(stats.check_counts.get(&MemberId::from("m3")), Some(&0));
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].starts_with("m3"));
    }
}
