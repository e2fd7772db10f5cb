//! Membership and leadership.

mod engine;
mod heartbeat;
mod leader;
mod monitor;
mod registry;
mod state;

pub use engine::Cluster;
pub use heartbeat::MemberHeartbeat;
pub use leader::{DirectorElection, DirectorObservation};
pub use monitor::MemberMonitor;
pub use registry::MemberRegistry;
pub use state::{DirectorState, DirectorTransition};

use std::time::Duration;

use volt_core::cluster::{MemberId, MemberStatus};
use volt_core::config::ClusterConfig;
use volt_core::SharedConfig;

/// Identity and timing of the local member.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub member_id: MemberId,
    pub hostname: String,
    pub listen_address: String,
    pub tags: Vec<String>,
    pub version: String,
    /// How often heartbeats are written and the director record checked.
    pub heartbeat_interval: Duration,
    /// Lease length for the member dir and the director record.
    pub heartbeat_timeout: Duration,
    /// Consecutive loop failures before overwatch is notified.
    pub failure_threshold: u32,
}

impl ClusterSettings {
    /// Combine local identity with the cluster-wide timing.
    pub fn new(
        member_id: MemberId,
        hostname: impl Into<String>,
        listen_address: impl Into<String>,
        shared: &SharedConfig,
        cluster: &ClusterConfig,
    ) -> Self {
        Self {
            member_id,
            hostname: hostname.into(),
            listen_address: listen_address.into(),
            tags: Vec::new(),
            version: String::new(),
            heartbeat_interval: shared.heartbeat_interval,
            heartbeat_timeout: shared.heartbeat_timeout,
            failure_threshold: cluster.failure_threshold,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Status blob describing this member right now.
    pub fn status(&self) -> MemberStatus {
        MemberStatus::new(
            self.member_id.clone(),
            self.hostname.clone(),
            self.listen_address.clone(),
            self.tags.clone(),
            self.version.clone(),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use volt_core::store::{
        CoordinationStore, MemoryStore, Node, SetOptions, StoreFuture, Watcher,
    };
    use volt_core::VoltError;

    /// A `MemoryStore` whose next deletes can be made to fail.
    pub struct FlakyStore {
        pub inner: MemoryStore,
        failing_deletes: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                failing_deletes: AtomicUsize::new(0),
            }
        }

        pub fn fail_next_deletes(&self, count: usize) {
            self.failing_deletes.store(count, Ordering::SeqCst);
        }
    }

    impl CoordinationStore for FlakyStore {
        fn get<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, Vec<Node>> {
            self.inner.get(key, recursive)
        }

        fn set<'a>(
            &'a self,
            key: &'a str,
            value: &'a str,
            options: SetOptions,
        ) -> StoreFuture<'a, ()> {
            self.inner.set(key, value, options)
        }

        fn refresh<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
            self.inner.refresh(key, ttl)
        }

        fn delete<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, ()> {
            let failing = self
                .failing_deletes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Box::pin(async { Err(VoltError::Store("delete refused".to_string())) });
            }
            self.inner.delete(key, recursive)
        }

        fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<bool>> {
            self.inner.exists(key)
        }

        fn watch(&self, prefix: &str, recursive: bool) -> Box<dyn Watcher> {
            self.inner.watch(prefix, recursive)
        }
    }

    /// Settings with short timings for tests.
    pub fn settings(id: &str) -> ClusterSettings {
        ClusterSettings {
            member_id: MemberId::from(id),
            hostname: "localhost".to_string(),
            listen_address: "127.0.0.1:8080".to_string(),
            tags: Vec::new(),
            version: "test".to_string(),
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_millis(400),
            failure_threshold: 3,
        }
    }
}
