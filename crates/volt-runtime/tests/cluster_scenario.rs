//! Three members share one store: jobs are split, and a member that stops
//! heartbeating has its share moved to the survivors.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use volt_core::cluster::MemberId;
use volt_core::store::{ensure_layout, CoordinationStore, MemoryStore, SetOptions};
use volt_core::Component;
use volt_runtime::overwatch::FailureReport;
use volt_runtime::{Cluster, ClusterSettings, Director, DirectorState, MemberRegistry, OverwatchHandle};

struct Member {
    cluster: Cluster,
    director: Director,
    _reports: mpsc::Receiver<FailureReport>,
}

impl Member {
    fn new(store: &MemoryStore, id: &str) -> Self {
        let store: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let state = Arc::new(DirectorState::new());
        let (tx, rx) = mpsc::channel(16);
        let (overwatch, reports) = OverwatchHandle::channel(8);

        let settings = ClusterSettings {
            member_id: MemberId::from(id),
            hostname: "localhost".to_string(),
            listen_address: format!("127.0.0.1:{}", 9000 + id.len()),
            tags: Vec::new(),
            version: "test".to_string(),
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(200),
            failure_threshold: 3,
        };

        Self {
            cluster: Cluster::new(store.clone(), settings, state.clone(), tx.clone(), overwatch.clone()),
            director: Director::new(store, state, tx, rx, overwatch),
            _reports: reports,
        }
    }

    async fn start(&self) {
        self.cluster.start().await.unwrap();
        self.director.start().await.unwrap();
    }

    async fn crash(&self) {
        self.director.stop().await.unwrap();
        self.cluster.stop().await.unwrap();
    }
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn counts(registry: &MemberRegistry, ids: &[&str]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for id in ids {
        let count = registry.check_count(&MemberId::from(*id)).await.unwrap_or(0);
        counts.insert(id.to_string(), count);
    }
    counts
}

fn expected(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
    pairs.iter().map(|(id, n)| (id.to_string(), *n)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_follow_membership() {
    let store = MemoryStore::new().with_sweep_interval(Duration::from_millis(20));
    ensure_layout(&store).await.unwrap();
    for i in 0..10 {
        store
            .set(
                &format!("monitor/check{:02}", i),
                r#"{"type":"tcp","target":"127.0.0.1","interval":"10s"}"#,
                SetOptions::default(),
            )
            .await
            .unwrap();
    }

    let registry = &MemberRegistry::new(Arc::new(store.clone()));
    let m1 = Member::new(&store, "m1");
    let m2 = Member::new(&store, "m2");
    let m3 = Member::new(&store, "m3");

    m1.start().await;
    let first = &m1.cluster;
    assert!(wait_for(|| async move { first.is_director() }).await);
    m2.start().await;
    m3.start().await;

    let all = ["m1", "m2", "m3"];
    let split = &expected(&[("m1", 3), ("m2", 3), ("m3", 4)]);
    assert!(
        wait_for(|| async move { counts(registry, &all).await == *split }).await,
        "initial split was {:?}",
        counts(registry, &all).await
    );
    assert!(!m2.cluster.is_director());
    assert!(!m3.cluster.is_director());

    // m2 stops heartbeating without deregistering; its dir expires.
    m2.crash().await;

    let survivors = &expected(&[("m1", 5), ("m2", 0), ("m3", 5)]);
    assert!(
        wait_for(|| async move { counts(registry, &all).await == *survivors }).await,
        "split after expiry was {:?}",
        counts(registry, &all).await
    );
    assert_eq!(store.exists("cluster/members/m2").await.unwrap(), None);

    // A new job lands on the last member.
    store
        .set("monitor/check10", r#"{"type":"http"}"#, SetOptions::default())
        .await
        .unwrap();
    let grown = &expected(&[("m1", 5), ("m2", 0), ("m3", 6)]);
    assert!(wait_for(|| async move { counts(registry, &all).await == *grown }).await);

    m3.crash().await;
    m1.crash().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_director_failover_redistributes() {
    let store = MemoryStore::new().with_sweep_interval(Duration::from_millis(20));
    ensure_layout(&store).await.unwrap();
    for i in 0..4 {
        store
            .set(&format!("monitor/job{}", i), r#"{"type":"dns"}"#, SetOptions::default())
            .await
            .unwrap();
    }

    let registry = &MemberRegistry::new(Arc::new(store.clone()));
    let m1 = Member::new(&store, "m1");
    let m2 = Member::new(&store, "m2");

    m1.start().await;
    let first = &m1.cluster;
    assert!(wait_for(|| async move { first.is_director() }).await);
    m2.start().await;

    let both = ["m1", "m2"];
    assert!(
        wait_for(|| async move {
            counts(registry, &both).await == expected(&[("m1", 2), ("m2", 2)])
        })
        .await
    );

    // The director dies; m2 takes over and owns everything.
    m1.crash().await;
    let second = &m2.cluster;
    assert!(wait_for(|| async move { second.is_director() }).await);
    assert!(
        wait_for(|| async move {
            counts(registry, &both).await == expected(&[("m1", 0), ("m2", 4)])
        })
        .await
    );

    m2.crash().await;
}
