//! Work distribution.
//!
//! While this member is director, every membership change, job definition
//! change or takeover produces a distribute request. Requests are consumed by
//! a single listener, coalesced, and each pass recomputes the full assignment
//! from the store.

mod plan;
mod refs;
mod watcher;

pub use plan::{plan, Assignment, Candidate, Plan, PlannedJob, UNTAGGED};
pub use refs::{ApplySummary, CheckReferences};
pub use watcher::{is_job_change, watch_jobs};

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use volt_core::cluster::MemberId;
use volt_core::store::CoordinationStore;
use volt_core::{Component, ComponentFuture, JobDefinition, Result, VoltError};

use crate::cluster::{DirectorState, MemberRegistry};
use crate::overwatch::OverwatchHandle;

/// Why a redistribution was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributeRequest {
    /// This member just became director.
    Takeover,
    MemberJoined(MemberId),
    MemberLeft(MemberId),
    /// A job definition under `monitor/` changed.
    JobChanged(String),
}

/// Queue a request without blocking. A full queue already holds a pending
/// pass that will pick up this change too.
pub fn request_distribution(tx: &mpsc::Sender<DistributeRequest>, request: DistributeRequest) {
    match tx.try_send(request) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(request)) => {
            tracing::debug!(?request, "Distribution already pending");
        }
        Err(mpsc::error::TrySendError::Closed(request)) => {
            tracing::warn!(?request, "Director is not listening; request dropped");
        }
    }
}

/// Result of a distribution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributeSummary {
    pub members: usize,
    pub jobs: usize,
    /// Jobs whose member tag no live member carries.
    pub orphaned: usize,
    pub applied: ApplySummary,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared between the director's tasks.
struct Shared {
    store: Arc<dyn CoordinationStore>,
    registry: MemberRegistry,
    refs: CheckReferences,
    state: Arc<DirectorState>,
    distribute_tx: mpsc::Sender<DistributeRequest>,
    // Outlives stop/start cycles so queued requests are not lost.
    distribute_rx: tokio::sync::Mutex<mpsc::Receiver<DistributeRequest>>,
    overwatch: OverwatchHandle,
}

/// The work distributor component.
pub struct Director {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Director {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        state: Arc<DirectorState>,
        distribute_tx: mpsc::Sender<DistributeRequest>,
        distribute_rx: mpsc::Receiver<DistributeRequest>,
        overwatch: OverwatchHandle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: MemberRegistry::new(store.clone()),
                refs: CheckReferences::new(store.clone()),
                store,
                state,
                distribute_tx,
                distribute_rx: tokio::sync::Mutex::new(distribute_rx),
                overwatch,
            }),
            running: Mutex::new(None),
        }
    }

    /// Recompute and store the assignment.
    ///
    /// Fails with `NotDirector` if directorship was lost before the pass,
    /// `NoMembers` if nobody is registered, or a deserialization error if a
    /// job definition is malformed. Nothing is written in those cases.
    pub async fn distribute(&self) -> Result<DistributeSummary> {
        self.shared.distribute().await
    }

    /// Sender for distribute requests.
    pub fn requests(&self) -> mpsc::Sender<DistributeRequest> {
        self.shared.distribute_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn start_tasks(&self) {
        let mut running = self.lock_running();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(self.shared.clone().state_listener(cancel.clone())),
            tokio::spawn(self.shared.clone().distribute_listener(cancel.clone())),
        ];
        *running = Some(Running { cancel, tasks });

        tracing::info!("Director started");
    }

    async fn stop_inner(&self) -> Result<()> {
        let running = self.lock_running().take();
        let Some(running) = running else {
            return Ok(());
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Director task ended abnormally");
            }
        }
        tracing::info!("Director stopped");
        Ok(())
    }
}

impl Shared {
    async fn distribute(&self) -> Result<DistributeSummary> {
        if !self.state.get() {
            return Err(VoltError::NotDirector);
        }

        let mut candidates = Vec::new();
        for id in self.registry.list_members().await? {
            let tags = self.registry.member_tags(&id).await?;
            candidates.push(Candidate::new(id, tags));
        }

        let mut jobs = Vec::new();
        for (key, raw) in self.registry.list_jobs().await? {
            let definition = JobDefinition::parse(&raw).map_err(|e| {
                VoltError::Deserialization(format!("job definition '{}': {}", key, e))
            })?;
            let member_tag = definition.member_tag().map(str::to_string);
            jobs.push(PlannedJob::new(key, member_tag));
        }

        let plan = plan(&candidates, &jobs)?;
        if !plan.orphaned.is_empty() {
            tracing::warn!(
                orphaned = ?plan.orphaned,
                "No member carries the tag these checks require; leaving them unassigned"
            );
        }
        let applied = self.refs.apply(&plan.assignment).await?;

        Ok(DistributeSummary {
            members: candidates.len(),
            jobs: jobs.len(),
            orphaned: plan.orphaned.len(),
            applied,
        })
    }

    /// Start or stop the job watcher as directorship changes.
    async fn state_listener(self: Arc<Self>, cancel: CancellationToken) {
        let mut state_rx = self.state.subscribe();
        let mut watcher: Option<CancellationToken> = None;
        let mut seen_takeovers = 0u64;

        loop {
            let transition = *state_rx.borrow_and_update();

            if transition.is_director && transition.takeovers != seen_takeovers {
                seen_takeovers = transition.takeovers;
                // A loss and regain between two wakeups still restarts the watcher.
                if let Some(token) = watcher.take() {
                    token.cancel();
                }

                let token = cancel.child_token();
                tokio::spawn(watch_jobs(
                    self.store.clone(),
                    self.distribute_tx.clone(),
                    self.overwatch.clone(),
                    token.clone(),
                ));
                watcher = Some(token);

                tracing::info!(takeovers = seen_takeovers, "Took over as director; distributing");
                request_distribution(&self.distribute_tx, DistributeRequest::Takeover);
            } else if !transition.is_director {
                if let Some(token) = watcher.take() {
                    token.cancel();
                    tracing::info!("No longer director; stopped job watcher");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(token) = watcher.take() {
            token.cancel();
        }
    }

    /// Serve distribute requests one pass at a time.
    async fn distribute_listener(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let (request, coalesced) = {
                let mut rx = self.distribute_rx.lock().await;
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                let mut coalesced = 0usize;
                while rx.try_recv().is_ok() {
                    coalesced += 1;
                }
                (request, coalesced)
            };

            match self.distribute().await {
                Ok(summary) => tracing::info!(
                    ?request,
                    coalesced,
                    members = summary.members,
                    jobs = summary.jobs,
                    orphaned = summary.orphaned,
                    created = summary.applied.created,
                    removed = summary.applied.removed,
                    "Distributed checks"
                ),
                Err(VoltError::NotDirector) => {
                    tracing::debug!(?request, "Not director; ignoring distribute request")
                }
                Err(VoltError::NoMembers) => {
                    tracing::warn!(?request, "No members available; will retry on next change")
                }
                Err(e) => tracing::error!(?request, error = %e, "Distribution failed"),
            }
        }

        tracing::debug!("Distribute listener shutting down");
    }
}

impl Component for Director {
    fn identify(&self) -> &str {
        "director"
    }

    fn start(&self) -> ComponentFuture<'_> {
        Box::pin(async move {
            self.start_tasks();
            Ok(())
        })
    }

    fn stop(&self) -> ComponentFuture<'_> {
        Box::pin(self.stop_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use volt_core::cluster::MemberStatus;
    use volt_core::store::keys::{member_config_dir, member_status_key};
    use volt_core::store::{MemoryStore, SetOptions};

    struct Fixture {
        store: MemoryStore,
        state: Arc<DirectorState>,
        director: Arc<Director>,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let state = Arc::new(DirectorState::new());
        let (tx, rx) = mpsc::channel(16);
        let (overwatch, _reports) = OverwatchHandle::channel(8);
        let director = Arc::new(Director::new(
            Arc::new(store.clone()),
            state.clone(),
            tx,
            rx,
            overwatch,
        ));
        Fixture {
            store,
            state,
            director,
        }
    }

    async fn add_member(store: &MemoryStore, id: &str) {
        store
            .set(&member_config_dir(&MemberId::from(id)), "", SetOptions::dir())
            .await
            .unwrap();
    }

    async fn add_job(store: &MemoryStore, name: &str) {
        store
            .set(&format!("monitor/{}", name), r#"{"type":"tcp"}"#, SetOptions::default())
            .await
            .unwrap();
    }

    async fn add_tagged_member(store: &MemoryStore, id: &str, tags: &[&str]) {
        add_member(store, id).await;
        let status = MemberStatus::new(
            MemberId::from(id),
            "host",
            "127.0.0.1:8080",
            tags.iter().map(|t| t.to_string()).collect(),
            "test",
        );
        store
            .set(
                &member_status_key(&MemberId::from(id)),
                &serde_json::to_string(&status).unwrap(),
                SetOptions::default(),
            )
            .await
            .unwrap();
    }

    async fn add_tagged_job(store: &MemoryStore, name: &str, tag: &str) {
        store
            .set(
                &format!("monitor/{}", name),
                &format!(r#"{{"type":"tcp","member-tag":"{}"}}"#, tag),
                SetOptions::default(),
            )
            .await
            .unwrap();
    }

    async fn count(director: &Director, id: &str) -> usize {
        director.shared.registry.check_count(&MemberId::from(id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_distribute_requires_director() {
        let f = fixture();
        assert!(matches!(f.director.distribute().await, Err(VoltError::NotDirector)));
    }

    #[tokio::test]
    async fn test_distribute_without_members_writes_nothing() {
        let f = fixture();
        f.state.set(true);
        add_job(&f.store, "a").await;

        assert!(matches!(f.director.distribute().await, Err(VoltError::NoMembers)));
        assert_eq!(f.store.exists("cluster/members").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_job_aborts_pass() {
        let f = fixture();
        f.state.set(true);
        add_member(&f.store, "m1").await;
        add_job(&f.store, "a").await;
        f.store.set("monitor/b", "not json", SetOptions::default()).await.unwrap();

        let err = f.director.distribute().await.unwrap_err();
        assert!(matches!(err, VoltError::Deserialization(_)));
        assert!(err.to_string().contains("monitor/b"));
        assert_eq!(count(&f.director, "m1").await, 0);
    }

    #[tokio::test]
    async fn test_distribute_splits_jobs() {
        let f = fixture();
        f.state.set(true);
        for id in ["m1", "m2", "m3"] {
            add_member(&f.store, id).await;
        }
        for i in 0..10 {
            add_job(&f.store, &format!("job{}", i)).await;
        }

        let summary = f.director.distribute().await.unwrap();
        assert_eq!(summary.members, 3);
        assert_eq!(summary.jobs, 10);
        assert_eq!(summary.applied.created, 10);

        assert_eq!(count(&f.director, "m1").await, 3);
        assert_eq!(count(&f.director, "m2").await, 3);
        assert_eq!(count(&f.director, "m3").await, 4);
    }

    #[tokio::test]
    async fn test_distribute_routes_by_member_tag() {
        let f = fixture();
        f.state.set(true);
        add_tagged_member(&f.store, "m1", &["dc1"]).await;
        add_tagged_member(&f.store, "m2", &["dc1"]).await;
        add_tagged_member(&f.store, "m3", &[]).await;
        // No status yet; counts as untagged.
        add_member(&f.store, "m4").await;

        for name in ["a", "b", "c"] {
            add_tagged_job(&f.store, name, "dc1").await;
        }
        add_tagged_job(&f.store, "lost", "dc9").await;
        add_job(&f.store, "x").await;
        add_job(&f.store, "y").await;
        add_job(&f.store, "z").await;

        let summary = f.director.distribute().await.unwrap();
        assert_eq!(summary.members, 4);
        assert_eq!(summary.jobs, 7);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.applied.created, 6);

        assert_eq!(count(&f.director, "m1").await, 1);
        assert_eq!(count(&f.director, "m2").await, 2);
        assert_eq!(count(&f.director, "m3").await, 1);
        assert_eq!(count(&f.director, "m4").await, 2);

        let refs = f.director.shared.refs.fetch(&MemberId::from("m2")).await.unwrap();
        let mut held: Vec<String> = refs.into_values().collect();
        held.sort();
        assert_eq!(held, vec!["monitor/b", "monitor/c"]);
    }

    #[tokio::test]
    async fn test_takeover_triggers_distribution() {
        let f = fixture();
        add_member(&f.store, "m1").await;
        add_job(&f.store, "a").await;
        add_job(&f.store, "b").await;

        f.director.start().await.unwrap();
        f.state.set(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&f.director, "m1").await, 2);

        // Job changes are picked up by the watcher.
        add_job(&f.store, "c").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&f.director, "m1").await, 3);

        f.director.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_watch_after_losing_directorship() {
        let f = fixture();
        add_member(&f.store, "m1").await;

        f.director.start().await.unwrap();
        f.state.set(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.state.set(false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        add_job(&f.store, "a").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&f.director, "m1").await, 0);

        f.director.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_quick_flip_sends_takeover_again() {
        let f = fixture();
        add_member(&f.store, "m1").await;
        add_job(&f.store, "a").await;

        let cancel = CancellationToken::new();
        let mut rx = f.director.shared.distribute_rx.lock().await;
        let listener = tokio::spawn(f.director.shared.clone().state_listener(cancel.clone()));

        f.state.set(true);
        assert_eq!(rx.recv().await, Some(DistributeRequest::Takeover));

        // Both changes land before the listener wakes up.
        f.state.set(false);
        f.state.set(true);
        let again = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(again.unwrap(), Some(DistributeRequest::Takeover));

        cancel.cancel();
        listener.await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_keeps_queue() {
        let f = fixture();
        add_member(&f.store, "m1").await;
        add_job(&f.store, "a").await;

        f.director.start().await.unwrap();
        f.director.stop().await.unwrap();
        f.director.start().await.unwrap();

        f.state.set(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&f.director, "m1").await, 1);

        f.director.stop().await.unwrap();
    }
}
