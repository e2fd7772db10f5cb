use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use volt_core::cluster::MemberId;
use volt_core::store::CoordinationStore;
use volt_core::{Component, ComponentFuture, Result};

use super::{
    ClusterSettings, DirectorElection, DirectorState, MemberHeartbeat, MemberMonitor,
    MemberRegistry,
};
use crate::director::DistributeRequest;
use crate::overwatch::OverwatchHandle;

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Membership and leadership engine.
///
/// Runs the director monitor, director heartbeat, member heartbeat and
/// member monitor loops. Restartable: overwatch stops and starts it around
/// store outages.
pub struct Cluster {
    settings: Arc<ClusterSettings>,
    state: Arc<DirectorState>,
    election: Arc<DirectorElection>,
    heartbeat: Arc<MemberHeartbeat>,
    monitor: Arc<MemberMonitor>,
    registry: MemberRegistry,
    overwatch: OverwatchHandle,
    running: Mutex<Option<Running>>,
}

impl Cluster {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        settings: ClusterSettings,
        state: Arc<DirectorState>,
        distribute: mpsc::Sender<DistributeRequest>,
        overwatch: OverwatchHandle,
    ) -> Self {
        let settings = Arc::new(settings);
        Self {
            election: Arc::new(DirectorElection::new(
                store.clone(),
                settings.clone(),
                state.clone(),
            )),
            heartbeat: Arc::new(MemberHeartbeat::new(store.clone(), settings.clone())),
            monitor: Arc::new(MemberMonitor::new(
                store.clone(),
                state.clone(),
                distribute,
                overwatch.clone(),
            )),
            registry: MemberRegistry::new(store),
            settings,
            state,
            overwatch,
            running: Mutex::new(None),
        }
    }

    pub fn member_id(&self) -> &MemberId {
        &self.settings.member_id
    }

    pub fn is_director(&self) -> bool {
        self.state.get()
    }

    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
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

    async fn start_inner(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let threshold = self.settings.failure_threshold;
        let mut member_tracker = self.overwatch.tracker("cluster.member_heartbeat", threshold);

        // Register before electing so the director always sees us as a member.
        // A failure here is retried by the member heartbeat loop.
        if let Err(e) = self.heartbeat.create_initial_structure().await {
            tracing::warn!(error = %e, "Initial member registration failed; heartbeat will retry");
            member_tracker.failure(&e);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(4);

        let election = self.election.clone();
        let token = cancel.clone();
        let tracker = self.overwatch.tracker("cluster.director_monitor", threshold);
        tasks.push(tokio::spawn(async move {
            election.run_monitor(token, tracker).await
        }));

        let election = self.election.clone();
        let token = cancel.clone();
        let tracker = self.overwatch.tracker("cluster.director_heartbeat", threshold);
        tasks.push(tokio::spawn(async move {
            election.run_heartbeat(token, tracker).await
        }));

        let heartbeat = self.heartbeat.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            heartbeat.run(token, member_tracker).await
        }));

        let monitor = self.monitor.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { monitor.run(token).await }));

        *self.lock_running() = Some(Running { cancel, tasks });

        tracing::info!(
            member_id = %self.settings.member_id,
            interval = ?self.settings.heartbeat_interval,
            timeout = ?self.settings.heartbeat_timeout,
            "Cluster started"
        );
        Ok(())
    }

    async fn stop_inner(&self) -> Result<()> {
        let running = self.lock_running().take();
        let Some(running) = running else {
            return Ok(());
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Cluster task ended abnormally");
            }
        }

        if self.state.set(false) {
            tracing::info!("Relinquished director status");
        }
        tracing::info!("Cluster stopped");
        Ok(())
    }

    /// Leave the cluster for good: remove our member dir and, if we hold it,
    /// the director record. Call after `stop`.
    pub async fn leave(&self) -> Result<()> {
        let deregistered = self.heartbeat.deregister().await;
        let released = self.election.release().await;
        deregistered.and(released)
    }
}

impl Component for Cluster {
    fn identify(&self) -> &str {
        "cluster"
    }

    fn start(&self) -> ComponentFuture<'_> {
        Box::pin(self.start_inner())
    }

    fn stop(&self) -> ComponentFuture<'_> {
        Box::pin(self.stop_inner())
    }
}
