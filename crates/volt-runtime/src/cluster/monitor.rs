use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use volt_core::store::keys::{member_id_from_key, member_id_from_status_key, MEMBERS_DIR};
use volt_core::store::{CoordinationStore, WatchAction, WatchEvent, WatchOutcome};

use super::DirectorState;
use crate::director::{request_distribution, DistributeRequest};
use crate::overwatch::{FailureKind, OverwatchHandle};

const SOURCE: &str = "cluster.member_monitor";

/// Watches membership and asks for redistribution while director.
pub struct MemberMonitor {
    store: Arc<dyn CoordinationStore>,
    state: Arc<DirectorState>,
    distribute: mpsc::Sender<DistributeRequest>,
    overwatch: OverwatchHandle,
}

impl MemberMonitor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        state: Arc<DirectorState>,
        distribute: mpsc::Sender<DistributeRequest>,
        overwatch: OverwatchHandle,
    ) -> Self {
        Self {
            store,
            state,
            distribute,
            overwatch,
        }
    }

    /// Map a watch event to a distribute request, if it is a join or leave.
    ///
    /// A member's first status write also counts as a join, so a pass that
    /// ran before its tags were readable gets corrected.
    pub fn classify(event: &WatchEvent) -> Option<DistributeRequest> {
        if !event.dir {
            return match event.action {
                WatchAction::Create => {
                    member_id_from_status_key(&event.key).map(DistributeRequest::MemberJoined)
                }
                _ => None,
            };
        }
        let member_id = member_id_from_key(&event.key)?;

        match event.action {
            WatchAction::Set | WatchAction::Create => Some(DistributeRequest::MemberJoined(member_id)),
            WatchAction::Expire | WatchAction::Delete => Some(DistributeRequest::MemberLeft(member_id)),
            _ => None,
        }
    }

    /// Watch until cancelled or the watch fails.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut watcher = self.store.watch(MEMBERS_DIR, true);

        loop {
            match watcher.next(&cancel).await {
                WatchOutcome::Cancelled => {
                    tracing::debug!("Member monitor shutting down");
                    break;
                }
                WatchOutcome::Failed(e) => {
                    tracing::error!(error = %e, "Member watch failed");
                    self.overwatch.report(SOURCE, &e, FailureKind::WatcherError);
                    break;
                }
                WatchOutcome::Event(event) => {
                    if !self.state.get() {
                        continue;
                    }
                    if let Some(request) = Self::classify(&event) {
                        tracing::info!(key = %event.key, action = ?event.action, "Membership changed");
                        request_distribution(&self.distribute, request);
                    }
                }
            }
        }
    }
}
