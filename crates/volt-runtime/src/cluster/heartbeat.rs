use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use volt_core::store::keys::{member_config_dir, member_dir, member_status_key};
use volt_core::store::{CoordinationStore, SetOptions};
use volt_core::Result;

use super::ClusterSettings;
use crate::overwatch::FailureTracker;

/// Keeps this member's directory alive.
///
/// The member dir carries a TTL equal to the heartbeat timeout; if the
/// process stops heartbeating the store expires it and the director notices.
pub struct MemberHeartbeat {
    store: Arc<dyn CoordinationStore>,
    settings: Arc<ClusterSettings>,
    // Set once the full initial structure has been written.
    registered: AtomicBool,
}

impl MemberHeartbeat {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: Arc<ClusterSettings>) -> Self {
        Self {
            store,
            settings,
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Replace any stale member dir with a fresh one holding `status` and `config`.
    pub async fn create_initial_structure(&self) -> Result<()> {
        let id = &self.settings.member_id;
        let dir = member_dir(id);
        self.registered.store(false, Ordering::SeqCst);

        match self.store.delete(&dir, true).await {
            Ok(()) => tracing::debug!(member_id = %id, "Removed stale member dir"),
            Err(e) if e.is_key_not_found() => {}
            Err(e) => return Err(e),
        }

        self.store
            .set(
                &dir,
                "",
                SetOptions::dir().with_ttl(self.settings.heartbeat_timeout),
            )
            .await?;

        let status = serde_json::to_string(&self.settings.status())?;
        self.store
            .set(&member_status_key(id), &status, SetOptions::create_only())
            .await?;

        self.store
            .set(&member_config_dir(id), "", SetOptions::dir())
            .await?;

        self.registered.store(true, Ordering::SeqCst);
        tracing::info!(member_id = %id, "Registered cluster member");
        Ok(())
    }

    /// Write the status blob and extend the member dir lease.
    ///
    /// Finishes registration first if an earlier attempt failed part way.
    pub async fn beat(&self) -> Result<()> {
        let id = &self.settings.member_id;
        if !self.is_registered() {
            tracing::info!(member_id = %id, "Member not registered; registering");
            return self.create_initial_structure().await;
        }
        let status = serde_json::to_string(&self.settings.status())?;

        let result = match self
            .store
            .set(&member_status_key(id), &status, SetOptions::must_exist())
            .await
        {
            Ok(()) => {
                self.store
                    .refresh(&member_dir(id), self.settings.heartbeat_timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Err(e) if e.is_key_not_found() => {
                tracing::warn!(member_id = %id, "Member dir expired; re-registering");
                self.create_initial_structure().await
            }
            other => other,
        }
    }

    /// Remove the member dir.
    pub async fn deregister(&self) -> Result<()> {
        match self
            .store
            .delete(&member_dir(&self.settings.member_id), true)
            .await
        {
            Ok(()) => {
                self.registered.store(false, Ordering::SeqCst);
                tracing::info!(member_id = %self.settings.member_id, "Deregistered cluster member");
                Ok(())
            }
            Err(e) if e.is_key_not_found() => {
                self.registered.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Heartbeat every interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken, mut failures: FailureTracker) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Member heartbeat shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.settings.heartbeat_interval) => {
                    match self.beat().await {
                        Ok(()) => failures.success(),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to send member heartbeat");
                            failures.failure(&e);
                        }
                    }
                }
            }
        }
    }
}
