use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use volt_core::cluster::{DirectorRecord, ObservedDirector};
use volt_core::store::keys::DIRECTOR_KEY;
use volt_core::store::{CoordinationStore, SetOptions};
use volt_core::{Result, VoltError};

use super::{ClusterSettings, DirectorState};
use crate::overwatch::FailureTracker;

/// What the director key held when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorObservation {
    Absent,
    Present(ObservedDirector),
    /// Unparseable contents; treated like an expired lease.
    Malformed(String),
}

/// Lease-based director election over the director key.
///
/// Every write is conditional on what was last read, so concurrent
/// contenders are serialized by the store and at most one of them wins.
pub struct DirectorElection {
    store: Arc<dyn CoordinationStore>,
    settings: Arc<ClusterSettings>,
    state: Arc<DirectorState>,
}

impl DirectorElection {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        settings: Arc<ClusterSettings>,
        state: Arc<DirectorState>,
    ) -> Self {
        Self {
            store,
            settings,
            state,
        }
    }

    /// Check if this member is the director.
    pub fn is_director(&self) -> bool {
        self.state.get()
    }

    /// Read the director key.
    pub async fn get_state(&self) -> Result<DirectorObservation> {
        let nodes = match self.store.get(DIRECTOR_KEY, false).await {
            Ok(nodes) => nodes,
            Err(e) if e.is_key_not_found() => return Ok(DirectorObservation::Absent),
            Err(e) => return Err(e),
        };

        let raw = match nodes.into_iter().next() {
            Some(node) if !node.dir => node.value,
            Some(_) => {
                return Err(VoltError::Store(format!("'{}' is a dir", DIRECTOR_KEY)));
            }
            None => return Ok(DirectorObservation::Absent),
        };

        match ObservedDirector::parse(raw.clone()) {
            Ok(observed) => Ok(DirectorObservation::Present(observed)),
            Err(_) => Ok(DirectorObservation::Malformed(raw)),
        }
    }

    /// Act on a director key observation.
    pub async fn handle_state(&self, observation: DirectorObservation) -> Result<()> {
        let me = &self.settings.member_id;

        match observation {
            DirectorObservation::Absent => {
                if self.take_over(None).await? {
                    self.become_director("no director record");
                }
            }
            DirectorObservation::Malformed(raw) => {
                tracing::warn!(key = DIRECTOR_KEY, "Director record is malformed; taking over");
                if self.take_over(Some(&raw)).await? {
                    self.become_director("malformed director record");
                }
            }
            DirectorObservation::Present(observed) if &observed.record.member_id == me => {
                if !self.state.get() && self.take_over(Some(&observed.raw)).await? {
                    self.become_director("record names this member");
                }
            }
            DirectorObservation::Present(observed) => {
                if self.state.get() {
                    if self.state.set(false) {
                        tracing::warn!(
                            director = %observed.record.member_id,
                            "Another member holds the director record; stepping down"
                        );
                    }
                } else if observed.record.is_expired(self.settings.heartbeat_timeout) {
                    tracing::info!(
                        previous = %observed.record.member_id,
                        last_update = %observed.record.last_update,
                        "Director lease expired; attempting takeover"
                    );
                    if self.take_over(Some(&observed.raw)).await? {
                        self.become_director("previous director expired");
                    }
                }
            }
        }

        Ok(())
    }

    /// Write our record; `prev` is the raw value the write is conditional on,
    /// `None` for a create-only write. Returns false when another member won.
    async fn take_over(&self, prev: Option<&str>) -> Result<bool> {
        let record = DirectorRecord::new(self.settings.member_id.clone()).to_json()?;
        let options = match prev {
            Some(prev) => SetOptions::compare_and_swap(prev),
            None => SetOptions::create_only(),
        };

        match self.store.set(DIRECTOR_KEY, &record, options).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_lost_race() => {
                tracing::debug!(error = %e, "Lost director race");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn become_director(&self, reason: &str) {
        if self.state.set(true) {
            tracing::info!(member_id = %self.settings.member_id, reason, "Became director");
        }
    }

    /// Refresh the director record. A no-op unless we are director.
    pub async fn send_heartbeat(&self) -> Result<()> {
        if !self.state.get() {
            return Ok(());
        }

        let record = DirectorRecord::new(self.settings.member_id.clone()).to_json()?;
        self.store
            .set(DIRECTOR_KEY, &record, SetOptions::default())
            .await
    }

    /// Delete the director record if it still names this member.
    pub async fn release(&self) -> Result<()> {
        let observed = match self.get_state().await? {
            DirectorObservation::Present(observed) => observed,
            _ => return Ok(()),
        };
        if observed.record.member_id != self.settings.member_id {
            return Ok(());
        }

        match self.store.delete(DIRECTOR_KEY, false).await {
            Ok(()) => {
                tracing::info!("Released director record");
                Ok(())
            }
            Err(e) if e.is_key_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Check the director key immediately and then every heartbeat interval.
    pub async fn run_monitor(&self, cancel: CancellationToken, mut failures: FailureTracker) {
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Director monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let result = match self.get_state().await {
                        Ok(observation) => self.handle_state(observation).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(()) => failures.success(),
                        Err(e) => {
                            tracing::warn!(error = %e, "Director monitor check failed");
                            failures.failure(&e);
                        }
                    }
                }
            }
        }
    }

    /// Refresh the director record every heartbeat interval while director.
    pub async fn run_heartbeat(&self, cancel: CancellationToken, mut failures: FailureTracker) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Director heartbeat shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.settings.heartbeat_interval) => {
                    match self.send_heartbeat().await {
                        Ok(()) => failures.success(),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to send director heartbeat");
                            failures.failure(&e);
                        }
                    }
                }
            }
        }
    }
}
