//! Failure supervisor.
//!
//! Components report systemic store failures here. The first report stops
//! every component and marks the process unhealthy; the store is then watched
//! in isolation and everything is restarted once it has been stable for a
//! full observation window.

mod recovery;

pub use recovery::watch_until_healthy;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use volt_core::config::OverwatchConfig;
use volt_core::store::CoordinationStore;
use volt_core::{Component, Health, Result, VoltError};

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A store watch broke.
    WatcherError,
    /// A periodic store operation kept failing.
    GenericStoreError,
}

/// A failure reported by a component.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub source: String,
    pub error: String,
    pub kind: FailureKind,
}

/// Sending side of the overwatch report queue.
#[derive(Clone)]
pub struct OverwatchHandle {
    tx: mpsc::Sender<FailureReport>,
}

impl OverwatchHandle {
    /// Create a handle and the receiver the supervisor consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FailureReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Report a failure. Never blocks; a full queue means a report is
    /// already pending and this one is dropped.
    pub fn report(&self, source: &str, error: &VoltError, kind: FailureKind) {
        let report = FailureReport {
            source: source.to_string(),
            error: error.to_string(),
            kind,
        };
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(source, "Overwatch queue full; dropping report");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(source, "Overwatch is not running; report lost");
            }
        }
    }

    /// Tracker that escalates after `threshold` consecutive failures.
    pub fn tracker(&self, source: &str, threshold: u32) -> FailureTracker {
        FailureTracker {
            source: source.to_string(),
            threshold: threshold.max(1),
            consecutive: 0,
            overwatch: self.clone(),
        }
    }
}

/// Counts consecutive failures of a periodic loop.
pub struct FailureTracker {
    source: String,
    threshold: u32,
    consecutive: u32,
    overwatch: OverwatchHandle,
}

impl FailureTracker {
    pub fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure; reports once when the threshold is reached.
    pub fn failure(&mut self, error: &VoltError) {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive == self.threshold {
            tracing::error!(
                source = %self.source,
                failures = self.consecutive,
                error = %error,
                "Repeated store failures; escalating to overwatch"
            );
            self.overwatch
                .report(&self.source, error, FailureKind::GenericStoreError);
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// The supervisor.
pub struct Overwatch {
    store: Arc<dyn CoordinationStore>,
    config: OverwatchConfig,
    health: Arc<Health>,
    components: Vec<Arc<dyn Component>>,
    reports: Mutex<Option<mpsc::Receiver<FailureReport>>>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Overwatch {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: OverwatchConfig,
        health: Arc<Health>,
        components: Vec<Arc<dyn Component>>,
        reports: mpsc::Receiver<FailureReport>,
    ) -> Self {
        Self {
            store,
            config,
            health,
            components,
            reports: Mutex::new(Some(reports)),
            running: Mutex::new(None),
        }
    }

    /// Spawn the listener loop. Can only be started once.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let reports = lock(&self.reports)
            .take()
            .ok_or_else(|| VoltError::Component("overwatch already started".to_string()))?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(reports, cancel.clone()));
        *lock(&self.running) = Some((cancel, handle));

        tracing::info!(
            components = self.components.len(),
            "Overwatch started"
        );
        Ok(())
    }

    /// Stop the listener loop and any recovery in progress.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Overwatch task ended abnormally");
            }
            tracing::info!("Overwatch stopped");
        }
    }

    async fn run(self: Arc<Self>, mut reports: mpsc::Receiver<FailureReport>, cancel: CancellationToken) {
        let mut active = false;
        let mut recovery: Option<CancellationToken> = None;
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(token) = recovery.take() {
                        token.cancel();
                    }
                    break;
                }
                Some(report) = reports.recv() => {
                    if active {
                        tracing::debug!(source = %report.source, "Recovery in progress; ignoring report");
                        continue;
                    }
                    active = true;

                    tracing::warn!(
                        source = %report.source,
                        kind = ?report.kind,
                        error = %report.error,
                        "Store failure reported; suspending components"
                    );

                    self.stop_components().await;
                    self.health
                        .write(false, format!("{}: {}", report.source, report.error));

                    let token = cancel.child_token();
                    recovery = Some(token.clone());
                    let store = self.store.clone();
                    let config = self.config.clone();
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        if watch_until_healthy(store, config, token).await {
                            let _ = done_tx.send(()).await;
                        }
                    });
                }
                Some(()) = done_rx.recv() => {
                    if let Some(token) = recovery.take() {
                        token.cancel();
                    }
                    active = false;

                    tracing::info!("Store is healthy again; restarting components");
                    if let Err(e) = self.start_components().await {
                        tracing::error!(error = %e, "Some components failed to restart");
                    }
                    self.health.set_healthy();
                }
            }
        }

        tracing::debug!("Overwatch listener shutting down");
    }

    async fn stop_components(&self) {
        for component in &self.components {
            if let Err(e) = component.stop().await {
                tracing::warn!(component = component.identify(), error = %e, "Failed to stop component");
            }
        }
    }

    async fn start_components(&self) -> Result<()> {
        let mut errors = Vec::new();
        for component in &self.components {
            if let Err(e) = component.start().await {
                errors.push(format!("{}: {}", component.identify(), e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VoltError::Component(errors.join("; ")))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
