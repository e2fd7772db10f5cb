use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use volt_core::store::keys::{job_name, MONITOR_DIR};
use volt_core::store::{CoordinationStore, WatchEvent, WatchOutcome};

use super::{request_distribution, DistributeRequest};
use crate::overwatch::{FailureKind, OverwatchHandle};

const SOURCE: &str = "director.config_watcher";

/// Whether a change under `monitor/` alters the set of jobs.
pub fn is_job_change(event: &WatchEvent) -> bool {
    !event.dir && job_name(&event.key).is_some()
}

/// Watch job definitions and request redistribution on change.
pub async fn watch_jobs(
    store: Arc<dyn CoordinationStore>,
    distribute: mpsc::Sender<DistributeRequest>,
    overwatch: OverwatchHandle,
    cancel: CancellationToken,
) {
    let mut watcher = store.watch(MONITOR_DIR, true);
    tracing::debug!("Job definition watcher started");

    loop {
        match watcher.next(&cancel).await {
            WatchOutcome::Cancelled => {
                tracing::debug!("Job definition watcher shutting down");
                break;
            }
            WatchOutcome::Failed(e) => {
                tracing::error!(error = %e, "Job definition watch failed");
                overwatch.report(SOURCE, &e, FailureKind::WatcherError);
                break;
            }
            WatchOutcome::Event(event) => {
                if !is_job_change(&event) {
                    tracing::trace!(key = %event.key, "Ignoring monitor event");
                    continue;
                }
                tracing::info!(key = %event.key, action = ?event.action, "Job definitions changed");
                request_distribution(&distribute, DistributeRequest::JobChanged(event.key));
            }
        }
    }
}
