use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use volt_core::config::OverwatchConfig;
use volt_core::store::{CoordinationStore, WatchOutcome};

/// Watch the whole namespace until it has been error-free for a full
/// `health_watch` window.
///
/// Returns `true` once recovered, `false` if cancelled first.
pub async fn watch_until_healthy(
    store: Arc<dyn CoordinationStore>,
    config: OverwatchConfig,
    cancel: CancellationToken,
) -> bool {
    let health_watch = config.health_watch();
    let mut last_error = Instant::now();
    let mut watcher = store.watch("", true);

    let mut poll = tokio::time::interval(config.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            outcome = watcher.next(&cancel) => match outcome {
                WatchOutcome::Event(_) => {}
                WatchOutcome::Cancelled => return false,
                WatchOutcome::Failed(e) => {
                    tracing::debug!(error = %e, "Recovery watch failed; retrying");
                    last_error = Instant::now();

                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(config.watch_retry()) => {}
                    }
                    watcher = store.watch("", true);
                }
            },
            _ = poll.tick() => {
                if last_error.elapsed() >= health_watch {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use volt_core::store::MemoryStore;

    fn config() -> OverwatchConfig {
        OverwatchConfig {
            health_watch_secs: 10,
            watch_retry_secs: 5,
            poll_interval_ms: 1000,
            report_queue_size: 8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_clean_window() {
        let store = Arc::new(MemoryStore::new());
        let started = Instant::now();

        let recovered = watch_until_healthy(store, config(), CancellationToken::new()).await;

        assert!(recovered);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_reset_window() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_until_healthy(store.clone(), config(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());

        store.set_unavailable(false);
        let restored = Instant::now();
        assert!(task.await.unwrap());
        assert!(restored.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_false() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_until_healthy(store, config(), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        assert!(!task.await.unwrap());
    }
}
