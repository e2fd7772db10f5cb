use std::sync::Mutex;

use tokio::sync::watch;

/// Snapshot published on every director state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorTransition {
    pub is_director: bool,
    /// Number of times this process became director. A subscriber that
    /// sees it advance knows a takeover happened even if it missed the
    /// intermediate loss.
    pub takeovers: u64,
}

/// Whether this process currently holds the director role.
///
/// Only the election loop writes it; every transition is published so the
/// Director can react without polling.
pub struct DirectorState {
    current: Mutex<DirectorTransition>,
    tx: watch::Sender<DirectorTransition>,
}

impl DirectorState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(DirectorTransition::default());
        Self {
            current: Mutex::new(DirectorTransition::default()),
            tx,
        }
    }

    /// Get the current state.
    pub fn get(&self) -> bool {
        match self.current.lock() {
            Ok(guard) => guard.is_director,
            Err(poisoned) => poisoned.into_inner().is_director,
        }
    }

    /// Set the state, returning true if it changed.
    pub fn set(&self, value: bool) -> bool {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_director == value {
            return false;
        }
        guard.is_director = value;
        if value {
            guard.takeovers += 1;
        }
        // Sent under the lock so subscribers observe transitions in order.
        self.tx.send_replace(*guard);
        true
    }

    /// Subscribe to transitions.
    pub fn subscribe(&self) -> watch::Receiver<DirectorTransition> {
        self.tx.subscribe()
    }
}

impl Default for DirectorState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes() {
        let state = DirectorState::new();
        assert!(!state.get());
        assert!(state.set(true));
        assert!(!state.set(true));
        assert!(state.get());
        assert!(state.set(false));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let state = DirectorState::new();
        let mut rx = state.subscribe();

        state.set(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_director);

        // No-op sets do not notify.
        state.set(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_missed_flip_still_counts_takeover() {
        let state = DirectorState::new();
        let mut rx = state.subscribe();

        state.set(true);
        let first = *rx.borrow_and_update();
        state.set(false);
        state.set(true);

        rx.changed().await.unwrap();
        let latest = *rx.borrow_and_update();
        assert!(latest.is_director);
        assert_eq!(latest.takeovers, first.takeovers + 1);
    }
}
