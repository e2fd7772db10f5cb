use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    watch_matches, CoordinationStore, Node, PrevExist, SetOptions, StoreFuture, WatchAction,
    WatchEvent, WatchFuture, WatchOutcome, Watcher,
};
use crate::error::{Result, VoltError};

const EVENT_BUFFER: usize = 1024;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    dir: bool,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    unavailable: bool,
}

/// In-process coordination store.
///
/// Clones share the same namespace, so several members in one process (or
/// one test) can coordinate through it. TTLs follow tokio's clock.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<WatchEvent>,
    sweep_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// How often open watchers look for expired keys.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Simulate a lost connection: operations fail and watchers break.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the map is intact.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Lock, fail if unavailable, and drop expired keys.
    fn open(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(VoltError::Store("store unavailable".to_string()));
        }
        self.purge_expired(&mut inner);
        Ok(inner)
    }

    fn purge_expired(&self, inner: &mut Inner) {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            // Already gone with an expired ancestor.
            if let Some(entry) = remove_subtree(&mut inner.entries, &key) {
                self.emit(WatchAction::Expire, key, entry.dir, String::new());
            }
        }
    }

    fn emit(&self, action: WatchAction, key: String, dir: bool, value: String) {
        // No receivers is fine.
        let _ = self.events.send(WatchEvent {
            action,
            key,
            dir,
            value,
        });
    }

    fn get_sync(&self, key: &str, recursive: bool) -> Result<Vec<Node>> {
        let inner = self.open()?;

        if !key.is_empty() {
            let entry = inner
                .entries
                .get(key)
                .ok_or_else(|| VoltError::KeyNotFound(key.to_string()))?;
            if !entry.dir {
                return Ok(vec![Node {
                    key: key.to_string(),
                    value: entry.value.clone(),
                    dir: false,
                }]);
            }
        }

        let nodes = inner
            .entries
            .iter()
            .filter(|(k, e)| {
                if recursive {
                    !e.dir && is_descendant(key, k)
                } else {
                    is_child(key, k)
                }
            })
            .map(|(k, e)| Node {
                key: k.clone(),
                value: if e.dir { String::new() } else { e.value.clone() },
                dir: e.dir,
            })
            .collect();

        Ok(nodes)
    }

    fn set_sync(&self, key: &str, value: &str, options: SetOptions) -> Result<()> {
        if key.is_empty() {
            return Err(VoltError::InvalidArgument("cannot set the root".to_string()));
        }

        let mut inner = self.open()?;
        let current = inner.entries.get(key).cloned();

        match (options.prev_exist, &current) {
            (PrevExist::MustNotExist, Some(_)) => {
                return Err(VoltError::KeyExists(key.to_string()))
            }
            (PrevExist::MustExist, None) => return Err(VoltError::KeyNotFound(key.to_string())),
            _ => {}
        }

        if let Some(prev) = &options.prev_value {
            match &current {
                None => return Err(VoltError::KeyNotFound(key.to_string())),
                Some(entry) if entry.dir || &entry.value != prev => {
                    return Err(VoltError::CompareFailed(key.to_string()))
                }
                Some(_) => {}
            }
        }

        if let Some(entry) = &current {
            if entry.dir != options.dir {
                let kind = if entry.dir { "a dir" } else { "not a dir" };
                return Err(VoltError::Store(format!("'{}' is {}", key, kind)));
            }
        }

        // Implicit parents.
        let segments: Vec<&str> = key.split('/').collect();
        let mut parent = String::new();
        for segment in &segments[..segments.len() - 1] {
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(segment);
            match inner.entries.get(&parent) {
                Some(e) if !e.dir => {
                    return Err(VoltError::Store(format!("'{}' is not a dir", parent)))
                }
                Some(_) => {}
                None => {
                    inner.entries.insert(
                        parent.clone(),
                        Entry {
                            value: String::new(),
                            dir: true,
                            expires_at: None,
                        },
                    );
                }
            }
        }

        let value = if options.dir { String::new() } else { value.to_string() };
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                dir: options.dir,
                expires_at: options.ttl.map(|ttl| Instant::now() + ttl),
            },
        );

        self.emit(options.action(), key.to_string(), options.dir, value);
        Ok(())
    }

    fn refresh_sync(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.open()?;
        let entry = inner
            .entries
            .get_mut(key)
            .ok_or_else(|| VoltError::KeyNotFound(key.to_string()))?;
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    fn delete_sync(&self, key: &str, recursive: bool) -> Result<()> {
        if key.is_empty() {
            return Err(VoltError::InvalidArgument("cannot delete the root".to_string()));
        }

        let mut inner = self.open()?;
        let entry = inner
            .entries
            .get(key)
            .ok_or_else(|| VoltError::KeyNotFound(key.to_string()))?;

        if entry.dir && !recursive && inner.entries.keys().any(|k| is_descendant(key, k)) {
            return Err(VoltError::Store(format!("'{}' is not empty", key)));
        }

        if let Some(entry) = remove_subtree(&mut inner.entries, key) {
            self.emit(WatchAction::Delete, key.to_string(), entry.dir, String::new());
        }
        Ok(())
    }

    fn exists_sync(&self, key: &str) -> Result<Option<bool>> {
        let inner = self.open()?;
        if key.is_empty() {
            return Ok(Some(true));
        }
        Ok(inner.entries.get(key).map(|e| e.dir))
    }
}

impl CoordinationStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, Vec<Node>> {
        Box::pin(async move { self.get_sync(key, recursive) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        options: SetOptions,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.set_sync(key, value, options) })
    }

    fn refresh<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.refresh_sync(key, ttl) })
    }

    fn delete<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.delete_sync(key, recursive) })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<bool>> {
        Box::pin(async move { self.exists_sync(key) })
    }

    fn watch(&self, prefix: &str, recursive: bool) -> Box<dyn Watcher> {
        Box::new(MemoryWatcher {
            store: self.clone(),
            events: self.events.subscribe(),
            prefix: prefix.to_string(),
            recursive,
        })
    }
}

struct MemoryWatcher {
    store: MemoryStore,
    events: broadcast::Receiver<WatchEvent>,
    prefix: String,
    recursive: bool,
}

impl MemoryWatcher {
    async fn next_outcome(&mut self, cancel: &CancellationToken) -> WatchOutcome {
        let mut sweep = tokio::time::interval(self.store.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                received = self.events.recv() => match received {
                    Ok(event) => {
                        if watch_matches(&self.prefix, self.recursive, &event.key) {
                            return WatchOutcome::Event(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        return WatchOutcome::Failed(VoltError::Store(format!(
                            "watcher fell behind by {} events",
                            n
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return WatchOutcome::Failed(VoltError::Store(
                            "event stream closed".to_string(),
                        ));
                    }
                },
                _ = sweep.tick() => {
                    // Expire events come back through `events`.
                    if let Err(e) = self.store.open() {
                        return WatchOutcome::Failed(e);
                    }
                }
            }
        }
    }
}

impl Watcher for MemoryWatcher {
    fn next<'a>(&'a mut self, cancel: &'a CancellationToken) -> WatchFuture<'a> {
        Box::pin(self.next_outcome(cancel))
    }
}

fn is_child(parent: &str, key: &str) -> bool {
    if parent.is_empty() {
        return !key.contains('/');
    }
    key.strip_prefix(parent)
        .and_then(|r| r.strip_prefix('/'))
        .is_some_and(|r| !r.is_empty() && !r.contains('/'))
}

fn is_descendant(parent: &str, key: &str) -> bool {
    if parent.is_empty() {
        return true;
    }
    key.strip_prefix(parent)
        .and_then(|r| r.strip_prefix('/'))
        .is_some_and(|r| !r.is_empty())
}

fn remove_subtree(entries: &mut BTreeMap<String, Entry>, key: &str) -> Option<Entry> {
    let removed = entries.remove(key)?;
    if removed.dir {
        entries.retain(|k, _| !is_descendant(key, k));
    }
    Some(removed)
}
