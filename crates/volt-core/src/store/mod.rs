//! Coordination store abstraction.
//!
//! A hierarchical key namespace (`a/b/c`) with directories, TTLs,
//! conditional writes and prefix watches. The empty key is the root.

pub mod keys;
mod memory;

pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, VoltError};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Boxed future returned by [`Watcher::next`].
pub type WatchFuture<'a> = Pin<Box<dyn Future<Output = WatchOutcome> + Send + 'a>>;

/// A single key as returned by [`CoordinationStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Full key.
    pub key: String,
    /// Stored value; empty for directories.
    pub value: String,
    /// Whether the key is a directory.
    pub dir: bool,
}

/// Precondition on the existence of the key being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrevExist {
    #[default]
    Ignore,
    MustExist,
    MustNotExist,
}

/// Options for [`CoordinationStore::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Create a directory instead of a value.
    pub dir: bool,
    /// Expire the key after this long.
    pub ttl: Option<Duration>,
    /// Existence precondition.
    pub prev_exist: PrevExist,
    /// Only write if the current value equals this.
    pub prev_value: Option<String>,
}

impl SetOptions {
    /// A directory with no TTL.
    pub fn dir() -> Self {
        Self {
            dir: true,
            ..Self::default()
        }
    }

    /// Set a TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Fail with `KeyExists` if the key is present.
    pub fn create_only() -> Self {
        Self {
            prev_exist: PrevExist::MustNotExist,
            ..Self::default()
        }
    }

    /// Fail with `KeyNotFound` if the key is absent.
    pub fn must_exist() -> Self {
        Self {
            prev_exist: PrevExist::MustExist,
            ..Self::default()
        }
    }

    /// Fail with `CompareFailed` unless the current value equals `prev`.
    pub fn compare_and_swap(prev: impl Into<String>) -> Self {
        Self {
            prev_value: Some(prev.into()),
            ..Self::default()
        }
    }

    /// Watch action produced by a successful write with these options.
    pub fn action(&self) -> WatchAction {
        if self.prev_value.is_some() {
            WatchAction::CompareAndSwap
        } else {
            match self.prev_exist {
                PrevExist::Ignore => WatchAction::Set,
                PrevExist::MustExist => WatchAction::Update,
                PrevExist::MustNotExist => WatchAction::Create,
            }
        }
    }
}

/// Kind of change observed by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchAction {
    Set,
    Create,
    Update,
    Delete,
    Expire,
    CompareAndSwap,
}

impl WatchAction {
    /// Whether the key now exists.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Set | Self::Create | Self::Update | Self::CompareAndSwap
        )
    }

    /// Whether the key was removed.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Delete | Self::Expire)
    }
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub key: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub value: String,
}

/// Result of waiting on a watcher.
#[derive(Debug)]
pub enum WatchOutcome {
    /// A change under the watched prefix.
    Event(WatchEvent),
    /// The cancellation token fired.
    Cancelled,
    /// The watch broke; it must be re-opened.
    Failed(VoltError),
}

/// A stream of changes under a prefix.
pub trait Watcher: Send {
    /// Wait for the next change, cancellation or failure.
    fn next<'a>(&'a mut self, cancel: &'a CancellationToken) -> WatchFuture<'a>;
}

/// Client for the shared coordination store.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read a key. See the module docs for directory semantics.
    fn get<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, Vec<Node>>;

    /// Write a key, creating missing parent directories.
    fn set<'a>(&'a self, key: &'a str, value: &'a str, options: SetOptions)
        -> StoreFuture<'a, ()>;

    /// Extend the TTL of an existing key without notifying watchers.
    fn refresh<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Remove a key; directories with children need `recursive`.
    fn delete<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, ()>;

    /// `Some(is_dir)` if the key exists.
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<bool>>;

    /// Watch a prefix. Connection problems surface from [`Watcher::next`].
    fn watch(&self, prefix: &str, recursive: bool) -> Box<dyn Watcher>;
}

/// Whether `key` falls under a watch on `prefix`.
pub fn watch_matches(prefix: &str, recursive: bool, key: &str) -> bool {
    if prefix.is_empty() {
        return recursive || !key.contains('/');
    }
    if key == prefix {
        return true;
    }
    match key.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
        Some(rest) => recursive || !rest.contains('/'),
        None => false,
    }
}

/// Make sure the top-level directories exist, creating missing ones.
///
/// A required key that exists as a plain value is an error; all problems are
/// collected into a single error.
pub async fn ensure_layout(store: &dyn CoordinationStore) -> Result<()> {
    let mut errors = Vec::new();

    for dir in keys::REQUIRED_DIRS {
        match store.exists(dir).await {
            Ok(Some(true)) => {}
            Ok(Some(false)) => errors.push(format!("'{}' exists but is not a dir", dir)),
            Ok(None) => match store.set(dir, "", SetOptions::dir()).await {
                Ok(()) => tracing::info!(key = dir, "Created missing store dir"),
                Err(e) if e.is_lost_race() => {}
                Err(e) => errors.push(format!("unable to create '{}': {}", dir, e)),
            },
            Err(e) => errors.push(format!("unable to check '{}': {}", dir, e)),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(VoltError::Config(format!(
            "Store layout is invalid: {}",
            errors.join("; ")
        )))
    }
}
