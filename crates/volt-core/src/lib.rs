pub mod cluster;
pub mod component;
pub mod config;
pub mod error;
pub mod health;
pub mod job;
pub mod store;

pub use component::{Component, ComponentFuture};
pub use config::{SharedConfig, VoltConfig};
pub use error::{Result, VoltError};
pub use health::{Health, HealthStatus};
pub use job::JobDefinition;
pub use store::{CoordinationStore, MemoryStore, WatchOutcome, Watcher};
