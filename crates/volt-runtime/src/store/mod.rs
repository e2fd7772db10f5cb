mod postgres;

pub use postgres::PgStore;

use std::sync::Arc;

use volt_core::config::{StoreBackend, StoreConfig};
use volt_core::store::{CoordinationStore, MemoryStore};
use volt_core::{Result, VoltError};

/// Open the configured store backend.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            if config.url.is_empty() {
                return Err(VoltError::Config(
                    "store.url is required for the postgres backend".to_string(),
                ));
            }
            let store = PgStore::connect(config).await?;
            store.migrate().await?;
            tracing::info!(prefix = %config.prefix, "Using postgres store");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let store = connect(&StoreConfig::default()).await.unwrap();
        assert_eq!(store.exists("").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_postgres_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Postgres,
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config).await, Err(VoltError::Config(_))));
    }
}
