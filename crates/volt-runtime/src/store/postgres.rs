use std::time::Duration;

use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio_util::sync::CancellationToken;

use volt_core::config::StoreConfig;
use volt_core::store::{
    watch_matches, CoordinationStore, Node, PrevExist, SetOptions, StoreFuture, WatchAction,
    WatchEvent, WatchFuture, WatchOutcome, Watcher,
};
use volt_core::{Result, VoltError};

/// Channel every mutation is announced on.
const NOTIFY_CHANNEL: &str = "volt_events";

/// pg_notify payloads are capped at 8000 bytes.
const MAX_NOTIFY_VALUE: usize = 4096;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS volt_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL DEFAULT '',
    is_dir BOOLEAN NOT NULL DEFAULT FALSE,
    expires_at TIMESTAMPTZ
)
"#;

const EXPIRES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_volt_kv_expires_at
    ON volt_kv (expires_at) WHERE expires_at IS NOT NULL
"#;

/// Coordination store backed by a single PostgreSQL table.
///
/// Conditional writes are single statements, so the row lock taken by
/// `INSERT .. ON CONFLICT` or `UPDATE .. WHERE value = $prev` decides races.
/// Watches are served by LISTEN/NOTIFY.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    prefix: String,
}

impl PgStore {
    /// Connect using the store configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| VoltError::Store(format!("Failed to connect to store: {}", e)))?;

        Ok(Self::from_pool(pool, &config.prefix))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, prefix: &str) -> Self {
        Self {
            pool,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Create the backing table.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(EXPIRES_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        if key.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    /// Strip the prefix; `None` for keys outside it.
    fn relative_key<'a>(&self, full: &'a str) -> Option<&'a str> {
        if full == self.prefix {
            return Some("");
        }
        full.strip_prefix(&self.prefix)?.strip_prefix('/')
    }

    fn subtree_pattern(&self, key: &str) -> String {
        format!("{}/", self.full_key(key))
    }

    /// Delete expired rows (and the subtrees of expired dirs) under the prefix.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let expired: Vec<(String, bool)> = sqlx::query_as(
            r#"
            DELETE FROM volt_kv
            WHERE expires_at IS NOT NULL
              AND expires_at <= NOW()
              AND starts_with(key, $1)
            RETURNING key, is_dir
            "#,
        )
        .bind(self.subtree_pattern(""))
        .fetch_all(&mut *tx)
        .await?;

        for (key, dir) in &expired {
            if *dir {
                sqlx::query("DELETE FROM volt_kv WHERE starts_with(key, $1)")
                    .bind(format!("{}/", key))
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(relative) = self.relative_key(key) {
                notify(&mut tx, WatchAction::Expire, key, relative, *dir, "").await?;
            }
        }

        tx.commit().await?;

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Expired store keys");
        }
        Ok(expired.len())
    }

    async fn get_impl(&self, key: &str, recursive: bool) -> Result<Vec<Node>> {
        self.sweep_expired().await?;

        if !key.is_empty() {
            let row: Option<(String, bool)> =
                sqlx::query_as("SELECT value, is_dir FROM volt_kv WHERE key = $1")
                    .bind(self.full_key(key))
                    .fetch_optional(&self.pool)
                    .await?;

            match row {
                None => return Err(VoltError::KeyNotFound(key.to_string())),
                Some((value, false)) => {
                    return Ok(vec![Node {
                        key: key.to_string(),
                        value,
                        dir: false,
                    }])
                }
                Some((_, true)) => {}
            }
        }

        let pattern = self.subtree_pattern(key);
        let rows: Vec<(String, String, bool)> = if recursive {
            sqlx::query_as(
                r#"
                SELECT key, value, is_dir FROM volt_kv
                WHERE starts_with(key, $1) AND NOT is_dir
                ORDER BY key
                "#,
            )
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT key, value, is_dir FROM volt_kv
                WHERE starts_with(key, $1)
                  AND strpos(substr(key, length($1) + 1), '/') = 0
                ORDER BY key
                "#,
            )
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|(full, value, dir)| {
                self.relative_key(&full).map(|k| Node {
                    key: k.to_string(),
                    value: if dir { String::new() } else { value },
                    dir,
                })
            })
            .collect())
    }

    async fn set_impl(&self, key: &str, value: &str, options: SetOptions) -> Result<()> {
        if key.is_empty() {
            return Err(VoltError::InvalidArgument("cannot set the root".to_string()));
        }
        self.sweep_expired().await?;

        let full = self.full_key(key);
        let value = if options.dir { "" } else { value };
        let ttl = options.ttl.map(|t| t.as_secs_f64());

        let mut tx = self.pool.begin().await?;
        self.create_parents(&mut tx, key).await?;

        let affected = if let Some(prev) = &options.prev_value {
            sqlx::query(
                r#"
                UPDATE volt_kv
                SET value = $2,
                    expires_at = CASE WHEN $3::float8 IS NULL THEN NULL
                                      ELSE NOW() + make_interval(secs => $3::float8) END
                WHERE key = $1 AND value = $4 AND NOT is_dir
                "#,
            )
            .bind(&full)
            .bind(value)
            .bind(ttl)
            .bind(prev)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            match options.prev_exist {
                PrevExist::MustNotExist => sqlx::query(
                    r#"
                    INSERT INTO volt_kv (key, value, is_dir, expires_at)
                    VALUES ($1, $2, $3, CASE WHEN $4::float8 IS NULL THEN NULL
                                             ELSE NOW() + make_interval(secs => $4::float8) END)
                    ON CONFLICT (key) DO NOTHING
                    "#,
                )
                .bind(&full)
                .bind(value)
                .bind(options.dir)
                .bind(ttl)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
                PrevExist::MustExist => sqlx::query(
                    r#"
                    UPDATE volt_kv
                    SET value = $2,
                        expires_at = CASE WHEN $4::float8 IS NULL THEN NULL
                                          ELSE NOW() + make_interval(secs => $4::float8) END
                    WHERE key = $1 AND is_dir = $3
                    "#,
                )
                .bind(&full)
                .bind(value)
                .bind(options.dir)
                .bind(ttl)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
                PrevExist::Ignore => sqlx::query(
                    r#"
                    INSERT INTO volt_kv (key, value, is_dir, expires_at)
                    VALUES ($1, $2, $3, CASE WHEN $4::float8 IS NULL THEN NULL
                                             ELSE NOW() + make_interval(secs => $4::float8) END)
                    ON CONFLICT (key) DO UPDATE
                    SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                    WHERE volt_kv.is_dir = EXCLUDED.is_dir
                    "#,
                )
                .bind(&full)
                .bind(value)
                .bind(options.dir)
                .bind(ttl)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
            }
        };

        if affected == 0 {
            let existing: Option<(bool,)> =
                sqlx::query_as("SELECT is_dir FROM volt_kv WHERE key = $1")
                    .bind(&full)
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match (existing, &options) {
                (None, _) => VoltError::KeyNotFound(key.to_string()),
                (Some(_), o) if o.prev_value.is_some() => VoltError::CompareFailed(key.to_string()),
                (Some(_), o) if o.prev_exist == PrevExist::MustNotExist => {
                    VoltError::KeyExists(key.to_string())
                }
                (Some((is_dir,)), _) => VoltError::Store(format!(
                    "'{}' is {}",
                    key,
                    if is_dir { "a dir" } else { "not a dir" }
                )),
            });
        }

        notify(&mut tx, options.action(), &full, key, options.dir, value).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_parents(&self, tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<()> {
        let segments: Vec<&str> = key.split('/').collect();
        let mut parents = Vec::with_capacity(segments.len());
        let mut current = String::new();
        for segment in &segments[..segments.len() - 1] {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            parents.push(self.full_key(&current));
        }
        if parents.is_empty() {
            return Ok(());
        }

        let blocking: Option<(String,)> = sqlx::query_as(
            "SELECT key FROM volt_kv WHERE key = ANY($1) AND NOT is_dir LIMIT 1",
        )
        .bind(&parents)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some((full,)) = blocking {
            let relative = self.relative_key(&full).unwrap_or(&full).to_string();
            return Err(VoltError::Store(format!("'{}' is not a dir", relative)));
        }

        sqlx::query(
            r#"
            INSERT INTO volt_kv (key, is_dir)
            SELECT k, TRUE FROM UNNEST($1::text[]) AS k
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&parents)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn refresh_impl(&self, key: &str, ttl: Duration) -> Result<()> {
        self.sweep_expired().await?;

        let affected = sqlx::query(
            r#"
            UPDATE volt_kv
            SET expires_at = NOW() + make_interval(secs => $2)
            WHERE key = $1
            "#,
        )
        .bind(self.full_key(key))
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(VoltError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn delete_impl(&self, key: &str, recursive: bool) -> Result<()> {
        if key.is_empty() {
            return Err(VoltError::InvalidArgument("cannot delete the root".to_string()));
        }
        self.sweep_expired().await?;

        let full = self.full_key(key);
        let mut tx = self.pool.begin().await?;

        let row: Option<(bool,)> =
            sqlx::query_as("SELECT is_dir FROM volt_kv WHERE key = $1 FOR UPDATE")
                .bind(&full)
                .fetch_optional(&mut *tx)
                .await?;
        let dir = match row {
            Some((dir,)) => dir,
            None => return Err(VoltError::KeyNotFound(key.to_string())),
        };

        if dir {
            let pattern = self.subtree_pattern(key);
            if !recursive {
                let (children,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM volt_kv WHERE starts_with(key, $1)")
                        .bind(&pattern)
                        .fetch_one(&mut *tx)
                        .await?;
                if children > 0 {
                    return Err(VoltError::Store(format!("'{}' is not empty", key)));
                }
            }
            sqlx::query("DELETE FROM volt_kv WHERE starts_with(key, $1)")
                .bind(&pattern)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM volt_kv WHERE key = $1")
            .bind(&full)
            .execute(&mut *tx)
            .await?;

        notify(&mut tx, WatchAction::Delete, &full, key, dir, "").await?;
        tx.commit().await?;
        Ok(())
    }

    async fn exists_impl(&self, key: &str) -> Result<Option<bool>> {
        self.sweep_expired().await?;
        if key.is_empty() {
            return Ok(Some(true));
        }

        let row: Option<(bool,)> = sqlx::query_as("SELECT is_dir FROM volt_kv WHERE key = $1")
            .bind(self.full_key(key))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(dir,)| dir))
    }

    /// Parse a notification payload into an event relative to this prefix.
    fn parse_notification(&self, payload: &str) -> Option<WatchEvent> {
        let mut event: WatchEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid store notification");
                return None;
            }
        };
        event.key = self.relative_key(&event.key)?.to_string();
        Some(event)
    }
}

async fn notify(
    tx: &mut Transaction<'_, Postgres>,
    action: WatchAction,
    full_key: &str,
    key: &str,
    dir: bool,
    value: &str,
) -> Result<()> {
    let value = if value.len() > MAX_NOTIFY_VALUE { "" } else { value };
    let payload = serde_json::to_string(&WatchEvent {
        action,
        key: full_key.to_string(),
        dir,
        value: value.to_string(),
    })?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(NOTIFY_CHANNEL)
        .bind(payload)
        .execute(&mut **tx)
        .await?;

    tracing::trace!(key, ?action, "Store notify");
    Ok(())
}

impl CoordinationStore for PgStore {
    fn get<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, Vec<Node>> {
        Box::pin(self.get_impl(key, recursive))
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        options: SetOptions,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.set_impl(key, value, options))
    }

    fn refresh<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(self.refresh_impl(key, ttl))
    }

    fn delete<'a>(&'a self, key: &'a str, recursive: bool) -> StoreFuture<'a, ()> {
        Box::pin(self.delete_impl(key, recursive))
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<bool>> {
        Box::pin(self.exists_impl(key))
    }

    fn watch(&self, prefix: &str, recursive: bool) -> Box<dyn Watcher> {
        Box::new(PgWatcher {
            store: self.clone(),
            listener: None,
            sweep: None,
            prefix: prefix.to_string(),
            recursive,
        })
    }
}

/// LISTEN-based watcher. The listener connection is opened on first use.
struct PgWatcher {
    store: PgStore,
    listener: Option<PgListener>,
    sweep: Option<tokio::time::Interval>,
    prefix: String,
    recursive: bool,
}

impl PgWatcher {
    async fn next_outcome(&mut self, cancel: &CancellationToken) -> WatchOutcome {
        if self.listener.is_none() {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                connected = self.connect() => connected,
            };
            match connected {
                Ok(listener) => self.listener = Some(listener),
                Err(e) => return WatchOutcome::Failed(e),
            }
        }

        let sweep = self
            .sweep
            .get_or_insert_with(|| tokio::time::interval(SWEEP_INTERVAL));

        let listener = match self.listener.as_mut() {
            Some(listener) => listener,
            None => {
                return WatchOutcome::Failed(VoltError::Internal(
                    "listener missing after connect".to_string(),
                ))
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                notification = listener.try_recv() => match notification {
                    Ok(Some(notification)) => {
                        if let Some(event) = self.store.parse_notification(notification.payload()) {
                            if watch_matches(&self.prefix, self.recursive, &event.key) {
                                return WatchOutcome::Event(event);
                            }
                        }
                    }
                    Ok(None) => {
                        // Notifications sent while disconnected are lost.
                        self.listener = None;
                        return WatchOutcome::Failed(VoltError::Store(
                            "store listener connection lost".to_string(),
                        ));
                    }
                    Err(e) => {
                        self.listener = None;
                        return WatchOutcome::Failed(VoltError::Sql(e));
                    }
                },
                _ = sweep.tick() => {
                    if let Err(e) = self.store.sweep_expired().await {
                        return WatchOutcome::Failed(e);
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<PgListener> {
        let mut listener = PgListener::connect_with(&self.store.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        tracing::debug!(prefix = %self.prefix, "Store watch listening");
        Ok(listener)
    }
}

impl Watcher for PgWatcher {
    fn next<'a>(&'a mut self, cancel: &'a CancellationToken) -> WatchFuture<'a> {
        Box::pin(self.next_outcome(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_store(prefix: &str) -> PgStore {
        let pool = PgPool::connect_lazy("postgres://localhost/volt_test").unwrap();
        PgStore::from_pool(pool, prefix)
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let store = lazy_store("/volt/");
        assert_eq!(store.full_key(""), "volt");
        assert_eq!(store.full_key("cluster/director"), "volt/cluster/director");
        assert_eq!(store.relative_key("volt/monitor/web"), Some("monitor/web"));
        assert_eq!(store.relative_key("voltage/monitor"), None);
        assert_eq!(store.relative_key("volt"), Some(""));
    }

    #[tokio::test]
    async fn test_parse_notification() {
        let store = lazy_store("volt");
        let event = store
            .parse_notification(r#"{"action":"expire","key":"volt/cluster/members/m1","dir":true,"value":""}"#)
            .unwrap();
        assert_eq!(event.action, WatchAction::Expire);
        assert_eq!(event.key, "cluster/members/m1");
        assert!(event.dir);
    }

    #[tokio::test]
    async fn test_parse_notification_other_prefix() {
        let store = lazy_store("volt");
        assert!(store
            .parse_notification(r#"{"action":"set","key":"other/config"}"#)
            .is_none());
        assert!(store.parse_notification("garbage").is_none());
    }
}
