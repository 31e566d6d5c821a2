// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed document store.
//!
//! Records are kept as JSON in a single table keyed by document path:
//!
//! ```text
//! documents(path TEXT PRIMARY KEY, record TEXT NOT NULL, updated_at INTEGER NOT NULL)
//! ```
//!
//! # Atomic Conditional Writes
//!
//! Every conditional operation runs inside `BEGIN IMMEDIATE`, which takes the
//! write lock up front. The existing record is read, the [`WriteCondition`]
//! evaluated and the write performed without another writer able to slip in
//! between, which is what last-writer-wins needs.
//!
//! # SQLite Busy Handling
//!
//! SQLITE_BUSY/SQLITE_LOCKED are retried with exponential backoff (10ms
//! doubling up to 500ms, 5 attempts). Each retry re-runs the whole
//! transaction, so the condition is always evaluated against fresh state.

use super::{
    BoxFuture, DocumentHandle, DocumentStore, ReferenceFactory, StoreError, StoreRecord,
    WriteCondition,
};
use crate::config::StoreConfig;
use crate::document::Timestamp;
use crate::error::{ReplicationError, Result};
use crate::resource::{database_root, document_resource_id};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const IN_MEMORY_PATH: &str = ":memory:";

fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_store_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts, "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn store_error(operation: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError(format!("{}: {}", operation, e))
}

fn decode_record(json: &str) -> std::result::Result<StoreRecord, sqlx::Error> {
    serde_json::from_str(json).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    path: &str,
) -> std::result::Result<Option<StoreRecord>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT record FROM documents WHERE path = ?")
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|(json,)| decode_record(&json)).transpose()
}

async fn upsert_record(
    conn: &mut SqliteConnection,
    path: &str,
    json: &str,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (path, record, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            record = excluded.record,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(path)
    .bind(json)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Merge applied by [`SqliteStore::transact`] to the existing record.
enum Mutation<'a> {
    Replace(&'a str),
    Merge(&'a StoreRecord),
}

/// Document store persisted in SQLite (WAL mode).
pub struct SqliteStore {
    pool: SqlitePool,
    root: String,
    path: String,
}

impl SqliteStore {
    /// Open (creating if needed) the store described by `config` for `region`.
    pub async fn open(config: &StoreConfig, region: &str) -> Result<Self> {
        let path = config.sqlite_path.clone();
        info!(path = %path, region, "Initializing document store");

        let (options, max_connections) = if path == IN_MEMORY_PATH {
            // Each connection to :memory: is a separate database.
            let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                ReplicationError::Misconfigured(format!("Invalid SQLite path: {}", e))
            })?;
            (options, 1)
        } else {
            let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path))
                .map_err(|e| {
                    ReplicationError::Misconfigured(format!("Invalid SQLite path: {}", e))
                })?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_millis(100))
                .create_if_missing(true);
            (options, 4)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await?;
        if count > 0 {
            info!(count, "Opened existing document store");
        }

        Ok(Self {
            pool,
            root: database_root(&config.resource_prefix, region),
            path,
        })
    }

    /// Database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Database root, e.g. `proj/x/regions/us`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Run one read-check-write transaction under `BEGIN IMMEDIATE`.
    ///
    /// `create` controls whether an absent record may be written. The
    /// transaction is owned by sqlx, so a failed commit or a dropped future
    /// rolls back before the connection is reused.
    async fn transact(
        pool: &SqlitePool,
        path: &str,
        mutation: Mutation<'_>,
        condition: WriteCondition,
        create: bool,
    ) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let outcome: std::result::Result<bool, sqlx::Error> = async {
            let existing = fetch_record(&mut *tx, path).await?;
            if existing.is_none() && !create {
                return Ok(false);
            }
            if !condition.holds(existing.as_ref()) {
                return Ok(false);
            }

            match mutation {
                Mutation::Replace(json) => upsert_record(&mut *tx, path, json).await?,
                Mutation::Merge(fields) => {
                    let mut merged = existing.unwrap_or_default();
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    let json = serde_json::to_string(&merged)
                        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                    upsert_record(&mut *tx, path, &json).await?;
                }
            }
            Ok(true)
        }
        .await;

        match outcome {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Force flush WAL to main database.
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("store_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection pool. Later calls do nothing.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        if self.path != IN_MEMORY_PATH {
            if let Err(e) = self.checkpoint().await {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
        }
        self.pool.close().await;
        info!("Document store closed");
    }
}

impl ReferenceFactory for SqliteStore {
    fn reference(&self, path: &str) -> DocumentHandle {
        DocumentHandle::new(path, document_resource_id(&self.root, path))
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &str) -> BoxFuture<'_, Option<StoreRecord>> {
        let path = path.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            execute_with_retry("store_get", || async {
                let mut conn = pool.acquire().await?;
                fetch_record(&mut conn, &path).await
            })
            .await
            .map_err(|e| store_error("get", e))
        })
    }

    fn conditional_write(
        &self,
        path: &str,
        record: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let json =
                serde_json::to_string(&record).map_err(|e| store_error("conditional_write", e))?;
            let pool = &self.pool;
            execute_with_retry("store_conditional_write", || {
                Self::transact(pool, &path, Mutation::Replace(&json), condition, true)
            })
            .await
            .map_err(|e| store_error("conditional_write", e))
        })
    }

    fn conditional_flag_update(
        &self,
        path: &str,
        fields: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            execute_with_retry("store_conditional_flag_update", || {
                Self::transact(pool, &path, Mutation::Merge(&fields), condition, false)
            })
            .await
            .map_err(|e| store_error("conditional_flag_update", e))
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            let result = execute_with_retry("store_delete", || async {
                sqlx::query("DELETE FROM documents WHERE path = ?")
                    .bind(&path)
                    .execute(pool)
                    .await
            })
            .await
            .map_err(|e| store_error("delete", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            SqliteStore::close(self).await;
            Ok(())
        })
    }
}
