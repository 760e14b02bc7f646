//! # sigil-store-sqlite
//!
//! SQLite-backed [`SessionStore`] for the Sigil token engine.
//!
//! One table, `sigil_sessions`, keyed by token id. Duplicate detection
//! rides on the primary key: inserts use `ON CONFLICT DO NOTHING` and a
//! zero row count means the id already existed. Timestamps are stored as
//! unix seconds, matching the claim wire format.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use time::OffsetDateTime;
use tracing::debug;

use sigil_core::{TokenError, TokenResult};
use sigil_engine::{SessionRecord, SessionStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sigil_sessions (
    token_id   TEXT PRIMARY KEY,
    subject    TEXT NOT NULL,
    issued_at  INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    revoked    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_sigil_sessions_subject
    ON sigil_sessions (subject);
CREATE INDEX IF NOT EXISTS idx_sigil_sessions_expires_at
    ON sigil_sessions (expires_at);
";

/// Session store backed by an embedded SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Opens (and creates if missing) a database file and applies the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file cannot be opened or the
    /// schema cannot be applied.
    pub async fn open(path: &str) -> TokenResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(store_error)?;
        Self::from_pool(pool).await
    }

    /// Opens an in-memory database, for tests and ephemeral deployments.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the database cannot be opened.
    pub async fn in_memory() -> TokenResult<Self> {
        // Each connection gets its own memory database, so the pool must
        // stay at a single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_error)?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the schema cannot be applied.
    pub async fn from_pool(pool: SqlitePool) -> TokenResult<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(store_error)?;
        debug!("sqlite session store ready");
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Counts all records, revoked and live.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a query fault.
    pub async fn len(&self) -> TokenResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sigil_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// Returns `true` if the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a query fault.
    pub async fn is_empty(&self) -> TokenResult<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn record(&self, record: SessionRecord) -> TokenResult<()> {
        let result = sqlx::query(
            "INSERT INTO sigil_sessions (token_id, subject, issued_at, expires_at, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (token_id) DO NOTHING",
        )
        .bind(&record.token_id)
        .bind(&record.subject)
        .bind(record.issued_at.unix_timestamp())
        .bind(record.expires_at.unix_timestamp())
        .bind(i64::from(record.revoked))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(TokenError::duplicate_token_id(&record.token_id));
        }
        Ok(())
    }

    async fn find(&self, token_id: &str) -> TokenResult<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT token_id, subject, issued_at, expires_at, revoked
             FROM sigil_sessions WHERE token_id = ?1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(row_to_record).transpose()
    }

    async fn revoke(&self, token_id: &str) -> TokenResult<bool> {
        let result = sqlx::query(
            "UPDATE sigil_sessions SET revoked = 1 WHERE token_id = ?1 AND revoked = 0",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_subject(&self, subject: &str) -> TokenResult<u64> {
        let result = sqlx::query(
            "UPDATE sigil_sessions SET revoked = 1 WHERE subject = ?1 AND revoked = 0",
        )
        .bind(subject)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn sweep(&self, now: OffsetDateTime) -> TokenResult<u64> {
        let result = sqlx::query("DELETE FROM sigil_sessions WHERE expires_at <= ?1")
            .bind(now.unix_timestamp())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(deleted, "swept expired session records");
        }
        Ok(deleted)
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> TokenResult<SessionRecord> {
    let issued_at: i64 = row.get("issued_at");
    let expires_at: i64 = row.get("expires_at");
    Ok(SessionRecord {
        token_id: row.get("token_id"),
        subject: row.get("subject"),
        issued_at: OffsetDateTime::from_unix_timestamp(issued_at)
            .map_err(|_| TokenError::store_unavailable("stored issued_at out of range"))?,
        expires_at: OffsetDateTime::from_unix_timestamp(expires_at)
            .map_err(|_| TokenError::store_unavailable("stored expires_at out of range"))?,
        revoked: row.get::<i64, _>("revoked") != 0,
    })
}

fn store_error(err: sqlx::Error) -> TokenError {
    TokenError::store_unavailable(err.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    fn record(token_id: &str, subject: &str, expires_at: i64) -> SessionRecord {
        SessionRecord {
            token_id: token_id.to_string(),
            subject: subject.to_string(),
            issued_at: ts(1000),
            expires_at: ts(expires_at),
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_record_and_find() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        let found = store.find("t1").await.unwrap().unwrap();
        assert_eq!(found, record("t1", "alice", 2000));
        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_id_rejected() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        let err = store.record(record("t1", "bob", 3000)).await.unwrap_err();
        assert!(matches!(err, TokenError::DuplicateTokenId { .. }));
        assert_eq!(store.find("t1").await.unwrap().unwrap().subject, "alice");
    }

    #[tokio::test]
    async fn test_revoke_is_one_way_and_idempotent() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        assert!(!store.is_revoked("t1").await.unwrap());
        assert!(store.revoke("t1").await.unwrap());
        assert!(store.is_revoked("t1").await.unwrap());
        assert!(!store.revoke("t1").await.unwrap());
        assert!(!store.revoke("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_for_subject() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();
        store.record(record("t2", "alice", 3000)).await.unwrap();
        store.record(record("t3", "bob", 2000)).await.unwrap();
        store.revoke("t1").await.unwrap();

        assert_eq!(store.revoke_all_for_subject("alice").await.unwrap(), 1);
        assert!(store.is_revoked("t2").await.unwrap());
        assert!(!store.is_revoked("t3").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();
        store.record(record("t2", "alice", 5000)).await.unwrap();

        assert_eq!(store.sweep(ts(2000)).await.unwrap(), 1);
        assert!(store.find("t1").await.unwrap().is_none());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_is_expired_after_sweep() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        assert!(!store.is_expired("t1", ts(1500)).await.unwrap());
        store.sweep(ts(3000)).await.unwrap();
        // Swept records report expired like never-issued ids.
        assert!(store.is_expired("t1", ts(1500)).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoked_flag_round_trips() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let mut rec = record("t1", "alice", 2000);
        rec.revoked = true;
        store.record(rec).await.unwrap();
        assert!(store.find("t1").await.unwrap().unwrap().revoked);
    }
}
