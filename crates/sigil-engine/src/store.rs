//! Session records and the session store contract.
//!
//! Every issued token gets a session record keyed by its token id. The
//! record carries enough to answer revocation and expiry questions without
//! re-parsing the token, and revocation is a one-way flag on the record.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;

use sigil_core::{ClaimSet, TokenError, TokenResult};

// ============================================================================
// Session Record
// ============================================================================

/// One issued token's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Unique token identifier, the store's primary key.
    pub token_id: String,
    /// Subject the token was issued to.
    pub subject: String,
    /// Issuance instant, unix seconds resolution.
    pub issued_at: OffsetDateTime,
    /// Expiry instant, unix seconds resolution.
    pub expires_at: OffsetDateTime,
    /// Whether the token has been revoked. One-way: never cleared.
    pub revoked: bool,
}

impl SessionRecord {
    /// Builds a record from an issued token's claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if a registered claim is missing or has the
    /// wrong type.
    pub fn from_claims(claims: &ClaimSet) -> TokenResult<Self> {
        Ok(Self {
            token_id: claims.token_id()?.to_string(),
            subject: claims.subject()?.to_string(),
            issued_at: claims.issued_at()?,
            expires_at: claims.expires_at()?,
            revoked: false,
        })
    }

    /// Returns `true` if the record's expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// Session Store Contract
// ============================================================================

/// Durable (or in-memory) storage for session records.
///
/// Implementations must treat `token_id` as a primary key and reject
/// duplicate inserts with `DuplicateTokenId`. Backend faults map to
/// `StoreUnavailable` so callers can tell rejection from outage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTokenId` if a record with this token id already
    /// exists, revoked or not.
    async fn record(&self, record: SessionRecord) -> TokenResult<()>;

    /// Looks up a record by token id.
    async fn find(&self, token_id: &str) -> TokenResult<Option<SessionRecord>>;

    /// Returns `true` if the token id is known and revoked.
    ///
    /// A token id with no record is not revoked; absence is handled by
    /// the expiry check instead.
    async fn is_revoked(&self, token_id: &str) -> TokenResult<bool> {
        Ok(self
            .find(token_id)
            .await?
            .is_some_and(|record| record.revoked))
    }

    /// Returns `true` if the token id has no live record at `now`.
    ///
    /// Unknown ids report expired: a swept record and a never-issued
    /// token are indistinguishable here, and both are unusable.
    async fn is_expired(&self, token_id: &str, now: OffsetDateTime) -> TokenResult<bool> {
        Ok(self
            .find(token_id)
            .await?
            .is_none_or(|record| record.is_expired_at(now)))
    }

    /// Marks a record revoked. Idempotent; unknown ids are a no-op.
    ///
    /// Returns `true` if a record transitioned from live to revoked.
    async fn revoke(&self, token_id: &str) -> TokenResult<bool>;

    /// Revokes every live record for a subject. Returns the count revoked.
    async fn revoke_all_for_subject(&self, subject: &str) -> TokenResult<u64>;

    /// Deletes records whose expiry is at or before `now`. Returns the
    /// count deleted.
    async fn sweep(&self, now: OffsetDateTime) -> TokenResult<u64>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Process-local session store backed by a `HashMap`.
///
/// Suitable for tests and single-process deployments; records do not
/// survive a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records currently held.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the lock is poisoned.
    pub fn len(&self) -> TokenResult<usize> {
        Ok(self.read()?.len())
    }

    /// Returns `true` if the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the lock is poisoned.
    pub fn is_empty(&self) -> TokenResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> TokenResult<std::sync::RwLockReadGuard<'_, HashMap<String, SessionRecord>>> {
        self.records
            .read()
            .map_err(|_| TokenError::store_unavailable("session store lock poisoned"))
    }

    fn write(
        &self,
    ) -> TokenResult<std::sync::RwLockWriteGuard<'_, HashMap<String, SessionRecord>>> {
        self.records
            .write()
            .map_err(|_| TokenError::store_unavailable("session store lock poisoned"))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn record(&self, record: SessionRecord) -> TokenResult<()> {
        let mut records = self.write()?;
        if records.contains_key(&record.token_id) {
            return Err(TokenError::duplicate_token_id(&record.token_id));
        }
        records.insert(record.token_id.clone(), record);
        Ok(())
    }

    async fn find(&self, token_id: &str) -> TokenResult<Option<SessionRecord>> {
        Ok(self.read()?.get(token_id).cloned())
    }

    async fn revoke(&self, token_id: &str) -> TokenResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(token_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_subject(&self, subject: &str) -> TokenResult<u64> {
        let mut records = self.write()?;
        let mut revoked = 0;
        for record in records.values_mut() {
            if record.subject == subject && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn sweep(&self, now: OffsetDateTime) -> TokenResult<u64> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
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
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        let found = store.find("t1").await.unwrap().unwrap();
        assert_eq!(found.subject, "alice");
        assert!(!found.revoked);
        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_id_rejected() {
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        let err = store.record(record("t1", "bob", 3000)).await.unwrap_err();
        assert!(matches!(err, TokenError::DuplicateTokenId { .. }));
        // The original record is untouched.
        assert_eq!(store.find("t1").await.unwrap().unwrap().subject, "alice");
    }

    #[tokio::test]
    async fn test_revoke_is_one_way_and_idempotent() {
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        assert!(!store.is_revoked("t1").await.unwrap());
        assert!(store.revoke("t1").await.unwrap());
        assert!(store.is_revoked("t1").await.unwrap());
        // Second revoke reports no transition.
        assert!(!store.revoke("t1").await.unwrap());
        assert!(store.is_revoked("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_unknown_id_is_noop() {
        let store = MemorySessionStore::new();
        assert!(!store.revoke("missing").await.unwrap());
        assert!(!store.is_revoked("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_for_subject() {
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();
        store.record(record("t2", "alice", 3000)).await.unwrap();
        store.record(record("t3", "bob", 2000)).await.unwrap();
        store.revoke("t1").await.unwrap();

        // Only alice's live record counts.
        assert_eq!(store.revoke_all_for_subject("alice").await.unwrap(), 1);
        assert!(store.is_revoked("t2").await.unwrap());
        assert!(!store.is_revoked("t3").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_expired() {
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();

        assert!(!store.is_expired("t1", ts(1500)).await.unwrap());
        assert!(store.is_expired("t1", ts(2000)).await.unwrap());
        // A token the store never saw reports expired too.
        assert!(store.is_expired("missing", ts(1500)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired() {
        let store = MemorySessionStore::new();
        store.record(record("t1", "alice", 2000)).await.unwrap();
        store.record(record("t2", "alice", 5000)).await.unwrap();

        // Expiry boundary is inclusive: expires_at == now is expired.
        assert_eq!(store.sweep(ts(2000)).await.unwrap(), 1);
        assert!(store.find("t1").await.unwrap().is_none());
        assert!(store.find("t2").await.unwrap().is_some());
    }

    #[test]
    fn test_record_from_claims() {
        let claims = ClaimSet::builder("alice")
            .issued_at(ts(1000))
            .expires_at(ts(2000))
            .token_id("t1")
            .build()
            .unwrap();
        let record = SessionRecord::from_claims(&claims).unwrap();
        assert_eq!(record.token_id, "t1");
        assert_eq!(record.subject, "alice");
        assert_eq!(record.issued_at, ts(1000));
        assert_eq!(record.expires_at, ts(2000));
        assert!(!record.revoked);
    }
}
