//! The token engine: issuance, validation, revocation.
//!
//! Validation walks a fixed pipeline and stops at the first failure:
//!
//! 1. segment split and base64 decode
//! 2. header decode (algorithm gate lives here)
//! 3. canonical claim decode under the configured limits
//! 4. key resolution by header `kid`, then algorithm cross-check
//! 5. signature verification over the first two segments
//! 6. temporal checks, `not-yet-valid` before `expired`
//! 7. revocation lookup against the session store
//!
//! Each stage's failure maps to exactly one [`TokenError`] variant, so
//! callers can distinguish a forged token from an expired one from a
//! store outage.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use sigil_core::claims::CLAIM_ISSUER;
use sigil_core::{ClaimSet, CodecLimits, TokenError, TokenHeader, TokenResult, codec, wire};

use crate::config::{ConfigError, EngineConfig};
use crate::keys::KeyManager;
use crate::store::{MemorySessionStore, SessionRecord, SessionStore};

// ============================================================================
// Issuance Types
// ============================================================================

/// Parameters for one token issuance.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    subject: String,
    lifetime: Option<Duration>,
    expires_at: Option<OffsetDateTime>,
    custom: Vec<(String, sigil_core::ClaimValue)>,
}

impl IssueRequest {
    /// Creates a request for a subject, using the engine's default
    /// lifetime.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            lifetime: None,
            expires_at: None,
            custom: Vec::new(),
        }
    }

    /// Overrides the engine's default lifetime.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Sets an absolute expiry, taking precedence over any lifetime.
    #[must_use]
    pub fn expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Adds a custom claim.
    #[must_use]
    pub fn claim(
        mut self,
        name: impl Into<String>,
        value: impl Into<sigil_core::ClaimValue>,
    ) -> Self {
        self.custom.push((name.into(), value.into()));
        self
    }
}

/// The result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The serialized three-segment token.
    pub token: String,
    /// The generated token identifier, usable for revocation.
    pub token_id: String,
    /// When the token expires.
    pub expires_at: OffsetDateTime,
}

// ============================================================================
// Token Engine
// ============================================================================

/// Issues, validates, and revokes tokens.
///
/// The engine is `Send + Sync` and all operations take `&self`; share one
/// instance behind an `Arc` across tasks.
pub struct TokenEngine {
    keys: Arc<KeyManager>,
    store: Arc<dyn SessionStore>,
    issuer: Option<String>,
    default_lifetime: Duration,
    codec_limits: CodecLimits,
}

impl TokenEngine {
    /// Creates an engine from parts.
    #[must_use]
    pub fn new(keys: Arc<KeyManager>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(keys, store, &EngineConfig::default())
    }

    /// Creates an engine with explicit configuration. The config's `keys`
    /// section is not consulted here; pass it to
    /// [`KeyManager::from_configs`] first.
    #[must_use]
    pub fn with_config(
        keys: Arc<KeyManager>,
        store: Arc<dyn SessionStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            keys,
            store,
            issuer: config.issuer.clone(),
            default_lifetime: config.token_lifetime,
            codec_limits: config.codec.to_limits(),
        }
    }

    /// Builds a fully configured engine with an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when validation or key loading fails.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = Arc::new(KeyManager::from_configs(&config.keys)?);
        Ok(Self::with_config(
            keys,
            Arc::new(MemorySessionStore::new()),
            config,
        ))
    }

    /// Returns the key manager, for rotation and retirement.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Returns the session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------------

    /// Issues a token signed by the active key, using the current wall
    /// clock as the issuance instant.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` without an active signing key,
    /// `InvalidClaims` for a bad request, `DuplicateTokenId` on a token id
    /// collision, and `StoreUnavailable` on a store fault. The token is
    /// recorded in the store before it is returned; a failed record means
    /// no token.
    pub async fn issue(&self, request: IssueRequest) -> TokenResult<IssuedToken> {
        self.issue_at(request, OffsetDateTime::now_utc()).await
    }

    /// Issues a token with an explicit issuance instant.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub async fn issue_at(
        &self,
        request: IssueRequest,
        now: OffsetDateTime,
    ) -> TokenResult<IssuedToken> {
        let key = self.keys.active_key(now)?;

        let mut builder = ClaimSet::builder(request.subject).issued_at(now);
        builder = match request.expires_at {
            Some(at) => builder.expires_at(at),
            None => {
                let lifetime = request.lifetime.unwrap_or(self.default_lifetime);
                let lifetime = time::Duration::try_from(lifetime)
                    .map_err(|_| TokenError::invalid_claims("lifetime is out of range"))?;
                builder.lifetime(lifetime)
            }
        };
        if let Some(issuer) = &self.issuer {
            builder = builder.claim(CLAIM_ISSUER, issuer.clone());
        }
        for (name, value) in request.custom {
            builder = builder.claim(name, value);
        }
        let claims = builder.build()?;

        let header = TokenHeader::new(key.algorithm(), key.key_id());
        let signing_input = wire::signing_input(&header.encode(), &codec::encode(&claims));
        let signature = key.sign(signing_input.as_bytes())?;
        let token = wire::compose(&signing_input, &signature);

        // Record before returning: a token the store never saw could not
        // be revoked.
        let record = SessionRecord::from_claims(&claims)?;
        let token_id = record.token_id.clone();
        let expires_at = record.expires_at;
        self.store.record(record).await?;

        debug!(
            token_id = %token_id,
            key_id = %key.key_id(),
            algorithm = %key.algorithm(),
            "issued token"
        );
        Ok(IssuedToken {
            token,
            token_id,
            expires_at,
        })
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Validates a token against the current wall clock.
    ///
    /// # Errors
    ///
    /// One variant per pipeline stage: `Malformed`, `UnsupportedAlgorithm`,
    /// `UnknownKey`, `InvalidSignature`, `NotYetValid`, `Expired`,
    /// `Revoked`, `InvalidClaims`, or `StoreUnavailable`.
    pub async fn validate(&self, token: &str) -> TokenResult<ClaimSet> {
        self.validate_at(token, OffsetDateTime::now_utc()).await
    }

    /// Validates a token at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub async fn validate_at(&self, token: &str, now: OffsetDateTime) -> TokenResult<ClaimSet> {
        // Parse and decode. Nothing here touches key material.
        let (header_seg, claims_seg, signature_seg) = wire::split_segments(token)?;
        let header_bytes = wire::decode_segment(header_seg)?;
        let claim_bytes = wire::decode_segment(claims_seg)?;
        let signature = wire::decode_segment(signature_seg)?;

        let header = TokenHeader::decode(&header_bytes)?;
        let claims = codec::decode_with_limits(&claim_bytes, &self.codec_limits)?;

        // Key resolution. A header algorithm that disagrees with the
        // resolved key is treated as a forgery, not a key problem.
        let key = self.keys.resolve(&header.key_id)?;
        if key.algorithm() != header.algorithm {
            return Err(TokenError::InvalidSignature);
        }

        // The signature covers the exact bytes received, not re-encoded
        // ones.
        let signed_len = header_seg.len() + 1 + claims_seg.len();
        key.verify(token[..signed_len].as_bytes(), &signature)?;

        // Temporal checks only after authenticity is established.
        let issued_at = claims.issued_at()?;
        let expires_at = claims.expires_at()?;
        if now < issued_at {
            return Err(TokenError::NotYetValid);
        }
        if now >= expires_at {
            return Err(TokenError::Expired);
        }

        let token_id = claims.token_id()?;
        if self.store.is_revoked(token_id).await? {
            return Err(TokenError::Revoked);
        }

        Ok(claims)
    }

    // ------------------------------------------------------------------------
    // Revocation and maintenance
    // ------------------------------------------------------------------------

    /// Revokes a token by id. Idempotent; returns `true` on the first
    /// revocation.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a store fault.
    pub async fn revoke(&self, token_id: &str) -> TokenResult<bool> {
        let revoked = self.store.revoke(token_id).await?;
        if revoked {
            debug!(token_id = %token_id, "revoked token");
        }
        Ok(revoked)
    }

    /// Revokes every live token for a subject. Returns the count revoked.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a store fault.
    pub async fn revoke_all_for_subject(&self, subject: &str) -> TokenResult<u64> {
        let revoked = self.store.revoke_all_for_subject(subject).await?;
        debug!(subject = %subject, revoked, "revoked subject sessions");
        Ok(revoked)
    }

    /// Deletes session records expired against the current wall clock.
    /// Returns the count deleted.
    ///
    /// Expired tokens already fail validation on the temporal check, so
    /// sweeping is storage hygiene, not a correctness requirement.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a store fault.
    pub async fn sweep(&self) -> TokenResult<u64> {
        self.sweep_at(OffsetDateTime::now_utc()).await
    }

    /// Deletes session records expired at an explicit instant. Returns
    /// the count deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on a store fault.
    pub async fn sweep_at(&self, now: OffsetDateTime) -> TokenResult<u64> {
        let deleted = self.store.sweep(now).await?;
        if deleted > 0 {
            debug!(deleted, "swept expired session records");
        }
        Ok(deleted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKey;

    fn ts(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    fn engine() -> TokenEngine {
        let keys = Arc::new(KeyManager::with_active(SigningKey::hmac(
            "k1",
            b"test-secret".to_vec(),
        )));
        TokenEngine::new(keys, Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let engine = engine();
        let issued = engine
            .issue_at(
                IssueRequest::new("alice").expires_at(ts(2000)),
                ts(1000),
            )
            .await
            .unwrap();

        let claims = engine.validate_at(&issued.token, ts(1500)).await.unwrap();
        assert_eq!(claims.subject().unwrap(), "alice");
        assert_eq!(claims.token_id().unwrap(), issued.token_id);
        assert_eq!(claims.issued_at().unwrap(), ts(1000));
        assert_eq!(claims.expires_at().unwrap(), ts(2000));
    }

    #[tokio::test]
    async fn test_default_lifetime_is_24h() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice"), ts(1000))
            .await
            .unwrap();
        assert_eq!(issued.expires_at, ts(1000 + 86400));
    }

    #[tokio::test]
    async fn test_issuer_claim_stamped() {
        let keys = Arc::new(KeyManager::with_active(SigningKey::hmac(
            "k1",
            b"secret".to_vec(),
        )));
        let config = EngineConfig {
            issuer: Some("auth0".to_string()),
            ..EngineConfig::default()
        };
        let engine =
            TokenEngine::with_config(keys, Arc::new(MemorySessionStore::new()), &config);

        let issued = engine
            .issue_at(IssueRequest::new("alice"), ts(1000))
            .await
            .unwrap();
        let claims = engine.validate_at(&issued.token, ts(1500)).await.unwrap();
        assert_eq!(claims.get(CLAIM_ISSUER).unwrap().as_str(), Some("auth0"));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        // Expiry is inclusive at the boundary.
        assert!(matches!(
            engine.validate_at(&issued.token, ts(2000)).await,
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            engine.validate_at(&issued.token, ts(2500)).await,
            Err(TokenError::Expired)
        ));
        // Just before expiry is fine.
        assert!(engine.validate_at(&issued.token, ts(1999)).await.is_ok());
    }

    #[tokio::test]
    async fn test_not_yet_valid_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        assert!(matches!(
            engine.validate_at(&issued.token, ts(999)).await,
            Err(TokenError::NotYetValid)
        ));
        // issuedAt itself is valid.
        assert!(engine.validate_at(&issued.token, ts(1000)).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        assert!(engine.revoke(&issued.token_id).await.unwrap());
        assert!(matches!(
            engine.validate_at(&issued.token, ts(1500)).await,
            Err(TokenError::Revoked)
        ));
        // Idempotent.
        assert!(!engine.revoke(&issued.token_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        // Flip the last signature character. 'A' and 'Q' both keep the
        // base64 trailing bits valid, so the change reaches the verifier.
        let mut tampered = issued.token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'Q' } else { 'A' });

        assert!(matches!(
            engine.validate_at(&tampered, ts(1500)).await,
            Err(TokenError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_tampered_claims_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        // Swap in a forged claims segment, keeping the signature.
        let (h, _, s) = wire::split_segments(&issued.token).unwrap();
        let forged_claims = codec::encode(
            &ClaimSet::builder("mallory")
                .issued_at(ts(1000))
                .expires_at(ts(2000))
                .build()
                .unwrap(),
        );
        let forged = format!("{h}.{}.{s}", wire::encode_segment(&forged_claims));

        assert!(matches!(
            engine.validate_at(&forged, ts(1500)).await,
            Err(TokenError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_malformed_tokens_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.validate_at("not-a-token", ts(1500)).await,
            Err(TokenError::Malformed { .. })
        ));
        assert!(matches!(
            engine.validate_at("a.b", ts(1500)).await,
            Err(TokenError::Malformed { .. })
        ));
        assert!(matches!(
            engine.validate_at("!!!.###.$$$", ts(1500)).await,
            Err(TokenError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        engine.keys().retire("k1");
        assert!(matches!(
            engine.validate_at(&issued.token, ts(1500)).await,
            Err(TokenError::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_is_invalid_signature() {
        let engine = engine();
        let issued = engine
            .issue_at(IssueRequest::new("alice").expires_at(ts(2000)), ts(1000))
            .await
            .unwrap();

        // Forge a header claiming a different algorithm for the same kid.
        let (_, c, s) = wire::split_segments(&issued.token).unwrap();
        let forged_header =
            TokenHeader::new(sigil_core::SigningAlgorithm::Rs256, "k1").encode();
        let forged = format!("{}.{c}.{s}", wire::encode_segment(&forged_header));

        assert!(matches!(
            engine.validate_at(&forged, ts(1500)).await,
            Err(TokenError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_issue_without_active_key() {
        let engine = TokenEngine::new(
            Arc::new(KeyManager::new()),
            Arc::new(MemorySessionStore::new()),
        );
        assert!(matches!(
            engine
                .issue_at(IssueRequest::new("alice"), ts(1000))
                .await,
            Err(TokenError::NoActiveKey)
        ));
    }

    #[tokio::test]
    async fn test_custom_claims_survive_round_trip() {
        let engine = engine();
        let issued = engine
            .issue_at(
                IssueRequest::new("alice")
                    .expires_at(ts(2000))
                    .claim("role", "admin")
                    .claim("loginCount", 7i64),
                ts(1000),
            )
            .await
            .unwrap();

        let claims = engine.validate_at(&issued.token, ts(1500)).await.unwrap();
        assert_eq!(claims.get("role").unwrap().as_str(), Some("admin"));
        assert_eq!(claims.get("loginCount").unwrap().as_integer(), Some(7));
    }

    #[tokio::test]
    async fn test_from_config_end_to_end() {
        use base64::Engine as _;
        let config = EngineConfig {
            issuer: Some("auth0".to_string()),
            keys: vec![crate::config::KeyConfig {
                key_id: "k1".to_string(),
                algorithm: "HS256".to_string(),
                secret_base64: Some(
                    base64::engine::general_purpose::STANDARD.encode(b"secret"),
                ),
                private_key_pem: None,
                public_key_pem: None,
                not_before: None,
                not_after: None,
                active: true,
            }],
            ..EngineConfig::default()
        };
        let engine = TokenEngine::from_config(&config).unwrap();
        let issued = engine
            .issue_at(IssueRequest::new("alice"), ts(1000))
            .await
            .unwrap();
        assert!(engine.validate_at(&issued.token, ts(1500)).await.is_ok());
    }
}
