//! Token engine error types.
//!
//! Every failure the engine can produce is a typed variant here, so that
//! callers can distinguish "malformed input" from "valid but revoked" from
//! "expired" without parsing messages. The engine never panics on untrusted
//! input and never surfaces a token failure as a generic fault.

use crate::codec::CodecError;

/// Errors produced by token issuance, validation, and revocation.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token is structurally invalid (segment count, encoding, or
    /// claim syntax).
    #[error("Malformed token: {message}")]
    Malformed {
        /// Description of the structural problem.
        message: String,
    },

    /// The claim set is syntactically valid but violates a claim-level
    /// requirement (missing registered claim, wrong type, or an expiry
    /// that does not follow issuance).
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why the claims are invalid.
        message: String,
    },

    /// The key named in the token header is not known to the key manager.
    #[error("Unknown key: {key_id}")]
    UnknownKey {
        /// The key identifier that could not be resolved.
        key_id: String,
    },

    /// No signing key is currently active, so tokens cannot be issued.
    #[error("No active signing key")]
    NoActiveKey,

    /// The algorithm tag in the token header is not supported.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The unrecognized algorithm tag.
        algorithm: String,
    },

    /// The token signature does not verify against the resolved key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token's expiry has passed.
    #[error("Token expired")]
    Expired,

    /// The token's issuance time is in the future.
    #[error("Token not yet valid")]
    NotYetValid,

    /// The token has been explicitly revoked.
    #[error("Token revoked")]
    Revoked,

    /// A session record with this token id already exists.
    #[error("Duplicate token id: {token_id}")]
    DuplicateTokenId {
        /// The colliding token identifier.
        token_id: String,
    },

    /// The session store could not complete the operation (disk or lock
    /// contention). Transient; retry policy belongs to the caller.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure.
        message: String,
    },

    /// A cryptographic operation failed (key generation, key parsing, or
    /// signing with unusable material).
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the cryptographic failure.
        message: String,
    },
}

impl TokenError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownKey` error.
    #[must_use]
    pub fn unknown_key(key_id: impl Into<String>) -> Self {
        Self::UnknownKey {
            key_id: key_id.into(),
        }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Creates a new `DuplicateTokenId` error.
    #[must_use]
    pub fn duplicate_token_id(token_id: impl Into<String>) -> Self {
        Self::DuplicateTokenId {
            token_id: token_id.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Crypto` error.
    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means the presented token was rejected
    /// (as opposed to an engine-side fault such as a store outage).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. }
                | Self::InvalidClaims { .. }
                | Self::UnknownKey { .. }
                | Self::UnsupportedAlgorithm { .. }
                | Self::InvalidSignature
                | Self::Expired
                | Self::NotYetValid
                | Self::Revoked
        )
    }

    /// Returns `true` if the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl From<CodecError> for TokenError {
    fn from(err: CodecError) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Type alias for token engine results.
pub type TokenResult<T> = Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_predicate() {
        assert!(TokenError::malformed("bad").is_rejection());
        assert!(TokenError::InvalidSignature.is_rejection());
        assert!(TokenError::Expired.is_rejection());
        assert!(TokenError::Revoked.is_rejection());
        assert!(TokenError::unknown_key("k1").is_rejection());

        assert!(!TokenError::NoActiveKey.is_rejection());
        assert!(!TokenError::store_unavailable("disk full").is_rejection());
        assert!(!TokenError::duplicate_token_id("t1").is_rejection());
    }

    #[test]
    fn test_transient_predicate() {
        assert!(TokenError::store_unavailable("locked").is_transient());
        assert!(!TokenError::Expired.is_transient());
        assert!(!TokenError::crypto("bad key").is_transient());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            TokenError::unknown_key("kid-1").to_string(),
            "Unknown key: kid-1"
        );
        assert_eq!(
            TokenError::unsupported_algorithm("XX999").to_string(),
            "Unsupported algorithm: XX999"
        );
        assert_eq!(TokenError::Revoked.to_string(), "Token revoked");
    }
}
