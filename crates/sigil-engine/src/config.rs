//! Engine configuration.
//!
//! Configuration is read once at startup and handed to the engine by
//! value; there is no runtime reload. Durations deserialize from
//! humantime strings ("24h", "15m") and every field has a default, so an
//! empty config section yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sigil_core::{CodecLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_DEPTH};

/// Default token lifetime when issuance does not specify one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Engine Config
// ============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Issuer name stamped into every issued token's claims. Omitted
    /// claims-side when unset.
    pub issuer: Option<String>,

    /// Lifetime applied when an issuance request carries no expiry.
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,

    /// Resource bounds for the canonical codec.
    pub codec: CodecLimitsConfig,

    /// Signing keys to install at startup.
    pub keys: Vec<KeyConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            codec: CodecLimitsConfig::default(),
            keys: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    ///
    /// Key entries are validated separately when the key manager is built
    /// from them.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_lifetime.is_zero() {
            return Err(ConfigError::Invalid {
                message: "token_lifetime must be positive".to_string(),
            });
        }
        if let Some(issuer) = &self.issuer
            && issuer.is_empty()
        {
            return Err(ConfigError::Invalid {
                message: "issuer must not be empty when set".to_string(),
            });
        }
        self.codec.validate()?;
        Ok(())
    }
}

/// Resource bounds for decoding untrusted token bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecLimitsConfig {
    /// Maximum container nesting depth.
    pub max_depth: usize,
    /// Maximum encoded size in bytes.
    pub max_bytes: usize,
}

impl Default for CodecLimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl CodecLimitsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "codec.max_depth must be positive".to_string(),
            });
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                message: "codec.max_bytes must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Converts to the codec's limit type.
    #[must_use]
    pub fn to_limits(&self) -> CodecLimits {
        CodecLimits {
            max_depth: self.max_depth,
            max_bytes: self.max_bytes,
        }
    }
}

// ============================================================================
// Key Config
// ============================================================================

/// One signing key entry.
///
/// HS256 keys carry `secret_base64`; RS256 and ES384 keys carry
/// `private_key_pem` (sign and verify) or only `public_key_pem`
/// (verify-only). At most one entry may be `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Key identifier carried in token headers.
    pub key_id: String,

    /// Algorithm tag: `HS256`, `RS256`, or `ES384`.
    pub algorithm: String,

    /// Base64-encoded shared secret, HS256 only.
    #[serde(default)]
    pub secret_base64: Option<String>,

    /// PKCS#8 PEM private key, RS256/ES384.
    #[serde(default)]
    pub private_key_pem: Option<String>,

    /// Public-key PEM for verify-only installs, RS256/ES384.
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// Start of the signing validity window, unix seconds.
    #[serde(default)]
    pub not_before: Option<i64>,

    /// End of the signing validity window, unix seconds, exclusive.
    #[serde(default)]
    pub not_after: Option<i64>,

    /// Whether this key signs newly issued tokens.
    #[serde(default)]
    pub active: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration problems, reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("more than one key is marked active")]
    MultipleActiveKeys,

    #[error("active key '{key_id}' has no private material")]
    ActiveKeyCannotSign { key_id: String },

    #[error("duplicate key id '{key_id}'")]
    DuplicateKeyId { key_id: String },

    #[error("key '{key_id}' has unknown algorithm '{algorithm}'")]
    UnknownAlgorithm { key_id: String, algorithm: String },

    #[error("key '{key_id}' is missing key material")]
    MissingKeyMaterial { key_id: String },

    #[error("key '{key_id}' has invalid key material: {message}")]
    InvalidKeyMaterial { key_id: String, message: String },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.token_lifetime, Duration::from_secs(86400));
        assert!(config.issuer.is_none());
        assert_eq!(config.codec.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.codec.max_bytes, DEFAULT_MAX_BYTES);
    }

    #[test]
    fn test_deserialize_empty_section() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.token_lifetime, DEFAULT_TOKEN_LIFETIME);
    }

    #[test]
    fn test_deserialize_humantime_lifetime() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"issuer":"auth0","token_lifetime":"15m"}"#).unwrap();
        assert_eq!(config.token_lifetime, Duration::from_secs(900));
        assert_eq!(config.issuer.as_deref(), Some("auth0"));
    }

    #[test]
    fn test_deserialize_key_entry() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "keys": [
                    {"key_id": "k1", "algorithm": "HS256",
                     "secret_base64": "c2VjcmV0", "active": true}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.keys.len(), 1);
        assert!(config.keys[0].active);
        assert!(config.keys[0].not_before.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_lifetime() {
        let config = EngineConfig {
            token_lifetime: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_issuer() {
        let config = EngineConfig {
            issuer: Some(String::new()),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_codec_limits() {
        let config = EngineConfig {
            codec: CodecLimitsConfig {
                max_depth: 0,
                max_bytes: DEFAULT_MAX_BYTES,
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
