//! Signing keys and the key manager.
//!
//! Key material never leaves this module: [`SigningKey`] exposes only
//! `sign` and `verify` capabilities, and its `Debug` output carries the
//! identifier and algorithm, never the material.
//!
//! # Rotation
//!
//! [`KeyManager`] keeps the whole key set behind an atomically swappable
//! pointer. `rotate` installs a new active key and demotes the previous
//! one to verification-only in a single swap, so concurrent readers never
//! observe a partially updated set. Demoted keys stay resolvable until
//! `retire` removes them, which keeps tokens signed before a rotation
//! verifiable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use p384::ecdsa::{SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey};
use p384::pkcs8::DecodePrivateKey as _;
use rand::rngs::OsRng;
use rsa::pkcs1v15::{SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use rsa::signature::Keypair as _;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::debug;

use sigil_core::{SigningAlgorithm, TokenError, TokenResult};

use crate::config::{ConfigError, KeyConfig};
use crate::sign;

/// RSA modulus size for generated keys, in bits.
const RSA_KEY_BITS: usize = 2048;

// ============================================================================
// Signing Key
// ============================================================================

/// Prepared key material, sealed inside this module.
enum KeyMaterial {
    Hmac {
        secret: Vec<u8>,
    },
    Rsa {
        signing: Box<RsaSigningKey<Sha256>>,
        verifying: Box<RsaVerifyingKey<Sha256>>,
    },
    RsaVerify {
        verifying: Box<RsaVerifyingKey<Sha256>>,
    },
    Ec {
        signing: EcSigningKey,
        verifying: EcVerifyingKey,
    },
    EcVerify {
        verifying: EcVerifyingKey,
    },
}

impl KeyMaterial {
    fn has_private(&self) -> bool {
        matches!(self, Self::Hmac { .. } | Self::Rsa { .. } | Self::Ec { .. })
    }
}

/// A signing or verification key with identifier and validity window.
///
/// The validity window `[not_before, not_after)` gates signing only;
/// verification of previously issued tokens is always allowed while the
/// key remains installed.
pub struct SigningKey {
    key_id: String,
    algorithm: SigningAlgorithm,
    not_before: Option<OffsetDateTime>,
    not_after: Option<OffsetDateTime>,
    material: KeyMaterial,
}

impl SigningKey {
    /// Creates an HS256 key from a shared secret.
    #[must_use]
    pub fn hmac(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::Hs256,
            not_before: None,
            not_after: None,
            material: KeyMaterial::Hmac {
                secret: secret.into(),
            },
        }
    }

    /// Generates a fresh RS256 key pair.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if key generation fails.
    pub fn generate_rsa(key_id: impl Into<String>) -> TokenResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| TokenError::crypto(e.to_string()))?;
        Ok(Self::from_rsa_private(key_id.into(), private))
    }

    /// Generates a fresh ES384 key pair.
    #[must_use]
    pub fn generate_ec(key_id: impl Into<String>) -> Self {
        let signing = EcSigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::Es384,
            not_before: None,
            not_after: None,
            material: KeyMaterial::Ec { signing, verifying },
        }
    }

    /// Loads an RS256 private key from PKCS#8 PEM.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the PEM data is invalid.
    pub fn rsa_from_pem(key_id: impl Into<String>, private_pem: &str) -> TokenResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|e| TokenError::crypto(e.to_string()))?;
        Ok(Self::from_rsa_private(key_id.into(), private))
    }

    /// Loads a verification-only RS256 key from a public-key PEM.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the PEM data is invalid.
    pub fn rsa_verify_from_pem(key_id: impl Into<String>, public_pem: &str) -> TokenResult<Self> {
        let public = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| TokenError::crypto(e.to_string()))?;
        Ok(Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::Rs256,
            not_before: None,
            not_after: None,
            material: KeyMaterial::RsaVerify {
                verifying: Box::new(RsaVerifyingKey::new(public)),
            },
        })
    }

    /// Loads an ES384 private key from PKCS#8 PEM.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the PEM data is invalid.
    pub fn ec_from_pem(key_id: impl Into<String>, private_pem: &str) -> TokenResult<Self> {
        let secret = p384::SecretKey::from_pkcs8_pem(private_pem)
            .map_err(|e| TokenError::crypto(e.to_string()))?;
        let signing = EcSigningKey::from(&secret);
        let verifying = *signing.verifying_key();
        Ok(Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::Es384,
            not_before: None,
            not_after: None,
            material: KeyMaterial::Ec { signing, verifying },
        })
    }

    /// Loads a verification-only ES384 key from a public-key PEM.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the PEM data is invalid.
    pub fn ec_verify_from_pem(key_id: impl Into<String>, public_pem: &str) -> TokenResult<Self> {
        use p384::pkcs8::DecodePublicKey as _;
        let public = p384::PublicKey::from_public_key_pem(public_pem)
            .map_err(|e| TokenError::crypto(e.to_string()))?;
        Ok(Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::Es384,
            not_before: None,
            not_after: None,
            material: KeyMaterial::EcVerify {
                verifying: EcVerifyingKey::from(public),
            },
        })
    }

    fn from_rsa_private(key_id: String, private: RsaPrivateKey) -> Self {
        let signing = RsaSigningKey::<Sha256>::new(private);
        let verifying = signing.verifying_key();
        Self {
            key_id,
            algorithm: SigningAlgorithm::Rs256,
            not_before: None,
            not_after: None,
            material: KeyMaterial::Rsa {
                signing: Box::new(signing),
                verifying: Box::new(verifying),
            },
        }
    }

    /// Sets the validity window `[not_before, not_after)`.
    #[must_use]
    pub fn with_validity(
        mut self,
        not_before: Option<OffsetDateTime>,
        not_after: Option<OffsetDateTime>,
    ) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the key's algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns `true` if `now` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.not_before.is_none_or(|nb| now >= nb)
            && self.not_after.is_none_or(|na| now < na)
    }

    /// Returns `true` if this key can produce signatures at `now`.
    #[must_use]
    pub fn can_sign(&self, now: OffsetDateTime) -> bool {
        self.material.has_private() && self.is_valid_at(now)
    }

    /// Signs a message.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` for verification-only material or a signing fault.
    pub fn sign(&self, message: &[u8]) -> TokenResult<Vec<u8>> {
        match &self.material {
            KeyMaterial::Hmac { secret } => sign::hmac_sign(secret, message),
            KeyMaterial::Rsa { signing, .. } => sign::rsa_sign(signing, message),
            KeyMaterial::Ec { signing, .. } => sign::ec_sign(signing, message),
            KeyMaterial::RsaVerify { .. } | KeyMaterial::EcVerify { .. } => Err(
                TokenError::crypto(format!("key '{}' is verification-only", self.key_id)),
            ),
        }
    }

    /// Verifies a signature over a message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` when the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> TokenResult<()> {
        match &self.material {
            KeyMaterial::Hmac { secret } => sign::hmac_verify(secret, message, signature),
            KeyMaterial::Rsa { verifying, .. } | KeyMaterial::RsaVerify { verifying } => {
                sign::rsa_verify(verifying, message, signature)
            }
            KeyMaterial::Ec { verifying, .. } | KeyMaterial::EcVerify { verifying } => {
                sign::ec_verify(verifying, message, signature)
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs and panics.
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("can_sign", &self.material.has_private())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Key Manager
// ============================================================================

#[derive(Default)]
struct KeySet {
    active: Option<String>,
    keys: HashMap<String, Arc<SigningKey>>,
}

/// Holds the installed keys and the active-key pointer.
///
/// All mutation happens through whole-set swaps, so `active_key` and
/// `resolve` are lock-free reads and never observe a partial update.
pub struct KeyManager {
    keys: ArcSwap<KeySet>,
}

impl KeyManager {
    /// Creates an empty key manager (no keys installed, nothing active).
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: ArcSwap::from_pointee(KeySet::default()),
        }
    }

    /// Creates a key manager with one installed, active key.
    #[must_use]
    pub fn with_active(key: SigningKey) -> Self {
        let manager = Self::new();
        manager.rotate(key);
        manager
    }

    /// Builds a key manager from read-once configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a key entry is inconsistent or more
    /// than one entry is marked active.
    pub fn from_configs(configs: &[KeyConfig]) -> Result<Self, ConfigError> {
        let mut keys = HashMap::with_capacity(configs.len());
        let mut active = None;
        for config in configs {
            let key = build_key(config)?;
            if config.active {
                if active.is_some() {
                    return Err(ConfigError::MultipleActiveKeys);
                }
                if !key.material.has_private() {
                    return Err(ConfigError::ActiveKeyCannotSign {
                        key_id: key.key_id.clone(),
                    });
                }
                active = Some(key.key_id.clone());
            }
            if keys.insert(key.key_id.clone(), Arc::new(key)).is_some() {
                return Err(ConfigError::DuplicateKeyId {
                    key_id: config.key_id.clone(),
                });
            }
        }
        Ok(Self {
            keys: ArcSwap::from_pointee(KeySet { active, keys }),
        })
    }

    /// Installs a key without making it active.
    pub fn install(&self, key: SigningKey) {
        let key = Arc::new(key);
        self.keys.rcu(|current| {
            let mut keys = current.keys.clone();
            keys.insert(key.key_id().to_string(), Arc::clone(&key));
            Arc::new(KeySet {
                active: current.active.clone(),
                keys,
            })
        });
    }

    /// Installs a new active key, demoting the previous active key to
    /// verification-only.
    ///
    /// The swap is atomic: concurrent `active_key`/`resolve` calls see
    /// either the old set or the new one, never a mixture. The demoted
    /// key stays installed until [`retire`](Self::retire).
    pub fn rotate(&self, key: SigningKey) {
        let key_id = key.key_id().to_string();
        let key = Arc::new(key);
        self.keys.rcu(|current| {
            let mut keys = current.keys.clone();
            keys.insert(key_id.clone(), Arc::clone(&key));
            Arc::new(KeySet {
                active: Some(key_id.clone()),
                keys,
            })
        });
        debug!(key_id = %key_id, "rotated active signing key");
    }

    /// Removes a key entirely. Tokens signed by it stop verifying.
    ///
    /// Retiring the active key leaves the manager with no active key.
    /// Returns `true` if the key existed.
    pub fn retire(&self, key_id: &str) -> bool {
        let mut removed = false;
        self.keys.rcu(|current| {
            let mut keys = current.keys.clone();
            removed = keys.remove(key_id).is_some();
            let active = current.active.clone().filter(|active| active != key_id);
            Arc::new(KeySet { active, keys })
        });
        if removed {
            debug!(key_id = %key_id, "retired signing key");
        }
        removed
    }

    /// Returns the active signing key.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` when no key is active or the active key is
    /// outside its validity window at `now`.
    pub fn active_key(&self, now: OffsetDateTime) -> TokenResult<Arc<SigningKey>> {
        let set = self.keys.load();
        let key_id = set.active.as_ref().ok_or(TokenError::NoActiveKey)?;
        let key = set.keys.get(key_id).ok_or(TokenError::NoActiveKey)?;
        if !key.can_sign(now) {
            return Err(TokenError::NoActiveKey);
        }
        Ok(Arc::clone(key))
    }

    /// Resolves a verification-capable key by identifier.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` when no key with this id is installed.
    pub fn resolve(&self, key_id: &str) -> TokenResult<Arc<SigningKey>> {
        self.keys
            .load()
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| TokenError::unknown_key(key_id))
    }

    /// Returns the identifiers of all installed keys.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        self.keys.load().keys.keys().cloned().collect()
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

fn build_key(config: &KeyConfig) -> Result<SigningKey, ConfigError> {
    let algorithm =
        SigningAlgorithm::parse(&config.algorithm).map_err(|_| ConfigError::UnknownAlgorithm {
            key_id: config.key_id.clone(),
            algorithm: config.algorithm.clone(),
        })?;

    let key = match algorithm {
        SigningAlgorithm::Hs256 => {
            let encoded =
                config
                    .secret_base64
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingKeyMaterial {
                        key_id: config.key_id.clone(),
                    })?;
            let secret =
                BASE64_STANDARD
                    .decode(encoded)
                    .map_err(|_| ConfigError::InvalidKeyMaterial {
                        key_id: config.key_id.clone(),
                        message: "secret is not valid base64".to_string(),
                    })?;
            SigningKey::hmac(&config.key_id, secret)
        }
        SigningAlgorithm::Rs256 => load_pem_key(
            config,
            SigningKey::rsa_from_pem,
            SigningKey::rsa_verify_from_pem,
        )?,
        SigningAlgorithm::Es384 => load_pem_key(
            config,
            SigningKey::ec_from_pem,
            SigningKey::ec_verify_from_pem,
        )?,
    };

    let not_before = parse_window_bound(config, config.not_before)?;
    let not_after = parse_window_bound(config, config.not_after)?;
    if let (Some(nb), Some(na)) = (not_before, not_after)
        && na <= nb
    {
        return Err(ConfigError::InvalidKeyMaterial {
            key_id: config.key_id.clone(),
            message: "not_after must be after not_before".to_string(),
        });
    }

    Ok(key.with_validity(not_before, not_after))
}

fn load_pem_key(
    config: &KeyConfig,
    from_private: impl Fn(String, &str) -> TokenResult<SigningKey>,
    from_public: impl Fn(String, &str) -> TokenResult<SigningKey>,
) -> Result<SigningKey, ConfigError> {
    let result = match (&config.private_key_pem, &config.public_key_pem) {
        (Some(pem), _) => from_private(config.key_id.clone(), pem),
        (None, Some(pem)) => from_public(config.key_id.clone(), pem),
        (None, None) => {
            return Err(ConfigError::MissingKeyMaterial {
                key_id: config.key_id.clone(),
            });
        }
    };
    result.map_err(|e| ConfigError::InvalidKeyMaterial {
        key_id: config.key_id.clone(),
        message: e.to_string(),
    })
}

fn parse_window_bound(
    config: &KeyConfig,
    bound: Option<i64>,
) -> Result<Option<OffsetDateTime>, ConfigError> {
    bound
        .map(|seconds| {
            OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| {
                ConfigError::InvalidKeyMaterial {
                    key_id: config.key_id.clone(),
                    message: "validity bound out of timestamp range".to_string(),
                }
            })
        })
        .transpose()
}

// ============================================================================
// Tests
// ============================================================================
