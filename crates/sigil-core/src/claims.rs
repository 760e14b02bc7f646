//! Claim model for Sigil tokens.
//!
//! A [`ClaimSet`] is an ordered mapping from claim name to [`ClaimValue`].
//! Ordering is byte-lexicographic over the claim names, which is also the
//! canonical encoding order, so two logically equal claim sets always
//! serialize to identical bytes.
//!
//! Every issued token carries four registered claims:
//!
//! - `subject` — whom the token asserts about
//! - `issuedAt` — issuance time, unix seconds
//! - `expiresAt` — expiry time, unix seconds, strictly after `issuedAt`
//! - `tokenId` — unique id per issuing instance, used for revocation

use std::collections::BTreeMap;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{TokenError, TokenResult};

/// Registered claim: the subject the token asserts about.
pub const CLAIM_SUBJECT: &str = "subject";

/// Registered claim: issuance time as unix seconds.
pub const CLAIM_ISSUED_AT: &str = "issuedAt";

/// Registered claim: expiry time as unix seconds.
pub const CLAIM_EXPIRES_AT: &str = "expiresAt";

/// Registered claim: unique token identifier.
pub const CLAIM_TOKEN_ID: &str = "tokenId";

/// Optional claim: the issuing authority, stamped by the engine when
/// configured.
pub const CLAIM_ISSUER: &str = "issuer";

const REGISTERED_CLAIMS: &[&str] = &[
    CLAIM_SUBJECT,
    CLAIM_ISSUED_AT,
    CLAIM_EXPIRES_AT,
    CLAIM_TOKEN_ID,
];

// ============================================================================
// Claim Values
// ============================================================================

/// A single claim value.
///
/// The value grammar is deliberately closed: strings, 64-bit integers,
/// booleans, sequences, and nested claim sets. No floats and no null, so
/// canonical encoding has no ambiguity sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimValue {
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Integer(i64),
    /// A boolean.
    Boolean(bool),
    /// An ordered sequence of values.
    Array(Vec<ClaimValue>),
    /// A nested claim set.
    Object(ClaimSet),
}

impl ClaimValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns a short name for the value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<ClaimValue>> for ClaimValue {
    fn from(value: Vec<ClaimValue>) -> Self {
        Self::Array(value)
    }
}

impl From<ClaimSet> for ClaimValue {
    fn from(value: ClaimSet) -> Self {
        Self::Object(value)
    }
}

// ============================================================================
// Claim Sets
// ============================================================================

/// An ordered set of claims.
///
/// Entries are kept sorted by claim name in byte order, which is the
/// canonical encoding order. Equal claim sets therefore always encode to
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimSet {
    entries: BTreeMap<String, ClaimValue>,
}

impl ClaimSet {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for a claim set carrying the registered claims.
    #[must_use]
    pub fn builder(subject: impl Into<String>) -> ClaimSetBuilder {
        ClaimSetBuilder::new(subject)
    }

    /// Inserts a claim, replacing any existing value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ClaimValue>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Returns the value of a claim, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.entries.get(name)
    }

    /// Returns `true` if a claim with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the set holds no claims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over claims in canonical (byte-sorted) name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the registered `subject` claim.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if the claim is missing or not a string.
    pub fn subject(&self) -> TokenResult<&str> {
        self.required_str(CLAIM_SUBJECT)
    }

    /// Returns the registered `tokenId` claim.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if the claim is missing or not a string.
    pub fn token_id(&self) -> TokenResult<&str> {
        self.required_str(CLAIM_TOKEN_ID)
    }

    /// Returns the registered `issuedAt` claim as a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if the claim is missing, not an integer, or
    /// outside the representable timestamp range.
    pub fn issued_at(&self) -> TokenResult<OffsetDateTime> {
        self.required_timestamp(CLAIM_ISSUED_AT)
    }

    /// Returns the registered `expiresAt` claim as a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if the claim is missing, not an integer, or
    /// outside the representable timestamp range.
    pub fn expires_at(&self) -> TokenResult<OffsetDateTime> {
        self.required_timestamp(CLAIM_EXPIRES_AT)
    }

    fn required_str(&self, name: &str) -> TokenResult<&str> {
        match self.entries.get(name) {
            Some(ClaimValue::String(s)) => Ok(s),
            Some(other) => Err(TokenError::invalid_claims(format!(
                "claim '{name}' must be a string, got {}",
                other.type_name()
            ))),
            None => Err(TokenError::invalid_claims(format!(
                "missing required claim '{name}'"
            ))),
        }
    }

    fn required_timestamp(&self, name: &str) -> TokenResult<OffsetDateTime> {
        match self.entries.get(name) {
            Some(ClaimValue::Integer(seconds)) => OffsetDateTime::from_unix_timestamp(*seconds)
                .map_err(|_| {
                    TokenError::invalid_claims(format!("claim '{name}' is out of timestamp range"))
                }),
            Some(other) => Err(TokenError::invalid_claims(format!(
                "claim '{name}' must be an integer, got {}",
                other.type_name()
            ))),
            None => Err(TokenError::invalid_claims(format!(
                "missing required claim '{name}'"
            ))),
        }
    }
}

impl FromIterator<(String, ClaimValue)> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = (String, ClaimValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`ClaimSet`] with the registered claims.
///
/// `build()` generates a v4 UUID `tokenId` when none is supplied and
/// enforces `expiresAt > issuedAt`.
pub struct ClaimSetBuilder {
    subject: String,
    issued_at: Option<OffsetDateTime>,
    expires_at: Option<OffsetDateTime>,
    lifetime: Option<time::Duration>,
    token_id: Option<String>,
    extra: BTreeMap<String, ClaimValue>,
}

impl ClaimSetBuilder {
    fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issued_at: None,
            expires_at: None,
            lifetime: None,
            token_id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Sets the issuance time. Defaults to the current wall clock.
    #[must_use]
    pub fn issued_at(mut self, issued_at: OffsetDateTime) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    /// Sets an explicit expiry time.
    #[must_use]
    pub fn expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the expiry as a duration past the issuance time. Ignored when
    /// an explicit expiry is set.
    #[must_use]
    pub fn lifetime(mut self, lifetime: time::Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Overrides the generated token id.
    #[must_use]
    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// Adds a custom claim.
    #[must_use]
    pub fn claim(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Builds the claim set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if no expiry is configured, the expiry does
    /// not follow issuance, or a custom claim collides with a registered
    /// name.
    pub fn build(self) -> TokenResult<ClaimSet> {
        let issued_at = self
            .issued_at
            .unwrap_or_else(OffsetDateTime::now_utc)
            .replace_nanosecond(0)
            .map_err(|_| TokenError::invalid_claims("issuedAt is out of timestamp range"))?;

        let expires_at = match (self.expires_at, self.lifetime) {
            (Some(at), _) => at,
            (None, Some(lifetime)) => issued_at + lifetime,
            (None, None) => {
                return Err(TokenError::invalid_claims(
                    "no expiry configured: set expires_at or lifetime",
                ));
            }
        };

        if expires_at.unix_timestamp() <= issued_at.unix_timestamp() {
            return Err(TokenError::invalid_claims(
                "expiresAt must be strictly after issuedAt",
            ));
        }

        for name in self.extra.keys() {
            if REGISTERED_CLAIMS.contains(&name.as_str()) {
                return Err(TokenError::invalid_claims(format!(
                    "custom claim '{name}' collides with a registered claim"
                )));
            }
        }

        let token_id = self
            .token_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut claims = ClaimSet {
            entries: self.extra,
        };
        claims.insert(CLAIM_SUBJECT, self.subject);
        claims.insert(CLAIM_ISSUED_AT, issued_at.unix_timestamp());
        claims.insert(CLAIM_EXPIRES_AT, expires_at.unix_timestamp());
        claims.insert(CLAIM_TOKEN_ID, token_id);
        Ok(claims)
    }
}

// ============================================================================
// Tests
// ============================================================================
