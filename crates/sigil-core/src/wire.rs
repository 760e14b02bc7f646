//! Token wire format.
//!
//! A token is three segments joined by `.`:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(signature)
//! ```
//!
//! Header and claims are canonical codec bytes; the signature covers the
//! ASCII bytes of `base64url(header) "." base64url(claims)`. Segments use
//! the URL-safe base64 alphabet without padding, which never contains `.`,
//! so the separator is unambiguous.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::claims::{ClaimSet, ClaimValue};
use crate::codec;
use crate::error::{TokenError, TokenResult};

/// The segment separator. Never appears inside an encoded segment.
pub const SEGMENT_SEPARATOR: char = '.';

/// Header claim carrying the algorithm tag.
pub const HEADER_ALGORITHM: &str = "alg";

/// Header claim carrying the signing key identifier.
pub const HEADER_KEY_ID: &str = "kid";

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms, one per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256 (symmetric).
    Hs256,
    /// RSA PKCS#1 v1.5 with SHA-256.
    Rs256,
    /// ECDSA over P-384 with SHA-384.
    Es384,
}

impl SigningAlgorithm {
    /// Returns the algorithm tag as it appears in token headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Rs256 => "RS256",
            Self::Es384 => "ES384",
        }
    }

    /// Parses an algorithm tag.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for unknown tags. This is the only
    /// gate: unsupported tags are rejected before any key material is
    /// consulted.
    pub fn parse(tag: &str) -> TokenResult<Self> {
        match tag {
            "HS256" => Ok(Self::Hs256),
            "RS256" => Ok(Self::Rs256),
            "ES384" => Ok(Self::Es384),
            _ => Err(TokenError::unsupported_algorithm(tag)),
        }
    }

    /// Returns `true` for the HMAC family.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::Hs256)
    }

    /// Returns `true` for the RSA family.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rs256)
    }

    /// Returns `true` for the ECDSA family.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::Es384)
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Header
// ============================================================================

/// The decoded first segment: algorithm tag plus signing key id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// The algorithm that produced the signature segment.
    pub algorithm: SigningAlgorithm,
    /// Identifier of the signing key.
    pub key_id: String,
}

impl TokenHeader {
    /// Creates a new header.
    #[must_use]
    pub fn new(algorithm: SigningAlgorithm, key_id: impl Into<String>) -> Self {
        Self {
            algorithm,
            key_id: key_id.into(),
        }
    }

    /// Encodes the header through the canonical codec.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut set = ClaimSet::new();
        set.insert(HEADER_ALGORITHM, self.algorithm.as_str());
        set.insert(HEADER_KEY_ID, self.key_id.clone());
        codec::encode(&set)
    }

    /// Decodes a header from canonical codec bytes.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for codec or shape errors and
    /// `UnsupportedAlgorithm` for unknown algorithm tags.
    pub fn decode(bytes: &[u8]) -> TokenResult<Self> {
        let set = codec::decode(bytes)?;
        let algorithm = match set.get(HEADER_ALGORITHM) {
            Some(ClaimValue::String(tag)) => SigningAlgorithm::parse(tag)?,
            Some(_) => return Err(TokenError::malformed("header 'alg' must be a string")),
            None => return Err(TokenError::malformed("header missing 'alg'")),
        };
        let key_id = match set.get(HEADER_KEY_ID) {
            Some(ClaimValue::String(kid)) if !kid.is_empty() => kid.clone(),
            Some(ClaimValue::String(_)) => {
                return Err(TokenError::malformed("header 'kid' is empty"));
            }
            Some(_) => return Err(TokenError::malformed("header 'kid' must be a string")),
            None => return Err(TokenError::malformed("header missing 'kid'")),
        };
        Ok(Self { algorithm, key_id })
    }
}

// ============================================================================
// Segments
// ============================================================================

/// Splits a token into its three segments.
///
/// # Errors
///
/// Returns `Malformed` when the segment count is wrong or a segment is
/// empty.
pub fn split_segments(token: &str) -> TokenResult<(&str, &str, &str)> {
    let mut parts = token.split(SEGMENT_SEPARATOR);
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => {
            if header.is_empty() || claims.is_empty() || signature.is_empty() {
                return Err(TokenError::malformed("empty token segment"));
            }
            Ok((header, claims, signature))
        }
        _ => Err(TokenError::malformed("token must have exactly 3 segments")),
    }
}

/// Encodes one segment's raw bytes.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes one segment back to raw bytes.
///
/// # Errors
///
/// Returns `Malformed` when the segment is not URL-safe base64.
pub fn decode_segment(segment: &str) -> TokenResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::malformed("invalid base64 in token segment"))
}

/// Builds the byte string signatures are computed over.
#[must_use]
pub fn signing_input(header_bytes: &[u8], claim_bytes: &[u8]) -> String {
    format!(
        "{}{SEGMENT_SEPARATOR}{}",
        encode_segment(header_bytes),
        encode_segment(claim_bytes)
    )
}

/// Appends the encoded signature to a signing input, yielding the token.
#[must_use]
pub fn compose(signing_input: &str, signature: &[u8]) -> String {
    format!(
        "{signing_input}{SEGMENT_SEPARATOR}{}",
        encode_segment(signature)
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(SigningAlgorithm::Hs256.as_str(), "HS256");
        assert_eq!(SigningAlgorithm::Rs256.as_str(), "RS256");
        assert_eq!(SigningAlgorithm::Es384.as_str(), "ES384");

        assert_eq!(
            SigningAlgorithm::parse("HS256").unwrap(),
            SigningAlgorithm::Hs256
        );
        assert!(matches!(
            SigningAlgorithm::parse("none"),
            Err(TokenError::UnsupportedAlgorithm { .. })
        ));
        // Tags are case-sensitive.
        assert!(SigningAlgorithm::parse("hs256").is_err());
    }

    #[test]
    fn test_algorithm_families() {
        assert!(SigningAlgorithm::Hs256.is_hmac());
        assert!(SigningAlgorithm::Rs256.is_rsa());
        assert!(SigningAlgorithm::Es384.is_ec());
        assert!(!SigningAlgorithm::Hs256.is_rsa());
    }

    #[test]
    fn test_header_round_trip() {
        let header = TokenHeader::new(SigningAlgorithm::Hs256, "key-1");
        let decoded = TokenHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_canonical_bytes() {
        let header = TokenHeader::new(SigningAlgorithm::Rs256, "k1");
        assert_eq!(header.encode(), b"{\"alg\":\"RS256\",\"kid\":\"k1\"}");
    }

    #[test]
    fn test_header_decode_rejects_unknown_algorithm() {
        let err = TokenHeader::decode(b"{\"alg\":\"XX999\",\"kid\":\"k1\"}").unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn test_header_decode_rejects_missing_fields() {
        assert!(matches!(
            TokenHeader::decode(b"{\"alg\":\"HS256\"}").unwrap_err(),
            TokenError::Malformed { .. }
        ));
        assert!(matches!(
            TokenHeader::decode(b"{\"kid\":\"k1\"}").unwrap_err(),
            TokenError::Malformed { .. }
        ));
        assert!(matches!(
            TokenHeader::decode(b"{\"alg\":\"HS256\",\"kid\":\"\"}").unwrap_err(),
            TokenError::Malformed { .. }
        ));
    }

    #[test]
    fn test_split_segments() {
        let (h, c, s) = split_segments("aaa.bbb.ccc").unwrap();
        assert_eq!((h, c, s), ("aaa", "bbb", "ccc"));

        assert!(split_segments("aaa.bbb").is_err());
        assert!(split_segments("aaa.bbb.ccc.ddd").is_err());
        assert!(split_segments("aaa..ccc").is_err());
        assert!(split_segments("").is_err());
    }

    #[test]
    fn test_segment_round_trip() {
        let bytes = b"{\"alg\":\"HS256\",\"kid\":\"k1\"}";
        let segment = encode_segment(bytes);
        assert!(!segment.contains(SEGMENT_SEPARATOR));
        assert_eq!(decode_segment(&segment).unwrap(), bytes);
    }

    #[test]
    fn test_decode_segment_rejects_invalid_base64() {
        assert!(matches!(
            decode_segment("not!base64!").unwrap_err(),
            TokenError::Malformed { .. }
        ));
        // Standard-alphabet padding is not URL-safe no-pad.
        assert!(decode_segment("YWJj=").is_err());
    }

    #[test]
    fn test_compose_and_split() {
        let input = signing_input(b"header", b"claims");
        let token = compose(&input, b"signature");
        let (h, c, s) = split_segments(&token).unwrap();
        assert_eq!(decode_segment(h).unwrap(), b"header");
        assert_eq!(decode_segment(c).unwrap(), b"claims");
        assert_eq!(decode_segment(s).unwrap(), b"signature");
        assert_eq!(&token[..input.len()], input);
    }
}
