//! Signature primitives per algorithm family.
//!
//! These operate on prepared key types held by [`crate::keys::SigningKey`]
//! and are pure: safe for unlimited parallel invocation.
//!
//! # Timing
//!
//! The HMAC comparison goes through `Mac::verify_slice`, which compares in
//! constant time. RSA and ECDSA verification are mathematical checks in
//! their respective crates, not byte comparisons, so no comparison of
//! attacker-controlled bytes happens on those paths.

use hmac::{Hmac, Mac};
use p384::ecdsa::{
    Signature as EcSignature, SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey,
};
use rsa::pkcs1v15::{
    Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey,
};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;

use sigil_core::{TokenError, TokenResult};

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn hmac_sign(secret: &[u8], message: &[u8]) -> TokenResult<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| TokenError::crypto(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn hmac_verify(secret: &[u8], message: &[u8], signature: &[u8]) -> TokenResult<()> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| TokenError::crypto(e.to_string()))?;
    mac.update(message);
    mac.verify_slice(signature)
        .map_err(|_| TokenError::InvalidSignature)
}

pub(crate) fn rsa_sign(key: &RsaSigningKey<Sha256>, message: &[u8]) -> TokenResult<Vec<u8>> {
    let signature = key
        .try_sign(message)
        .map_err(|e| TokenError::crypto(e.to_string()))?;
    Ok(signature.to_vec())
}

pub(crate) fn rsa_verify(
    key: &RsaVerifyingKey<Sha256>,
    message: &[u8],
    signature: &[u8],
) -> TokenResult<()> {
    let signature = RsaSignature::try_from(signature).map_err(|_| TokenError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| TokenError::InvalidSignature)
}

pub(crate) fn ec_sign(key: &EcSigningKey, message: &[u8]) -> TokenResult<Vec<u8>> {
    let signature: EcSignature = key
        .try_sign(message)
        .map_err(|e| TokenError::crypto(e.to_string()))?;
    Ok(signature.to_vec())
}

pub(crate) fn ec_verify(
    key: &EcVerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> TokenResult<()> {
    let signature = EcSignature::from_slice(signature).map_err(|_| TokenError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| TokenError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sign_verify() {
        let secret = b"a shared secret";
        let signature = hmac_sign(secret, b"payload").unwrap();
        assert_eq!(signature.len(), 32);
        hmac_verify(secret, b"payload", &signature).unwrap();
    }

    #[test]
    fn test_hmac_verify_rejects_wrong_secret() {
        let signature = hmac_sign(b"secret-a", b"payload").unwrap();
        assert!(matches!(
            hmac_verify(b"secret-b", b"payload", &signature),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_hmac_verify_rejects_tampered_message() {
        let signature = hmac_sign(b"secret", b"payload").unwrap();
        assert!(matches!(
            hmac_verify(b"secret", b"payloaX", &signature),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_hmac_signing_is_deterministic() {
        let a = hmac_sign(b"secret", b"payload").unwrap();
        let b = hmac_sign(b"secret", b"payload").unwrap();
        assert_eq!(a, b);
    }
}
