//! # sigil-core
//!
//! Claim model, canonical codec, and token wire format for the Sigil
//! token engine.
//!
//! This crate is pure: no I/O, no async, no shared state. Everything the
//! signature covers lives here, so determinism and strictness are the
//! design drivers — see [`codec`] for the canonical form.
//!
//! ## Modules
//!
//! - [`claims`] - Claim values, claim sets, and the registered claims
//! - [`codec`] - Canonical encoding/decoding with resource bounds
//! - [`wire`] - Algorithm tags, token header, and the 3-segment format
//! - [`error`] - The token error taxonomy

pub mod claims;
pub mod codec;
pub mod error;
pub mod wire;

pub use claims::{
    CLAIM_EXPIRES_AT, CLAIM_ISSUED_AT, CLAIM_ISSUER, CLAIM_SUBJECT, CLAIM_TOKEN_ID, ClaimSet,
    ClaimSetBuilder, ClaimValue,
};
pub use codec::{CodecError, CodecLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_DEPTH};
pub use error::{TokenError, TokenResult};
pub use wire::{SigningAlgorithm, TokenHeader};
