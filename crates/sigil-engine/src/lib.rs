//! # sigil-engine
//!
//! Key management, signing, session storage, and the token engine.
//!
//! The engine issues three-segment tokens over the canonical claim codec
//! from `sigil-core`, validates them through a fixed pipeline with typed
//! failures, and tracks every issued token in a pluggable
//! [`SessionStore`] so revocation is a store update, not a key change.
//!
//! ## Modules
//!
//! - [`keys`] - Signing keys, validity windows, atomic rotation
//! - [`store`] - Session records, the store contract, in-memory store
//! - [`engine`] - Issuance, validation, revocation
//! - [`config`] - Startup configuration
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sigil_engine::{IssueRequest, KeyManager, MemorySessionStore, SigningKey, TokenEngine};
//!
//! # async fn run() -> sigil_engine::TokenResult<()> {
//! let keys = Arc::new(KeyManager::with_active(SigningKey::hmac("k1", *b"secret")));
//! let engine = TokenEngine::new(keys, Arc::new(MemorySessionStore::new()));
//!
//! let issued = engine.issue(IssueRequest::new("alice")).await?;
//! let claims = engine.validate(&issued.token).await?;
//! assert_eq!(claims.subject()?, "alice");
//!
//! engine.revoke(&issued.token_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod keys;
mod sign;
pub mod store;

pub use config::{ConfigError, EngineConfig, KeyConfig};
pub use engine::{IssueRequest, IssuedToken, TokenEngine};
pub use keys::{KeyManager, SigningKey};
pub use store::{MemorySessionStore, SessionRecord, SessionStore};

pub use sigil_core::{ClaimSet, ClaimValue, SigningAlgorithm, TokenError, TokenResult};
