//! Authentication module for the bearer credential and its session.
//!
//! This module provides:
//! - `TokenStore`: the single-slot credential store and its backends
//! - `Claims`: unverified decoding of the credential payload and expiry checks
//! - `SessionProfile`: the identity returned by the backend after verification
//!
//! The credential's signature is never checked here; the backend does that.

pub mod claims;
pub mod profile;
pub mod store;

pub use claims::{
    decode_claims, decode_stored, encode_claims, is_expired, is_expired_at, Claims, DEFAULT_SKEW_SECS,
};
pub use profile::SessionProfile;
pub use store::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, NoopTokenStore, TokenStore, TOKEN_KEY,
};
