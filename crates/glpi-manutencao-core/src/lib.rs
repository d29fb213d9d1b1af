//! Session core for the GLPI maintenance frontend.
//!
//! This crate owns the bearer-token lifecycle of the maintenance UI:
//! - `auth`: token storage, claim decoding, local expiry checks
//! - `api`: the identity and health calls against the backend API
//! - `guard`: the per-page session gate (login page / protected page)
//! - `config`: backend base URL and session settings

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;

pub use api::{ApiClient, ApiError, HealthStatus};
pub use auth::{Claims, SessionProfile, TokenStore};
pub use config::{Config, ConfigError, TokenBackend};
pub use guard::{
    CancellationReceiver, CancellationToken, GuardOutcome, GuardState, IdentityVerifier, PageKind,
    Route, SessionGuard,
};
