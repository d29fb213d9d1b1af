//! REST client for the maintenance backend API.
//!
//! Only the calls the session layer needs live here: the identity check
//! behind every protected page and the backend health probe. Both use
//! bearer authentication with the stored credential where required.

pub mod client;
pub mod error;

pub use client::{ApiClient, HealthStatus};
pub use error::ApiError;
