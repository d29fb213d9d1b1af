//! API client for the maintenance backend.
//!
//! This module provides the `ApiClient` struct used to verify the stored
//! credential against the backend and to probe backend health.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::SessionProfile;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Identity endpoint, relative to the backend base URL
const AUTH_ME_PATH: &str = "/api/auth/me";

/// Health endpoint, relative to the backend base URL
const HEALTH_PATH: &str = "/api/health";

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Response of the backend health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// API client for the maintenance backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    /// Verify `token` with the backend and return the identity behind it.
    ///
    /// Issues exactly one request; never retries.
    pub async fn fetch_me(&self, token: &str) -> Result<SessionProfile, ApiError> {
        let url = self.url(AUTH_ME_PATH);
        debug!(url = %url, "Verifying session");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "identity response").await
    }

    /// Probe the backend health endpoint (no authentication)
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let url = self.url(HEALTH_PATH);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "health response").await
    }
}
