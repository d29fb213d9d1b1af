//! Application configuration management.
//!
//! The backend base URL comes from the environment (`GLPI_API_BASE_URL`).
//! Local session commands work without it, but anything that reaches the
//! backend gets `ConfigError::MissingBaseUrl` instead of a default. Session
//! settings may also come from `~/.config/glpi-manutencao/config.json`;
//! environment values win.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::auth::{FileTokenStore, KeyringTokenStore, NoopTokenStore, TokenStore, DEFAULT_SKEW_SECS};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "glpi-manutencao";

/// Settings file name
const CONFIG_FILE: &str = "config.json";

pub const BASE_URL_ENV: &str = "GLPI_API_BASE_URL";
pub const SKEW_ENV: &str = "GLPI_TOKEN_SKEW_SECS";
pub const TOKEN_BACKEND_ENV: &str = "GLPI_TOKEN_BACKEND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GLPI_API_BASE_URL is not set - the backend API base URL is required")]
    MissingBaseUrl,

    #[error("Invalid backend base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Unknown token backend {0:?} (expected \"file\" or \"keyring\")")]
    UnknownTokenBackend(String),

    #[error("Failed to read settings: {0}")]
    Settings(#[from] anyhow::Error),
}

/// Where the credential is kept between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    File,
    Keyring,
}

impl FromStr for TokenBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(TokenBackend::File),
            "keyring" => Ok(TokenBackend::Keyring),
            other => Err(ConfigError::UnknownTokenBackend(other.to_string())),
        }
    }
}

/// Optional settings file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub skew_secs: Option<i64>,
    #[serde(default)]
    pub token_backend: Option<TokenBackend>,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::settings_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read settings file")?;
            Ok(serde_json::from_str(&contents).context("Failed to parse settings file")?)
        } else {
            Ok(Self::default())
        }
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    api_base_url: Option<String>,
    pub skew_secs: i64,
    pub token_backend: TokenBackend,
}

impl Config {
    /// Settings file overlaid with the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Settings::load()?;
        Self::resolve(|key| std::env::var(key).ok(), settings)
    }

    /// Process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok(), Settings::default())
    }

    /// Build from an environment lookup and settings, environment first
    pub fn resolve<F>(lookup: F, settings: Settings) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup(BASE_URL_ENV)
            .or(settings.api_base_url)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        if let Some(ref url) = api_base_url {
            if let Err(e) = reqwest::Url::parse(url) {
                return Err(ConfigError::InvalidBaseUrl {
                    url: url.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let skew_secs = match lookup(SKEW_ENV) {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(secs) => secs,
                Err(_) => {
                    warn!(value = %raw, "Invalid {}, using default", SKEW_ENV);
                    DEFAULT_SKEW_SECS
                }
            },
            None => settings.skew_secs.unwrap_or(DEFAULT_SKEW_SECS),
        }
        .max(0);

        let token_backend = match lookup(TOKEN_BACKEND_ENV) {
            Some(raw) => raw.parse()?,
            None => settings.token_backend.unwrap_or_default(),
        };

        Ok(Self {
            api_base_url,
            skew_secs,
            token_backend,
        })
    }

    /// Backend base URL. Required by every call that reaches the backend.
    pub fn api_base_url(&self) -> Result<&str, ConfigError> {
        self.api_base_url.as_deref().ok_or(ConfigError::MissingBaseUrl)
    }

    pub fn cache_dir() -> anyhow::Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Token store for the configured backend.
    ///
    /// Without a cache directory or a usable keychain there is no persistent
    /// context, and the store degrades to one that never holds a credential.
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        match self.token_backend {
            TokenBackend::Keyring => match KeyringTokenStore::new() {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, "Keychain unavailable, session will not be kept");
                    Arc::new(NoopTokenStore)
                }
            },
            TokenBackend::File => match Self::cache_dir() {
                Ok(dir) => Arc::new(FileTokenStore::new(dir)),
                Err(e) => {
                    warn!(error = %e, "No persistent storage, session will not be kept");
                    Arc::new(NoopTokenStore)
                }
            },
        }
    }
}
