//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the service URL, request timeout, where credentials are kept, whether
//! ordinary API calls retry after a token refresh, and the last email used
//! to sign in.
//!
//! Configuration is stored at `~/.config/habitflow/config.json` and can be
//! overridden with `HABITFLOW_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data/cache directory paths
const APP_NAME: &str = "habitflow";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default service endpoint
const DEFAULT_BASE_URL: &str = "http://10.162.84.184:8080";

/// HTTP request timeout in seconds, also bounds the token refresh call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// JSON file in the local data directory
    #[default]
    File,
    /// OS keychain via the `keyring` crate
    Keyring,
}

impl std::str::FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CredentialBackend::File),
            "keyring" => Ok(CredentialBackend::Keyring),
            other => Err(anyhow::anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    pub retry_on_unauthorized: bool,
    pub last_email: Option<String>,
    /// Overrides the platform data directory (credential file location)
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            retry_on_unauthorized: false,
            last_email: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Persist the last email used to sign in, leaving every other saved
    /// setting as it is on disk (environment overrides are not written).
    pub fn remember_email(email: &str) -> Result<()> {
        let path = Self::config_path()?;
        let mut saved = Self::load_from(&path)?;
        saved.last_email = Some(email.to_string());
        saved.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `HABITFLOW_*` overrides. Unparseable values are logged and
    /// ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HABITFLOW_BASE_URL") {
            self.base_url = url;
        }
        if let Some(raw) = lookup("HABITFLOW_REQUEST_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid HABITFLOW_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = lookup("HABITFLOW_CREDENTIAL_BACKEND") {
            match raw.parse() {
                Ok(backend) => self.credential_backend = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid HABITFLOW_CREDENTIAL_BACKEND"),
            }
        }
        if let Some(raw) = lookup("HABITFLOW_RETRY_ON_UNAUTHORIZED") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.retry_on_unauthorized = true,
                "0" | "false" | "no" => self.retry_on_unauthorized = false,
                _ => warn!(value = %raw, "Ignoring invalid HABITFLOW_RETRY_ON_UNAUTHORIZED"),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where the credential file lives
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Where log files go
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
