//! Client configuration from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use roadlink_auth::GuardConfig;
use roadlink_auth::resolver::DEFAULT_ROLE_LOOKUP_TIMEOUT;

pub const BACKEND_URL_ENV: &str = "ROADLINK_BACKEND_URL";
pub const BACKEND_ANON_KEY_ENV: &str = "ROADLINK_BACKEND_ANON_KEY";
pub const ROLE_LOOKUP_TIMEOUT_ENV: &str = "ROADLINK_ROLE_LOOKUP_TIMEOUT_MS";
pub const CREDENTIALS_PATH_ENV: &str = "ROADLINK_CREDENTIALS_PATH";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} is invalid ({value:?}): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("no data directory available; set {CREDENTIALS_PATH_ENV}")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the hosted backend, without a trailing slash.
    pub backend_url: String,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
    pub role_lookup_timeout: Duration,
    /// File holding persisted slots (credential, language).
    pub credentials_path: PathBuf,
    pub guard: GuardConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let backend_url = required(BACKEND_URL_ENV)?;
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: BACKEND_URL_ENV,
                value: backend_url,
                reason: "expected an http(s) URL".to_string(),
            });
        }
        let backend_url = backend_url.trim_end_matches('/').to_string();
        let anon_key = required(BACKEND_ANON_KEY_ENV)?;

        let role_lookup_timeout = match lookup(ROLE_LOOKUP_TIMEOUT_ENV) {
            None => DEFAULT_ROLE_LOOKUP_TIMEOUT,
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    var: ROLE_LOOKUP_TIMEOUT_ENV,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        var: ROLE_LOOKUP_TIMEOUT_ENV,
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
        };

        let credentials_path = match lookup(CREDENTIALS_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => default_credentials_path()?,
        };

        Ok(Self {
            backend_url,
            anon_key,
            role_lookup_timeout,
            credentials_path,
            guard: GuardConfig::default(),
        })
    }
}

/// `<data dir>/roadlink/slots.json`.
pub fn default_credentials_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or(ConfigError::NoDataDir)?;

    let mut path = base;
    path.push("roadlink");
    path.push("slots.json");
    Ok(path)
}
