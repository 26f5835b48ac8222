//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default storage bucket holding uploaded documents.
pub const DEFAULT_BUCKET: &str = "documents";

/// Default per-request timeout against the backend service.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the hosted backend service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Project base URL, e.g. `https://xyz.example.co` (no trailing slash).
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: SecretString,
    /// Storage bucket for documents.
    pub bucket: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("HEXTASK_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("HEXTASK_URL".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "HEXTASK_URL".into(),
                message: format!("expected an http(s) URL, got {url:?}"),
            });
        }

        let anon_key = lookup("HEXTASK_ANON_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("HEXTASK_ANON_KEY".into()))?;

        let bucket = lookup("HEXTASK_BUCKET")
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());

        let timeout_secs = match lookup("HEXTASK_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "HEXTASK_TIMEOUT_SECS".into(),
                message: e.to_string(),
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            url,
            anon_key: SecretString::from(anon_key),
            bucket,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// What a same-column drop does to `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReorderPolicy {
    /// Reordering within a column is visual only; nothing is written.
    #[default]
    Ignore,
    /// Recompute the column's positions from the drop index and persist them.
    Persist,
}

/// Board behaviour settings.
#[derive(Debug, Clone, Default)]
pub struct BoardConfig {
    pub reorder_policy: ReorderPolicy,
}

impl BoardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reorder_policy = match lookup("HEXTASK_REORDER").as_deref().map(str::trim) {
            None | Some("") | Some("ignore") => ReorderPolicy::Ignore,
            Some("persist") => ReorderPolicy::Persist,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "HEXTASK_REORDER".into(),
                    message: format!("expected `ignore` or `persist`, got {other:?}"),
                });
            }
        };
        Ok(Self { reorder_policy })
    }
}
