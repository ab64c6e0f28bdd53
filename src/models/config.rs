//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where the catalog document comes from
    #[serde(default)]
    pub source: SourceConfig,

    /// Popularity metric service settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Persistent store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Grouping and gating behavior
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(env::SOURCE_URL) {
            self.source.url = url;
        }
        if let Some(url) = lookup(env::METRICS_BASE_URL) {
            self.metrics.base_url = url;
        }
        if let Some(token) = lookup(env::METRICS_TOKEN).or_else(|| lookup(env::GITHUB_TOKEN)) {
            self.metrics.token = Some(token);
        }
        if let Some(uri) = lookup(env::STORE_URI) {
            self.store.uri = uri;
        }
        if let Some(flag) = lookup(env::FORCE_WRITE) {
            self.store.force_write = parse_flag(&flag);
        }
        if let Some(value) = lookup(env::MAX_IN_FLIGHT) {
            match value.trim().parse() {
                Ok(n) => self.metrics.max_in_flight = n,
                Err(_) => log::warn!("Ignoring invalid {}={}", env::MAX_IN_FLIGHT, value),
            }
        }
        if let Some(value) = lookup(env::REQUEST_DELAY_MS) {
            match value.trim().parse() {
                Ok(ms) => self.metrics.request_delay_ms = ms,
                Err(_) => log::warn!("Ignoring invalid {}={}", env::REQUEST_DELAY_MS, value),
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(AppError::validation("source.url is empty"));
        }
        if self.metrics.base_url.trim().is_empty() {
            return Err(AppError::validation("metrics.base_url is empty"));
        }
        url::Url::parse(&self.metrics.base_url)
            .map_err(|e| AppError::validation(format!("metrics.base_url is invalid: {e}")))?;
        if self.metrics.user_agent.trim().is_empty() {
            return Err(AppError::validation("metrics.user_agent is empty"));
        }
        if self.metrics.timeout_secs == 0 {
            return Err(AppError::validation("metrics.timeout_secs must be > 0"));
        }
        if self.metrics.max_in_flight == 0 {
            return Err(AppError::validation("metrics.max_in_flight must be > 0"));
        }
        if self.store.uri.trim().is_empty() {
            return Err(AppError::validation("store.uri is empty"));
        }
        if self.store.catalog_db.trim().is_empty() || self.store.state_db.trim().is_empty() {
            return Err(AppError::validation("store database names must not be empty"));
        }
        if self.store.state_collection.trim().is_empty() {
            return Err(AppError::validation("store.state_collection is empty"));
        }
        if self.sync.min_group_entries == 0 {
            return Err(AppError::validation("sync.min_group_entries must be > 0"));
        }
        Ok(())
    }
}

/// Environment variable names recognised by [`Config::apply_env`].
pub mod env {
    pub const SOURCE_URL: &str = "CATALOG_SOURCE_URL";
    pub const METRICS_BASE_URL: &str = "METRICS_BASE_URL";
    pub const METRICS_TOKEN: &str = "METRICS_TOKEN";
    pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
    pub const STORE_URI: &str = "STORE_URI";
    pub const FORCE_WRITE: &str = "FORCE_WRITE";
    pub const MAX_IN_FLIGHT: &str = "MAX_IN_FLIGHT";
    pub const REQUEST_DELAY_MS: &str = "REQUEST_DELAY_MS";
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Catalog document location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the raw markdown catalog
    #[serde(default = "defaults::source_url")]
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: defaults::source_url(),
        }
    }
}

/// Metric service client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Base path the owner/repo segments are appended to
    #[serde(default = "defaults::metrics_base_url")]
    pub base_url: String,

    /// Bearer token for the metric service
    #[serde(default)]
    pub token: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum metric requests in flight within a group
    #[serde(default = "defaults::max_in_flight")]
    pub max_in_flight: usize,

    /// Delay between successive dispatches in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Retries for transient failures (throttling, 5xx, transport)
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base backoff before the first retry, doubled per attempt
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::metrics_base_url(),
            token: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_in_flight: defaults::max_in_flight(),
            request_delay_ms: defaults::request_delay(),
            max_retries: defaults::max_retries(),
            retry_backoff_ms: defaults::retry_backoff(),
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string: `memory://`, `file://<dir>` or `s3://<bucket>/<prefix>`
    #[serde(default = "defaults::store_uri")]
    pub uri: String,

    /// Database holding one partition per catalog group
    #[serde(default = "defaults::catalog_db")]
    pub catalog_db: String,

    /// Database holding the sync state singleton
    #[serde(default = "defaults::state_db")]
    pub state_db: String,

    /// Partition holding the sync state singleton
    #[serde(default = "defaults::state_collection")]
    pub state_collection: String,

    /// Merge even when the document has not grown
    #[serde(default)]
    pub force_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: defaults::store_uri(),
            catalog_db: defaults::catalog_db(),
            state_db: defaults::state_db(),
            state_collection: defaults::state_collection(),
            force_write: false,
        }
    }
}

/// Grouping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Groups with fewer raw entries are treated as noise
    #[serde(default = "defaults::min_group_entries")]
    pub min_group_entries: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_group_entries: defaults::min_group_entries(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn source_url() -> String {
        "https://raw.githubusercontent.com/avelino/awesome-go/main/README.md".into()
    }

    // Metric defaults
    pub fn metrics_base_url() -> String {
        "https://api.github.com/repos".into()
    }
    pub fn user_agent() -> String {
        "catalog-sync/0.1".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_in_flight() -> usize {
        8
    }
    pub fn request_delay() -> u64 {
        100
    }
    pub fn max_retries() -> u32 {
        2
    }
    pub fn retry_backoff() -> u64 {
        500
    }

    // Store defaults
    pub fn store_uri() -> String {
        "file://storage".into()
    }
    pub fn catalog_db() -> String {
        "packagedb".into()
    }
    pub fn state_db() -> String {
        "usersdb".into()
    }
    pub fn state_collection() -> String {
        "pkgcount".into()
    }

    // Sync defaults
    pub fn min_group_entries() -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.metrics.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.metrics.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [metrics]
            request_delay_ms = 0

            [store]
            uri = "memory://"
            "#,
        )
        .unwrap();

        assert_eq!(config.metrics.request_delay_ms, 0);
        assert_eq!(config.metrics.max_in_flight, 8);
        assert_eq!(config.store.uri, "memory://");
        assert_eq!(config.store.catalog_db, "packagedb");
        assert_eq!(config.sync.min_group_entries, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_env_from(lookup_from(&[
            (env::STORE_URI, "memory://"),
            (env::FORCE_WRITE, "1"),
            (env::GITHUB_TOKEN, "ghp_fallback"),
            (env::MAX_IN_FLIGHT, "3"),
            (env::REQUEST_DELAY_MS, "oops"),
        ]));

        assert_eq!(config.store.uri, "memory://");
        assert!(config.store.force_write);
        assert_eq!(config.metrics.token.as_deref(), Some("ghp_fallback"));
        assert_eq!(config.metrics.max_in_flight, 3);
        assert_eq!(config.metrics.request_delay_ms, 100);
    }

    #[test]
    fn metrics_token_wins_over_github_token() {
        let mut config = Config::default();
        config.apply_env_from(lookup_from(&[
            (env::METRICS_TOKEN, "primary"),
            (env::GITHUB_TOKEN, "fallback"),
            (env::FORCE_WRITE, "no"),
        ]));

        assert_eq!(config.metrics.token.as_deref(), Some("primary"));
        assert!(!config.store.force_write);
    }

    #[test]
    fn bundled_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/config.toml");
        let config = Config::load(path).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.store.state_collection, "pkgcount");
        assert_eq!(config.sync.min_group_entries, 3);
    }
}
