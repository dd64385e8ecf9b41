//! Resolver configuration.
//!
//! [`ResolverConfig`] is built once (defaults, a JSON file, environment
//! overrides) and then passed by value into the resolver. Nothing mutates it
//! afterwards.

use crate::{ResolverError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Score at or above which the query loop stops early.
pub const DEFAULT_EARLY_EXIT_THRESHOLD: f64 = 95.0;
/// Default bound on concurrently processed tracks.
pub const DEFAULT_MAX_CONCURRENT_TRACKS: usize = 5;
/// Default bound on in-flight detail-page fetches per query.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_RESULTS_PER_QUERY: usize = 10;
pub const DEFAULT_BASE_URL: &str = "https://www.beatport.com";
pub const DEFAULT_SEARCH_PATH: &str = "/search/tracks";

/// Prefix of the environment variables read by [`ResolverConfig::with_env_overrides`].
pub const ENV_PREFIX: &str = "TRACK_RESOLVER_";

/// How fetches are scheduled within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// One query, one fetch at a time.
    #[default]
    Sequential,
    /// Detail fetches of a query run concurrently, and several tracks may be
    /// resolved at once, both bounded by the config limits.
    BoundedConcurrent,
}

/// Immutable settings for a resolver session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Skip artist-bearing queries and artist scoring for every track
    pub title_only_mode: bool,
    pub max_concurrent_tracks: usize,
    pub max_concurrent_requests: usize,
    /// Per-fetch timeout in seconds
    pub request_timeout: f64,
    /// Maximum network attempts per fetch
    pub retry_attempts: u32,
    pub early_exit_threshold: f64,
    pub execution_model: ExecutionModel,
    /// Base delay of the exponential backoff, doubled on each attempt
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Detail pages considered per search query
    pub max_results_per_query: usize,
    /// Catalog origin, e.g. `https://www.beatport.com`
    pub base_url: String,
    /// Path of the search endpoint; the query is sent as `?q=`
    pub search_path: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            title_only_mode: false,
            max_concurrent_tracks: DEFAULT_MAX_CONCURRENT_TRACKS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            early_exit_threshold: DEFAULT_EARLY_EXIT_THRESHOLD,
            execution_model: ExecutionModel::Sequential,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            max_results_per_query: DEFAULT_MAX_RESULTS_PER_QUERY,
            base_url: DEFAULT_BASE_URL.to_string(),
            search_path: DEFAULT_SEARCH_PATH.to_string(),
        }
    }
}

impl ResolverConfig {
    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::debug!("Configuration loaded from: {}", path.display());
        Ok(config)
    }

    /// Apply `TRACK_RESOLVER_*` environment variables on top of this config.
    ///
    /// Recognized: `TITLE_ONLY_MODE`, `MAX_CONCURRENT_TRACKS`,
    /// `MAX_CONCURRENT_REQUESTS`, `REQUEST_TIMEOUT`, `RETRY_ATTEMPTS`,
    /// `EARLY_EXIT_THRESHOLD`, `EXECUTION_MODEL` and `BASE_URL`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
            value.trim().parse::<T>().map_err(|_| {
                ResolverError::Config(format!("{ENV_PREFIX}{name}: cannot parse '{value}'"))
            })
        }

        if let Some(v) = lookup("TITLE_ONLY_MODE") {
            self.title_only_mode = parse("TITLE_ONLY_MODE", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_TRACKS") {
            self.max_concurrent_tracks = parse("MAX_CONCURRENT_TRACKS", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = parse("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout = parse("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("RETRY_ATTEMPTS") {
            self.retry_attempts = parse("RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("EARLY_EXIT_THRESHOLD") {
            self.early_exit_threshold = parse("EARLY_EXIT_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("EXECUTION_MODEL") {
            self.execution_model = match v.trim().to_lowercase().as_str() {
                "sequential" => ExecutionModel::Sequential,
                "concurrent" | "bounded_concurrent" => ExecutionModel::BoundedConcurrent,
                other => {
                    return Err(ResolverError::Config(format!(
                        "{ENV_PREFIX}EXECUTION_MODEL: unknown model '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = lookup("BASE_URL") {
            self.base_url = v.trim().to_string();
        }

        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tracks == 0 || self.max_concurrent_requests == 0 {
            return Err(ResolverError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ResolverError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.early_exit_threshold) {
            return Err(ResolverError::Config(format!(
                "early_exit_threshold must be within 0..=100, got {}",
                self.early_exit_threshold
            )));
        }
        if !(self.request_timeout > 0.0) {
            return Err(ResolverError::Config(
                "request_timeout must be positive".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ResolverError::Config("base_url is empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// In-flight detail fetches allowed per query under the selected model.
    pub fn request_concurrency(&self) -> usize {
        match self.execution_model {
            ExecutionModel::Sequential => 1,
            ExecutionModel::BoundedConcurrent => self.max_concurrent_requests.max(1),
        }
    }

    /// Tracks resolved at once under the selected model.
    pub fn track_concurrency(&self) -> usize {
        match self.execution_model {
            ExecutionModel::Sequential => 1,
            ExecutionModel::BoundedConcurrent => self.max_concurrent_tracks.max(1),
        }
    }

    /// Full search URL for a query text.
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}{}?q={}",
            self.base_url.trim_end_matches('/'),
            self.search_path,
            urlencoding::encode(query)
        )
    }
}
