//! Cached, retrying HTTP GET client for catalog pages.

use crate::cache::{cache_key, ResponseCache};
use crate::cancel::CancellationState;
use crate::config::ResolverConfig;
use crate::events::{
    create_fetch_event_channel, FetchEventEmitter, FetchEventReceiver, FetchEventSender,
};
use crate::headers;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{ResolverError, Result};
use async_trait::async_trait;
use http_client::{HttpClient, Request};
use http_types::{Method, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_REDIRECTS: u32 = 5;

/// Outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub body: String,
    /// Wall-clock time spent on the network, zero for cache hits
    pub network_time: Duration,
    pub cache_hit: bool,
    /// Network attempts made, zero for cache hits
    pub attempts: u32,
}

impl FetchOutcome {
    fn from_cache(body: String) -> Self {
        Self {
            body,
            network_time: Duration::ZERO,
            cache_hit: true,
            attempts: 0,
        }
    }
}

/// Source of catalog pages.
///
/// The resolver talks to the catalog only through this trait, so tests can
/// substitute fixtures. When the `mock` feature is enabled a `MockPageSource`
/// is generated with `mockall`.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the body behind `url`, consulting and filling the cache.
    async fn fetch_page(&self, url: &str) -> Result<FetchOutcome>;
}

/// HTTP GET client with timeout, retry-with-backoff and response caching.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use track_resolver::{HttpFetchClient, ResponseCache};
///
/// # tokio_test::block_on(async {
/// let http_client = http_client::native::NativeClient::new();
/// let fetcher = HttpFetchClient::new(Box::new(http_client), Arc::new(ResponseCache::new()));
///
/// let first = fetcher.fetch("https://www.beatport.com/search/tracks?q=strobe", Duration::from_secs(10), 3).await?;
/// let second = fetcher.fetch("https://www.beatport.com/search/tracks?q=strobe", Duration::from_secs(10), 3).await?;
/// assert!(!first.cache_hit);
/// assert!(second.cache_hit);
/// # Ok::<(), track_resolver::ResolverError>(())
/// # });
/// ```
#[derive(Clone)]
pub struct HttpFetchClient {
    client: Arc<dyn HttpClient>,
    cache: Arc<ResponseCache>,
    timeout: Duration,
    retry: RetryConfig,
    cancel: Option<CancellationState>,
    events: Option<FetchEventSender>,
}

impl std::fmt::Debug for HttpFetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetchClient")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl HttpFetchClient {
    /// Create a client with default timeout and retry settings.
    pub fn new(client: Box<dyn HttpClient>, cache: Arc<ResponseCache>) -> Self {
        Self::from_config(client, cache, &ResolverConfig::default())
    }

    /// Create a client using the timeout and retry settings of `config`.
    pub fn from_config(
        client: Box<dyn HttpClient>,
        cache: Arc<ResponseCache>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            client: Arc::from(client),
            cache,
            timeout: config.request_timeout(),
            retry: RetryConfig {
                max_attempts: config.retry_attempts.max(1),
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
                jitter: true,
            },
            cancel: None,
            events: None,
        }
    }

    /// Abort backoff sleeps when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationState) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Subscribe to retry events. The channel is created on first use and
    /// shared by clones made afterwards.
    pub fn subscribe(&mut self) -> FetchEventReceiver {
        match &self.events {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = create_fetch_event_channel();
                self.events = Some(sender);
                receiver
            }
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Fetch with the client's configured timeout and attempt count.
    pub async fn get(&self, url: &str) -> Result<FetchOutcome> {
        self.fetch(url, self.timeout, self.retry.max_attempts).await
    }

    /// Fetch `url`, serving from the cache when possible.
    ///
    /// Concurrent calls for the same URL share one network request: the
    /// second caller waits for the first and then reads the cached body
    /// (reported as a cache hit). At most `max_attempts` network attempts are
    /// made before the last failure is returned.
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<FetchOutcome> {
        if max_attempts == 0 {
            return Err(ResolverError::Config(
                "fetch needs at least one attempt".to_string(),
            ));
        }
        let key = cache_key(url);

        if let Some(entry) = self.cache.get(&key) {
            log::trace!("Cache hit for {url}");
            return Ok(FetchOutcome::from_cache(entry.body));
        }

        let _in_flight = self.cache.lock_key(&key).await;
        if let Some(entry) = self.cache.peek(&key) {
            log::trace!("Reusing in-flight result for {url}");
            return Ok(FetchOutcome::from_cache(entry.body));
        }

        let retry = RetryConfig {
            max_attempts,
            ..self.retry.clone()
        };
        let started = Instant::now();
        let cancel_rx = self.cancel.as_ref().map(CancellationState::subscribe);
        let events = self.events.clone();

        let result = retry_with_backoff(
            &retry,
            "fetch",
            cancel_rx,
            || self.get_once(url, timeout),
            |attempt, delay, err| {
                events.emit_retry_scheduled(
                    url,
                    attempt,
                    retry.max_attempts,
                    delay.as_millis() as u64,
                    &err.to_string(),
                );
            },
        )
        .await;

        match result {
            Ok(retry_result) => {
                let network_time = started.elapsed();
                let entry = self.cache.insert(&key, retry_result.result);
                log::debug!(
                    "Fetched {url} in {}ms ({} attempt(s))",
                    network_time.as_millis(),
                    retry_result.attempts_made
                );
                Ok(FetchOutcome {
                    body: entry.body,
                    network_time,
                    cache_hit: false,
                    attempts: retry_result.attempts_made,
                })
            }
            Err(err) => {
                if err.is_retryable() {
                    events.emit_retries_exhausted(url, retry.max_attempts, &err.to_string());
                }
                Err(err)
            }
        }
    }

    /// One network attempt, bounded by `timeout`, following redirects.
    async fn get_once(&self, url: &str, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.get_with_redirects(url)).await {
            Ok(result) => result,
            Err(_) => Err(ResolverError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn get_with_redirects(&self, url: &str) -> Result<String> {
        let mut current =
            Url::parse(url).map_err(|e| ResolverError::InvalidUrl(format!("{url}: {e}")))?;
        let mut referer: Option<String> = None;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = Request::new(Method::Get, current.clone());
            headers::add_get_headers(&mut request, referer.as_deref());

            let mut response = self
                .client
                .send(request)
                .await
                .map_err(|e| ResolverError::Transport(e.to_string()))?;

            let status: u16 = response.status().into();
            if response.status().is_redirection() {
                let location = response
                    .header("location")
                    .and_then(|values| values.get(0))
                    .map(|value| value.as_str().to_string());
                if let Some(location) = location {
                    let next = current.join(&location).map_err(|e| {
                        ResolverError::InvalidUrl(format!("bad redirect '{location}': {e}"))
                    })?;
                    log::debug!("Following redirect from {current} to {next}");
                    referer = Some(current.to_string());
                    current = next;
                    continue;
                }
            }

            if !response.status().is_success() {
                return Err(ResolverError::HttpStatus {
                    code: status,
                    url: current.to_string(),
                });
            }

            return response
                .body_string()
                .await
                .map_err(|e| ResolverError::Transport(e.to_string()));
        }

        Err(ResolverError::Transport(format!("Too many redirects for {url}")))
    }
}

#[async_trait]
impl PageSource for HttpFetchClient {
    async fn fetch_page(&self, url: &str) -> Result<FetchOutcome> {
        self.get(url).await
    }
}
