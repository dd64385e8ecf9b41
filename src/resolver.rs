//! The per-track retrieval loop.
//!
//! [`TrackResolver`] drives query generation, fetching, parsing and scoring
//! for one track at a time (or several, via [`TrackResolver::resolve_many`]).
//!
//! Queries always run one after another, so audit entries and query metrics
//! come out in execution order. Under [`ExecutionModel::BoundedConcurrent`] the
//! detail-page fetches of a single query overlap, up to
//! `max_concurrent_requests` at once.
//!
//! [`ExecutionModel::BoundedConcurrent`]: crate::ExecutionModel::BoundedConcurrent

use crate::cache::ResponseCache;
use crate::cancel::CancellationState;
use crate::config::ResolverConfig;
use crate::fetch::{FetchOutcome, HttpFetchClient, PageSource};
use crate::metrics::{secs, PerformanceCollector, QueryMetrics, TrackCompletion, TrackId};
use crate::parsing::CatalogParser;
use crate::query::QueryGenerator;
use crate::scoring::CandidateScorer;
use crate::types::{
    QueryAuditEntry, ResolveState, ScoredCandidate, SearchQuery, TrackMatchResult, TrackQuery,
};
use crate::{ResolverError, Result};
use futures::stream::{self, StreamExt};
use http_client::HttpClient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resolves tracks against the catalog.
///
/// # Examples
///
/// ```rust,no_run
/// use track_resolver::{ResolverConfig, TrackQuery, TrackResolver};
///
/// # tokio_test::block_on(async {
/// let http_client = http_client::native::NativeClient::new();
/// let resolver = TrackResolver::with_http_client(ResolverConfig::default(), Box::new(http_client));
///
/// let result = resolver.resolve(&TrackQuery::new("One More Time", "Daft Punk")).await?;
/// if let Some(best) = &result.best {
///     println!("{} ({:.1})", best.candidate().url, best.score());
/// }
/// # Ok::<(), track_resolver::ResolverError>(())
/// # });
/// ```
#[derive(Clone)]
pub struct TrackResolver {
    config: ResolverConfig,
    source: Arc<dyn PageSource>,
    collector: Option<Arc<PerformanceCollector>>,
    generator: QueryGenerator,
    scorer: CandidateScorer,
    parser: CatalogParser,
    cancel: CancellationState,
}

impl std::fmt::Debug for TrackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackResolver")
            .field("config", &self.config)
            .field("collector", &self.collector.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// What one query produced.
struct QueryOutcome {
    scored: Vec<ScoredCandidate>,
    metrics: QueryMetrics,
    /// Cancellation stopped candidate fetches from being launched
    interrupted: bool,
}

/// Running counters for one query's fetches.
#[derive(Default)]
struct FetchTally {
    network_time: Duration,
    cache_hits: u64,
    cache_misses: u64,
}

impl FetchTally {
    fn record(&mut self, outcome: &Result<FetchOutcome>, elapsed: Duration) {
        match outcome {
            Ok(fetched) if fetched.cache_hit => self.cache_hits += 1,
            Ok(fetched) => {
                self.cache_misses += 1;
                self.network_time += fetched.network_time;
            }
            Err(e) if e.is_network() => {
                self.cache_misses += 1;
                self.network_time += elapsed;
            }
            Err(_) => self.cache_misses += 1,
        }
    }
}

impl TrackResolver {
    /// Create a resolver reading pages from `source`.
    pub fn new(config: ResolverConfig, source: Arc<dyn PageSource>) -> Self {
        Self::with_cancellation(config, source, CancellationState::new())
    }

    fn with_cancellation(
        config: ResolverConfig,
        source: Arc<dyn PageSource>,
        cancel: CancellationState,
    ) -> Self {
        let scorer = CandidateScorer::new()
            .with_high_confidence(config.early_exit_threshold)
            .with_title_only(config.title_only_mode);
        let parser = CatalogParser::new(&config.base_url);
        Self {
            config,
            source,
            collector: None,
            generator: QueryGenerator::new(),
            scorer,
            parser,
            cancel,
        }
    }

    /// Create a resolver fetching over HTTP with a fresh response cache.
    ///
    /// The fetch client shares the resolver's cancellation flag, so backoff
    /// sleeps end as soon as [`CancellationState::cancel`] is called.
    pub fn with_http_client(config: ResolverConfig, client: Box<dyn HttpClient>) -> Self {
        Self::with_shared_cache(config, client, Arc::new(ResponseCache::new()))
    }

    /// Like [`with_http_client`](Self::with_http_client), but fetching
    /// through a caller-owned cache that other resolvers may share.
    pub fn with_shared_cache(
        config: ResolverConfig,
        client: Box<dyn HttpClient>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        let cancel = CancellationState::new();
        let fetcher =
            HttpFetchClient::from_config(client, cache, &config).with_cancellation(cancel.clone());
        Self::with_cancellation(config, Arc::new(fetcher), cancel)
    }

    /// Record track and query metrics into `collector`.
    ///
    /// The collector's session must be opened by the caller.
    pub fn with_collector(mut self, collector: Arc<PerformanceCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Resolver-wide cancellation flag. Clones share state.
    pub fn cancellation(&self) -> CancellationState {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one track.
    ///
    /// Network and parse failures are absorbed: the affected query simply
    /// contributes no candidates. Fails only with
    /// [`ResolverError::NoQueriesGenerated`] when the track has no usable title.
    pub async fn resolve(&self, track: &TrackQuery) -> Result<TrackMatchResult> {
        let queries = self.generator.generate(track, self.config.title_only_mode);
        if queries.is_empty() {
            return Err(ResolverError::NoQueriesGenerated);
        }

        let track_id = self.start_track(track);
        let threshold = self.config.early_exit_threshold;

        let mut best: Option<ScoredCandidate> = None;
        let mut candidates_log: Vec<ScoredCandidate> = Vec::new();
        let mut queries_audit: Vec<QueryAuditEntry> = Vec::new();
        let mut last_query_index = None;
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut state = ResolveState::Exhausted;

        for query in &queries {
            if self.cancel.is_cancelled() {
                log::info!("Cancelled before query {} for '{}'", query.index, track.label());
                state = ResolveState::Cancelled;
                break;
            }

            let outcome = self.run_query(track, query, &mut seen_urls).await;
            let found = outcome.scored.len();
            for scored in outcome.scored {
                if scored.beats(best.as_ref()) {
                    best = Some(scored.clone());
                }
                candidates_log.push(scored);
            }

            queries_audit.push(QueryAuditEntry {
                query_index: query.index,
                query_text: query.text.clone(),
                candidates_found: found,
                cumulative_candidates: candidates_log.len(),
            });
            last_query_index = Some(query.index);
            self.record_query(track_id, outcome.metrics);

            log::debug!(
                "Query {} '{}' found {found} candidate(s); best so far {:?}",
                query.index,
                query.text,
                best.as_ref().map(ScoredCandidate::score)
            );

            if best.as_ref().is_some_and(|b| b.score() >= threshold) {
                log::info!(
                    "Early exit for '{}' at query {} with score {:.1}",
                    track.label(),
                    query.index,
                    best.as_ref().map(ScoredCandidate::score).unwrap_or_default()
                );
                state = ResolveState::EarlyExit;
                break;
            }
            if outcome.interrupted {
                state = ResolveState::Cancelled;
                break;
            }
        }

        let result = TrackMatchResult {
            best,
            candidates_log,
            queries_audit,
            last_query_index,
            early_exit: state == ResolveState::EarlyExit,
            state,
        };
        self.complete_track(track_id, &result);
        Ok(result)
    }

    /// Resolve several tracks, returning results in input order.
    ///
    /// Tracks run one at a time under the sequential model, or up to
    /// `max_concurrent_tracks` at once under the bounded-concurrent model.
    /// A track that cannot be searched ends up unmatched.
    pub async fn resolve_many(&self, tracks: &[TrackQuery]) -> Vec<TrackMatchResult> {
        let pending: Vec<_> = tracks
            .iter()
            .map(|track| async move {
                match self.resolve(track).await {
                    Ok(result) => result,
                    Err(e) => {
                        log::warn!("Track '{}' left unmatched: {e}", track.label());
                        TrackMatchResult::unmatched()
                    }
                }
            })
            .collect();
        stream::iter(pending)
            .buffered(self.config.track_concurrency())
            .collect::<Vec<_>>()
            .await
    }

    async fn run_query(
        &self,
        track: &TrackQuery,
        query: &SearchQuery,
        seen_urls: &mut HashSet<String>,
    ) -> QueryOutcome {
        let started = Instant::now();
        let mut metrics = QueryMetrics::new(query.index, &query.text, query.kind);
        let mut tally = FetchTally::default();
        let mut parse_time = Duration::ZERO;

        let search_url = self.config.search_url(&query.text);
        let fetch_started = Instant::now();
        let search = self.source.fetch_page(&search_url).await;
        tally.record(&search, fetch_started.elapsed());

        let mut result_urls = match search {
            Ok(page) => {
                metrics.cache_hit = page.cache_hit;
                let parse_started = Instant::now();
                let urls = self.parser.parse_search_results(&page.body);
                parse_time += parse_started.elapsed();
                urls
            }
            Err(e) => {
                log_fetch_failure(&format!("Search '{}'", query.text), &e);
                Vec::new()
            }
        };
        result_urls.truncate(self.config.max_results_per_query);
        let detail_urls: Vec<String> = result_urls
            .into_iter()
            .filter(|url| seen_urls.insert(url.clone()))
            .collect();

        let fetched: Vec<Option<(String, Result<FetchOutcome>, Duration)>> =
            stream::iter(detail_urls)
                .map(|url| async move {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    let fetch_started = Instant::now();
                    let outcome = self.source.fetch_page(&url).await;
                    Some((url, outcome, fetch_started.elapsed()))
                })
                .buffered(self.config.request_concurrency())
                .collect()
                .await;

        let mut interrupted = false;
        let mut scored = Vec::new();
        for entry in fetched {
            let Some((url, outcome, elapsed)) = entry else {
                interrupted = true;
                continue;
            };
            tally.record(&outcome, elapsed);
            let page = match outcome {
                Ok(page) => page,
                Err(e) => {
                    log_fetch_failure(&format!("Candidate {url}"), &e);
                    continue;
                }
            };

            let parse_started = Instant::now();
            let record = self.parser.parse_detail_page(&page.body);
            parse_time += parse_started.elapsed();

            let Some(mut record) = record else {
                log::warn!("Skipping candidate {url}: unrecognized detail page");
                continue;
            };
            if record.url.is_empty() {
                record.url = url;
            }
            let score = self.scorer.score(track, &record);
            log::trace!(
                "Scored '{}' by {} at {score:.1}",
                record.title,
                record.artist_string()
            );
            scored.push(ScoredCandidate::new(record, score, query.index));
        }

        if interrupted {
            log::info!("Cancelled during query {} for '{}'", query.index, track.label());
        }

        metrics.candidates_found = scored.len();
        metrics.network_time = secs(tally.network_time);
        metrics.parse_time = secs(parse_time);
        metrics.cache_hits = tally.cache_hits;
        metrics.cache_misses = tally.cache_misses;
        metrics.execution_time = secs(started.elapsed());

        QueryOutcome {
            scored,
            metrics,
            interrupted,
        }
    }

    fn start_track(&self, track: &TrackQuery) -> Option<TrackId> {
        let collector = self.collector.as_ref()?;
        if !collector.is_session_open() {
            log::debug!("No metrics session open; '{}' goes unrecorded", track.label());
            return None;
        }
        match collector.record_track_start(&track.title, &track.artist) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Not recording metrics for '{}': {e}", track.label());
                None
            }
        }
    }

    fn record_query(&self, track_id: Option<TrackId>, metrics: QueryMetrics) {
        if let (Some(collector), Some(id)) = (&self.collector, track_id) {
            if let Err(e) = collector.record_query(id, metrics) {
                log::warn!("Failed to record query metrics: {e}");
            }
        }
    }

    fn complete_track(&self, track_id: Option<TrackId>, result: &TrackMatchResult) {
        if let (Some(collector), Some(id)) = (&self.collector, track_id) {
            if let Err(e) = collector.record_track_complete(id, TrackCompletion::from(result)) {
                log::warn!("Failed to record track completion: {e}");
            }
        }
    }
}

/// Local recovery: the failed fetch contributes no candidates.
fn log_fetch_failure(what: &str, error: &ResolverError) {
    if matches!(error, ResolverError::Cancelled) {
        log::debug!("{what} abandoned: cancelled");
    } else if error.is_recoverable() {
        log::warn!("{what} failed, continuing without it: {error}");
    } else {
        log::error!("{what} failed: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed bodies; unknown URLs fail with a 404.
    #[derive(Default)]
    struct FixturePages {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FixturePages {
        fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FixturePages {
        async fn fetch_page(&self, url: &str) -> Result<FetchOutcome> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(body) => Ok(FetchOutcome {
                    body: body.clone(),
                    network_time: Duration::from_millis(1),
                    cache_hit: false,
                    attempts: 1,
                }),
                None => Err(ResolverError::HttpStatus {
                    code: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            base_url: "https://catalog.test".to_string(),
            ..ResolverConfig::default()
        }
    }

    fn search_url(query: &str) -> String {
        config().search_url(query)
    }

    #[tokio::test]
    async fn test_confident_first_query_exits_early() {
        let pages = FixturePages::default()
            .page(
                &search_url("Daft Punk One More Time"),
                r#"{"tracks": [{"url": "/track/one-more-time/1"}]}"#,
            )
            .page(
                "https://catalog.test/track/one-more-time/1",
                r#"{"title": "One More Time", "artists": ["Daft Punk"]}"#,
            );
        let pages = Arc::new(pages);
        let resolver = TrackResolver::new(config(), pages.clone());

        let result = resolver
            .resolve(&TrackQuery::new("One More Time", "Daft Punk"))
            .await
            .unwrap();

        assert_eq!(result.state, ResolveState::EarlyExit);
        assert!(result.early_exit);
        assert_eq!(result.last_query_index, Some(0));
        assert_eq!(result.queries_audit.len(), 1);
        assert!(result.best_score().unwrap() >= 95.0);
        assert_eq!(
            result.best.as_ref().unwrap().candidate().url,
            "https://catalog.test/track/one-more-time/1"
        );
        assert_eq!(pages.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_no_usable_title_is_an_error() {
        let resolver = TrackResolver::new(config(), Arc::new(FixturePages::default()));
        assert!(matches!(
            resolver.resolve(&TrackQuery::new("", "Daft Punk")).await,
            Err(ResolverError::NoQueriesGenerated)
        ));
    }

    #[tokio::test]
    async fn test_seen_candidates_are_not_refetched() {
        let listing = r#"["/track/strobe/7"]"#;
        let pages = FixturePages::default()
            .page(&search_url("deadmau5 Strobe"), listing)
            .page(&search_url("Strobe"), listing)
            .page(
                "https://catalog.test/track/strobe/7",
                r#"{"title": "Strobe", "artists": ["Someone Else"]}"#,
            );
        let pages = Arc::new(pages);
        let resolver = TrackResolver::new(config(), pages.clone());

        let result = resolver
            .resolve(&TrackQuery::new("Strobe", "deadmau5"))
            .await
            .unwrap();

        assert_eq!(result.state, ResolveState::Exhausted);
        assert_eq!(result.candidates_log.len(), 1);
        assert_eq!(result.queries_audit[1].candidates_found, 0);
        assert_eq!(result.queries_audit[1].cumulative_candidates, 1);
        let detail_fetches = pages
            .requested()
            .iter()
            .filter(|url| url.contains("/track/"))
            .count();
        assert_eq!(detail_fetches, 1);
    }

    #[tokio::test]
    async fn test_results_capped_per_query() {
        let listing = r#"["/track/a/1", "/track/b/2", "/track/c/3"]"#;
        let pages = Arc::new(FixturePages::default().page(&search_url("Opus"), listing));
        let resolver = TrackResolver::new(
            ResolverConfig {
                max_results_per_query: 2,
                title_only_mode: true,
                ..config()
            },
            pages.clone(),
        );

        resolver.resolve(&TrackQuery::new("Opus", "")).await.unwrap();
        let detail_fetches = pages
            .requested()
            .iter()
            .filter(|url| url.contains("/track/"))
            .count();
        assert_eq!(detail_fetches, 2);
    }
}
