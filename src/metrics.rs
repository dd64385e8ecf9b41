//! Session-scoped performance instrumentation.
//!
//! A [`PerformanceCollector`] is shared by every resolver of a processing run.
//! Between [`PerformanceCollector::start_session`] and
//! [`PerformanceCollector::end_session`] it accepts track and query metrics;
//! `end_session` freezes everything into a [`PerformanceStats`] snapshot that
//! can be exported as JSON and later fed to the
//! [`ConcurrencyAdvisor`](crate::ConcurrencyAdvisor).
//!
//! Recording is append-only. Every `record_*` call takes the collector lock
//! once, so concurrent resolvers never interleave a partial update.

use crate::types::{QueryKind, TrackMatchResult};
use crate::{ResolverError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Handle for a track whose metrics are being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metrics for one executed query. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_index: usize,
    pub query_text: String,
    pub query_kind: QueryKind,
    /// Wall-clock time for the whole query, fetches and scoring included
    pub execution_time: f64,
    /// Time spent waiting on the network, summed over the query's fetches
    pub network_time: f64,
    pub parse_time: f64,
    pub candidates_found: usize,
    /// Whether the search page itself came from the cache
    pub cache_hit: bool,
    /// Cache hits over all fetches made by this query
    pub cache_hits: u64,
    /// Cache misses over all fetches made by this query
    pub cache_misses: u64,
    pub timestamp: DateTime<Utc>,
}

impl QueryMetrics {
    pub fn new(query_index: usize, query_text: impl Into<String>, query_kind: QueryKind) -> Self {
        Self {
            query_index,
            query_text: query_text.into(),
            query_kind,
            execution_time: 0.0,
            network_time: 0.0,
            parse_time: 0.0,
            candidates_found: 0,
            cache_hit: false,
            cache_hits: 0,
            cache_misses: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a track, as reported at completion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackCompletion {
    pub match_found: bool,
    pub match_score: Option<f64>,
    pub early_exit: bool,
    pub early_exit_query_index: Option<usize>,
}

impl From<&TrackMatchResult> for TrackCompletion {
    fn from(result: &TrackMatchResult) -> Self {
        Self {
            match_found: result.is_matched(),
            match_score: result.best_score(),
            early_exit: result.early_exit,
            early_exit_query_index: if result.early_exit {
                result.last_query_index
            } else {
                None
            },
        }
    }
}

/// Metrics for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    pub track_id: TrackId,
    pub title: String,
    pub artist: String,
    pub started_at: DateTime<Utc>,
    /// `None` when the session ended before the track completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds from start to completion
    pub total_time: f64,
    pub queries: Vec<QueryMetrics>,
    pub total_queries: usize,
    pub total_candidates: usize,
    pub match_found: bool,
    pub match_score: Option<f64>,
    pub early_exit: bool,
    pub early_exit_query_index: Option<usize>,
}

impl TrackMetrics {
    /// Network seconds summed over the track's queries.
    pub fn network_time(&self) -> f64 {
        self.queries.iter().map(|q| q.network_time).sum()
    }
}

/// Per query-kind aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryKindSummary {
    pub queries: usize,
    pub candidates: usize,
    pub execution_time: f64,
}

impl QueryKindSummary {
    pub fn average_time(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.execution_time / self.queries as f64
        }
    }
}

/// Frozen statistics of a processing session.
///
/// Field names are the export format read back by [`PerformanceStats::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub session_start: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub total_tracks: usize,
    pub matched_tracks: usize,
    pub total_queries: usize,
    pub total_candidates: usize,
    /// Seconds, summed over tracks
    pub total_execution_time: f64,
    /// Seconds, summed over queries
    pub total_network_time: f64,
    pub total_parse_time: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    #[serde(default)]
    pub tracks: Vec<TrackMetrics>,
    /// Every query of the session in recording order
    #[serde(default)]
    pub queries: Vec<QueryMetrics>,
}

impl PerformanceStats {
    /// An empty snapshot starting at `session_start`.
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            session_start,
            session_end: None,
            total_tracks: 0,
            matched_tracks: 0,
            total_queries: 0,
            total_candidates: 0,
            total_execution_time: 0.0,
            total_network_time: 0.0,
            total_parse_time: 0.0,
            cache_hits: 0,
            cache_misses: 0,
            tracks: Vec::new(),
            queries: Vec::new(),
        }
    }

    /// Cache hits as a percentage of all lookups, 0 when nothing was fetched.
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64 * 100.0
        }
    }

    /// Network time as a percentage of execution time.
    pub fn network_time_percentage(&self) -> f64 {
        if self.total_execution_time <= 0.0 {
            0.0
        } else {
            self.total_network_time / self.total_execution_time * 100.0
        }
    }

    /// Matched tracks as a percentage of all tracks.
    pub fn match_rate(&self) -> f64 {
        if self.total_tracks == 0 {
            0.0
        } else {
            self.matched_tracks as f64 / self.total_tracks as f64 * 100.0
        }
    }

    pub fn average_time_per_track(&self) -> f64 {
        if self.total_tracks == 0 {
            0.0
        } else {
            self.total_execution_time / self.total_tracks as f64
        }
    }

    pub fn query_kind_breakdown(&self) -> BTreeMap<QueryKind, QueryKindSummary> {
        let mut breakdown: BTreeMap<QueryKind, QueryKindSummary> = BTreeMap::new();
        for query in &self.queries {
            let summary = breakdown.entry(query.query_kind).or_default();
            summary.queries += 1;
            summary.candidates += query.candidates_found;
            summary.execution_time += query.execution_time;
        }
        breakdown
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the snapshot as JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        log::debug!("Performance stats saved to: {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stats = Self::from_json(&fs::read_to_string(path)?)?;
        log::debug!("Performance stats loaded from: {}", path.display());
        Ok(stats)
    }
}

#[derive(Debug)]
struct OpenTrack {
    started: Instant,
    metrics: TrackMetrics,
}

#[derive(Debug)]
struct OpenSession {
    stats: PerformanceStats,
    in_progress: HashMap<TrackId, OpenTrack>,
}

#[derive(Debug, Default)]
struct CollectorState {
    session: Option<OpenSession>,
    next_track_id: u64,
}

/// Collects query and track metrics for one session at a time.
///
/// # Examples
///
/// ```rust
/// use track_resolver::{PerformanceCollector, QueryKind, QueryMetrics};
/// use track_resolver::metrics::TrackCompletion;
///
/// let collector = PerformanceCollector::new();
/// collector.start_session()?;
///
/// let id = collector.record_track_start("Strobe", "deadmau5")?;
/// collector.record_query(id, QueryMetrics::new(0, "deadmau5 Strobe", QueryKind::Initial))?;
/// collector.record_track_complete(id, TrackCompletion::default())?;
///
/// let stats = collector.end_session()?;
/// assert_eq!(stats.total_tracks, 1);
/// assert_eq!(stats.total_queries, 1);
/// # Ok::<(), track_resolver::ResolverError>(())
/// ```
#[derive(Debug, Default)]
pub struct PerformanceCollector {
    state: Mutex<CollectorState>,
}

impl PerformanceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a session. Fails with [`ResolverError::SessionAlreadyOpen`] when
    /// one is already open.
    pub fn start_session(&self) -> Result<()> {
        let mut state = self.state();
        if state.session.is_some() {
            return Err(ResolverError::SessionAlreadyOpen);
        }
        state.session = Some(OpenSession {
            stats: PerformanceStats::new(Utc::now()),
            in_progress: HashMap::new(),
        });
        log::debug!("Performance session started");
        Ok(())
    }

    pub fn is_session_open(&self) -> bool {
        self.state().session.is_some()
    }

    pub fn record_track_start(&self, title: &str, artist: &str) -> Result<TrackId> {
        let mut state = self.state();
        let id = TrackId(state.next_track_id);
        let session = state.session.as_mut().ok_or(ResolverError::NoOpenSession)?;
        session.in_progress.insert(
            id,
            OpenTrack {
                started: Instant::now(),
                metrics: TrackMetrics {
                    track_id: id,
                    title: title.to_string(),
                    artist: artist.to_string(),
                    started_at: Utc::now(),
                    completed_at: None,
                    total_time: 0.0,
                    queries: Vec::new(),
                    total_queries: 0,
                    total_candidates: 0,
                    match_found: false,
                    match_score: None,
                    early_exit: false,
                    early_exit_query_index: None,
                },
            },
        );
        state.next_track_id += 1;
        Ok(id)
    }

    /// Append a query's metrics to its track and to the session.
    pub fn record_query(&self, track: TrackId, query: QueryMetrics) -> Result<()> {
        let mut state = self.state();
        let session = state.session.as_mut().ok_or(ResolverError::NoOpenSession)?;
        let open = session
            .in_progress
            .get_mut(&track)
            .ok_or(ResolverError::UnknownTrack(track.0))?;

        open.metrics.total_queries += 1;
        open.metrics.total_candidates += query.candidates_found;
        open.metrics.queries.push(query.clone());

        let stats = &mut session.stats;
        stats.total_queries += 1;
        stats.total_candidates += query.candidates_found;
        stats.total_network_time += query.network_time;
        stats.total_parse_time += query.parse_time;
        stats.cache_hits += query.cache_hits;
        stats.cache_misses += query.cache_misses;
        stats.queries.push(query);
        Ok(())
    }

    /// Finalize a track. Its metrics are frozen from here on.
    pub fn record_track_complete(&self, track: TrackId, completion: TrackCompletion) -> Result<()> {
        let mut state = self.state();
        let session = state.session.as_mut().ok_or(ResolverError::NoOpenSession)?;
        let OpenTrack {
            started,
            mut metrics,
        } = session
            .in_progress
            .remove(&track)
            .ok_or(ResolverError::UnknownTrack(track.0))?;

        metrics.completed_at = Some(Utc::now());
        metrics.total_time = started.elapsed().as_secs_f64();
        metrics.match_found = completion.match_found;
        metrics.match_score = completion.match_score;
        metrics.early_exit = completion.early_exit;
        metrics.early_exit_query_index = completion.early_exit_query_index;

        session.stats.finish_track(metrics);
        Ok(())
    }

    /// Close the session and return its frozen statistics.
    ///
    /// Tracks still in progress are included as unmatched, without a
    /// completion time.
    pub fn end_session(&self) -> Result<PerformanceStats> {
        let mut state = self.state();
        let OpenSession {
            mut stats,
            in_progress,
        } = state.session.take().ok_or(ResolverError::NoOpenSession)?;

        if !in_progress.is_empty() {
            log::warn!(
                "Ending performance session with {} track(s) still in progress",
                in_progress.len()
            );
        }
        let mut unfinished: Vec<OpenTrack> = in_progress.into_values().collect();
        unfinished.sort_by_key(|open| open.metrics.track_id);
        for mut open in unfinished {
            open.metrics.total_time = open.started.elapsed().as_secs_f64();
            stats.finish_track(open.metrics);
        }

        stats.session_end = Some(Utc::now());
        log::info!(
            "Performance session ended: {} tracks, {} queries, {:.1}% network time, {:.1}% cache hits",
            stats.total_tracks,
            stats.total_queries,
            stats.network_time_percentage(),
            stats.cache_hit_rate()
        );
        Ok(stats)
    }
}

impl PerformanceStats {
    fn finish_track(&mut self, metrics: TrackMetrics) {
        self.total_tracks += 1;
        if metrics.match_found {
            self.matched_tracks += 1;
        }
        self.total_execution_time += metrics.total_time;
        self.tracks.push(metrics);
    }
}

/// Seconds as `f64`, the unit used by exported metrics.
pub(crate) fn secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
