//! # track-resolver
//!
//! Resolve tracks (title, artist and optional year/key/BPM/mix) against a
//! catalog's search and detail pages. Each track gets an ordered list of
//! search queries; candidates from the result pages are fetched, parsed and
//! fuzzy-scored, and the loop stops early once a confident match is found.
//!
//! Fetches go through a shared response cache with retry-with-backoff, and a
//! [`PerformanceCollector`] can record per-query timings so that a
//! [`ConcurrencyAdvisor`] can later recommend sequential or bounded-concurrent
//! execution.

pub mod advisor;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod headers;
pub mod metrics;
pub mod parsing;
pub mod query;
pub mod resolver;
pub mod retry;
pub mod scoring;
pub mod types;

pub use advisor::{AdvisorThresholds, ConcurrencyAdvisor, ConcurrencyReport, Recommendation};
pub use cache::{CacheEntry, EvictionPolicy, MaxEntries, ResponseCache, Unbounded};
pub use cancel::CancellationState;
pub use config::{ExecutionModel, ResolverConfig};
pub use error::ResolverError;
pub use events::{FetchEvent, FetchEventReceiver};
pub use fetch::{FetchOutcome, HttpFetchClient, PageSource};
pub use metrics::{PerformanceCollector, PerformanceStats, QueryMetrics, TrackId, TrackMetrics};
pub use parsing::CatalogParser;
pub use query::QueryGenerator;
pub use resolver::TrackResolver;
pub use retry::RetryConfig;
pub use scoring::{CandidateScorer, MusicalKey, ScoreBreakdown};
pub use types::{
    CandidateRecord, QueryAuditEntry, QueryKind, ResolveState, ScoredCandidate, SearchQuery,
    TrackMatchResult, TrackQuery,
};

#[cfg(feature = "mock")]
pub use fetch::MockPageSource;

pub type Result<T> = std::result::Result<T, ResolverError>;
