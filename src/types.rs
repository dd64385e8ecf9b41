//! Data types for track resolution.
//!
//! This module contains the records that flow through the resolver: the input
//! [`TrackQuery`], the generated [`SearchQuery`] list, parsed
//! [`CandidateRecord`]s, their [`ScoredCandidate`] counterparts and the final
//! [`TrackMatchResult`] with its query audit.

use serde::{Deserialize, Serialize};

// ================================================================================================
// INPUT
// ================================================================================================

/// A normalized track record to resolve against the catalog.
///
/// Produced by whatever parses playlists or libraries; the resolver only ever
/// borrows it.
///
/// # Examples
///
/// ```rust
/// use track_resolver::TrackQuery;
///
/// let track = TrackQuery::new("Strobe", "deadmau5")
///     .with_year(2009)
///     .with_key("E major")
///     .with_mix("Club Edit");
///
/// assert_eq!(track.title, "Strobe");
/// assert_eq!(track.mix.as_deref(), Some("Club Edit"));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackQuery {
    /// The track title as it appears in the source library
    pub title: String,
    /// Full artist string, possibly listing several artists
    #[serde(default)]
    pub artist: String,
    /// Release year, if known
    #[serde(default)]
    pub year: Option<i32>,
    /// Musical key in any common notation ("Am", "A minor", "8A")
    #[serde(default)]
    pub key: Option<String>,
    /// Tempo in beats per minute, if known
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Explicit mix/remix descriptor ("Extended Mix", "Dub")
    #[serde(default)]
    pub mix: Option<String>,
    /// Extra generic phrases to strip from the title before searching
    #[serde(default)]
    pub generic_phrases: Vec<String>,
    /// Search and score on the title alone, ignoring the artist
    #[serde(default)]
    pub title_only: bool,
}

impl TrackQuery {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Self::default()
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_mix(mut self, mix: impl Into<String>) -> Self {
        self.mix = Some(mix.into());
        self
    }

    pub fn with_generic_phrases(mut self, phrases: Vec<String>) -> Self {
        self.generic_phrases = phrases;
        self
    }

    pub fn title_only(mut self, title_only: bool) -> Self {
        self.title_only = title_only;
        self
    }

    /// Human-readable label used in logs.
    pub fn label(&self) -> String {
        if self.artist.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

// ================================================================================================
// QUERIES
// ================================================================================================

/// Classification of a generated query, used for metrics breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// The most specific query for the track
    Initial,
    /// A query built from the title alone
    TitleOnly,
    /// Any broader fallback query
    Fallback,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryKind::Initial => "initial",
            QueryKind::TitleOnly => "title_only",
            QueryKind::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// One entry of the ordered search-query priority list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Position in the priority list (0 = most specific)
    pub index: usize,
    /// The text sent to the catalog search
    pub text: String,
    pub kind: QueryKind,
}

// ================================================================================================
// CANDIDATES
// ================================================================================================

/// Structured data parsed from a catalog detail page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub title: String,
    /// Mix name when the catalog publishes it separately from the title
    #[serde(default)]
    pub mix: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Canonical detail-page URL
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

impl CandidateRecord {
    /// Artists joined the way catalogs usually display them.
    pub fn artist_string(&self) -> String {
        self.artists.join(", ")
    }
}

/// A candidate together with its match score.
///
/// The score is assigned once, when the scored candidate is created, and the
/// fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    candidate: CandidateRecord,
    score: f64,
    query_index: usize,
}

impl ScoredCandidate {
    pub fn new(candidate: CandidateRecord, score: f64, query_index: usize) -> Self {
        Self {
            candidate,
            score,
            query_index,
        }
    }

    pub fn candidate(&self) -> &CandidateRecord {
        &self.candidate
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Index of the query that discovered this candidate
    pub fn query_index(&self) -> usize {
        self.query_index
    }

    /// Whether this candidate should replace `current` as the running best.
    ///
    /// Ties keep the earlier candidate, which was found by a more specific
    /// query (candidates are offered in discovery order).
    pub fn beats(&self, current: Option<&ScoredCandidate>) -> bool {
        match current {
            None => true,
            Some(best) => {
                self.score > best.score
                    || (self.score == best.score && self.query_index < best.query_index)
            }
        }
    }
}

// ================================================================================================
// RESULTS
// ================================================================================================

/// Record of one executed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAuditEntry {
    pub query_index: usize,
    pub query_text: String,
    /// Candidates scored for this query
    pub candidates_found: usize,
    /// Candidates scored for the track so far, including this query
    pub cumulative_candidates: usize,
}

/// How the query loop finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveState {
    /// A candidate reached the early-exit threshold
    EarlyExit,
    /// Every query ran without reaching the threshold
    Exhausted,
    /// The cancellation signal stopped the loop
    Cancelled,
}

/// The externally visible outcome of resolving one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMatchResult {
    /// The best scoring candidate, if any candidate was scored
    pub best: Option<ScoredCandidate>,
    /// Every scored candidate in discovery order
    pub candidates_log: Vec<ScoredCandidate>,
    /// Every executed query in execution order
    pub queries_audit: Vec<QueryAuditEntry>,
    /// Index of the last query that ran
    pub last_query_index: Option<usize>,
    pub early_exit: bool,
    pub state: ResolveState,
}

impl TrackMatchResult {
    /// Result for a track that never ran a query.
    pub fn unmatched() -> Self {
        Self {
            best: None,
            candidates_log: Vec::new(),
            queries_audit: Vec::new(),
            last_query_index: None,
            early_exit: false,
            state: ResolveState::Exhausted,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.best.is_some()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(ScoredCandidate::score)
    }

    /// Serialize result to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
