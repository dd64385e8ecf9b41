//! Search-query generation.
//!
//! [`QueryGenerator`] turns a [`TrackQuery`] into an ordered priority list of
//! [`SearchQuery`]s, most specific first. The resolver consumes the list
//! front-to-back until a confident match is found or the list runs out.

use crate::types::{QueryKind, SearchQuery, TrackQuery};
use regex::Regex;
use std::collections::HashSet;

/// Phrases that carry no search value and are stripped from titles.
pub const DEFAULT_GENERIC_PHRASES: &[&str] = &[
    "original mix",
    "original version",
    "album version",
    "original",
];

/// Titles with at least this many words get partial-title queries.
const MIN_WORDS_FOR_PARTIAL: usize = 4;
/// Word count of each partial-title window.
const PARTIAL_WINDOW: usize = 3;
const MAX_PARTIAL_QUERIES: usize = 3;

/// Builds search-query priority lists for tracks.
#[derive(Debug, Clone)]
pub struct QueryGenerator {
    generic_phrases: Vec<String>,
    bracketed: Regex,
    dash_suffix: Regex,
    artist_separators: Regex,
    whitespace: Regex,
}

impl Default for QueryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryGenerator {
    pub fn new() -> Self {
        Self::with_generic_phrases(DEFAULT_GENERIC_PHRASES.iter().map(|p| p.to_string()))
    }

    pub fn with_generic_phrases<I>(phrases: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            generic_phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
            bracketed: Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").unwrap(),
            dash_suffix: Regex::new(r"\s+-\s+([^-]+)$").unwrap(),
            artist_separators: Regex::new(
                r"(?i)\s*(?:,|&|\band\b|\bfeat\.?|\bft\.?|\bfeaturing\b|\bvs\.?|\bx\b)\s*",
            )
            .unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Generate the ordered, de-duplicated query list for a track.
    ///
    /// `force_title_only` is the session-wide title-only switch; the track's own
    /// flag is honoured as well. Returns an empty list when the track has no
    /// usable title.
    pub fn generate(&self, track: &TrackQuery, force_title_only: bool) -> Vec<SearchQuery> {
        let title_only = force_title_only || track.title_only;
        let cleaned = self.clean_title(track);
        if cleaned.is_empty() {
            log::debug!("No usable title for track '{}'", track.label());
            return Vec::new();
        }

        let bare = self.strip_brackets(&cleaned);
        let artist = self.collapse(&track.artist);
        let mut candidates: Vec<(String, QueryKind)> = Vec::new();

        if title_only || artist.is_empty() {
            candidates.push((cleaned.clone(), QueryKind::Initial));
            candidates.push((bare.clone(), QueryKind::TitleOnly));
        } else {
            candidates.push((format!("{artist} {cleaned}"), QueryKind::Initial));

            // A title that is only a bracket group leaves nothing to pair
            // with the artist.
            if !bare.is_empty() {
                candidates.push((format!("{artist} {bare}"), QueryKind::Fallback));

                let artists = self.split_artists(&artist);
                if artists.len() > 1 {
                    candidates.push((format!("{} {bare}", artists[0]), QueryKind::Fallback));
                }
            }

            candidates.push((bare.clone(), QueryKind::TitleOnly));
        }

        for partial in self.partial_titles(&bare) {
            candidates.push((partial, QueryKind::Fallback));
        }

        let mut seen = HashSet::new();
        let mut queries = Vec::new();
        for (text, kind) in candidates {
            let text = self.collapse(&text);
            if text.is_empty() || !seen.insert(text.to_lowercase()) {
                continue;
            }
            queries.push(SearchQuery {
                index: queries.len(),
                text,
                kind,
            });
        }

        log::debug!(
            "Generated {} queries for '{}': {:?}",
            queries.len(),
            track.label(),
            queries.iter().map(|q| q.text.as_str()).collect::<Vec<_>>()
        );
        queries
    }

    /// Title with generic phrases removed, whitespace collapsed.
    ///
    /// Bracketed or dash-suffixed groups consisting only of a generic phrase
    /// are dropped entirely; meaningful groups such as "(Extended Mix)" stay.
    pub fn clean_title(&self, track: &TrackQuery) -> String {
        let extra = track_phrases(track);
        let is_generic = |group: &str| {
            let group = normalize_phrase(group);
            self.generic_phrases.contains(&group) || extra.contains(&group)
        };

        let mut title = self
            .bracketed
            .replace_all(&track.title, |caps: &regex::Captures| {
                let group = &caps[0];
                if is_generic(group) {
                    String::new()
                } else {
                    group.to_string()
                }
            })
            .into_owned();

        if let Some(caps) = self.dash_suffix.captures(&title) {
            if is_generic(&caps[1]) {
                let end = caps.get(0).map(|m| m.start()).unwrap_or(title.len());
                title.truncate(end);
            }
        }

        // Free-standing phrases supplied with the track.
        for phrase in &extra {
            if let Ok(re) = Regex::new(&phrase_pattern(phrase)) {
                title = re.replace_all(&title, "").into_owned();
            }
        }

        self.collapse(&title)
    }

    /// Whether `text` is one of the generator's generic phrases.
    ///
    /// Surrounding brackets are ignored, so "(Original Mix)" counts.
    pub fn is_generic_phrase(&self, text: &str) -> bool {
        self.generic_phrases.contains(&normalize_phrase(text))
    }

    /// Like [`is_generic_phrase`](Self::is_generic_phrase), also accepting
    /// the phrases supplied with `track`.
    pub fn is_generic_for(&self, text: &str, track: &TrackQuery) -> bool {
        let text = normalize_phrase(text);
        self.generic_phrases.contains(&text) || track_phrases(track).contains(&text)
    }

    /// Title without any parenthetical or bracketed content.
    pub fn strip_brackets(&self, title: &str) -> String {
        self.collapse(&self.bracketed.replace_all(title, ""))
    }

    /// Split an artist string into individual artist names.
    pub fn split_artists(&self, artist: &str) -> Vec<String> {
        self.artist_separators
            .split(artist)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }

    fn partial_titles(&self, bare: &str) -> Vec<String> {
        let words: Vec<&str> = bare.split_whitespace().collect();
        if words.len() < MIN_WORDS_FOR_PARTIAL {
            return Vec::new();
        }
        words
            .windows(PARTIAL_WINDOW)
            .take(MAX_PARTIAL_QUERIES)
            .map(|w| w.join(" "))
            .collect()
    }

    fn collapse(&self, text: &str) -> String {
        self.whitespace.replace_all(text.trim(), " ").into_owned()
    }
}

/// Lowercased phrase without surrounding brackets.
fn normalize_phrase(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '(' || c == ')' || c == '[' || c == ']')
        .trim()
        .to_lowercase()
}

fn track_phrases(track: &TrackQuery) -> Vec<String> {
    track
        .generic_phrases
        .iter()
        .map(|p| normalize_phrase(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Case-insensitive pattern for a free-standing phrase. Word boundaries are
/// only required next to word characters.
fn phrase_pattern(phrase: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if is_word(phrase.chars().next()) { r"\b" } else { "" };
    let end = if is_word(phrase.chars().last()) { r"\b" } else { "" };
    format!("(?i){start}{}{end}", regex::escape(phrase))
}
