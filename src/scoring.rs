//! Weighted fuzzy scoring of catalog candidates against a track.
//!
//! ## Scoring Formula
//! ```text
//! base  = (title_sim × 50 + artist_sim × 30) / 80 × 100     (title_sim × 100 in title-only mode)
//! total = clamp(base + min(bonuses, 10) − penalties, 0, 100)
//! ```
//!
//! Bonuses (year, key, BPM) can reorder candidates but never lift a candidate
//! whose base score is below the high-confidence line across it.

use crate::config::DEFAULT_EARLY_EXIT_THRESHOLD;
use crate::query::QueryGenerator;
use crate::types::{CandidateRecord, TrackQuery};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TITLE_WEIGHT: f64 = 50.0;
pub const ARTIST_WEIGHT: f64 = 30.0;

pub const YEAR_BONUS: f64 = 3.0;
pub const KEY_BONUS: f64 = 4.0;
pub const BPM_BONUS: f64 = 3.0;
pub const MAX_BONUS: f64 = 10.0;
/// BPM values within this distance count as equal.
pub const BPM_TOLERANCE: f64 = 1.0;

/// Applied when the track names a mix the candidate does not carry.
pub const MIX_MISMATCH_PENALTY: f64 = 15.0;
/// Mix descriptors at least this similar are treated as the same mix.
const MIX_SIMILARITY_FLOOR: f64 = 0.8;

/// How each component contributed to a score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub title_similarity: f64,
    /// `None` in title-only mode
    pub artist_similarity: Option<f64>,
    pub base: f64,
    pub bonus: f64,
    pub penalty: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    /// Create a human-readable summary of the scoring
    pub fn summary(&self) -> String {
        let artist = self
            .artist_similarity
            .map(|a| format!("{:.0}%", a * 100.0))
            .unwrap_or_else(|| "skipped".to_string());
        format!(
            "total:{:.1} [title:{:.0}% artist:{} base:{:.1} +{:.1} -{:.1}]",
            self.total,
            self.title_similarity * 100.0,
            artist,
            self.base,
            self.bonus,
            self.penalty
        )
    }
}

/// Deterministic candidate scorer.
#[derive(Debug, Clone)]
pub struct CandidateScorer {
    cleaner: QueryGenerator,
    non_word: Regex,
    bracket_content: Regex,
    high_confidence: f64,
    force_title_only: bool,
}

impl Default for CandidateScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateScorer {
    pub fn new() -> Self {
        Self {
            cleaner: QueryGenerator::new(),
            non_word: Regex::new(r"[^\p{L}\p{N}]+").unwrap(),
            bracket_content: Regex::new(r"[\(\[]([^\)\]]*)[\)\]]").unwrap(),
            high_confidence: DEFAULT_EARLY_EXIT_THRESHOLD,
            force_title_only: false,
        }
    }

    /// Score below which bonuses cannot carry a candidate past.
    pub fn with_high_confidence(mut self, threshold: f64) -> Self {
        self.high_confidence = threshold;
        self
    }

    /// Ignore artists for every track, as in session-wide title-only mode.
    pub fn with_title_only(mut self, title_only: bool) -> Self {
        self.force_title_only = title_only;
        self
    }

    /// Score `candidate` against `track`, in `[0, 100]`.
    pub fn score(&self, track: &TrackQuery, candidate: &CandidateRecord) -> f64 {
        self.breakdown(track, candidate).total
    }

    pub fn breakdown(&self, track: &TrackQuery, candidate: &CandidateRecord) -> ScoreBreakdown {
        let track_title = self
            .cleaner
            .strip_brackets(&self.cleaner.clean_title(track));
        let candidate_title = self.cleaner.strip_brackets(&candidate.title);
        let title_similarity =
            similarity(&self.normalize(&track_title), &self.normalize(&candidate_title));

        let title_only =
            self.force_title_only || track.title_only || track.artist.trim().is_empty();
        let (artist_similarity, base) = if title_only {
            (None, title_similarity * 100.0)
        } else {
            let artist = self.artist_similarity(&track.artist, &candidate.artists);
            let base = (title_similarity * TITLE_WEIGHT + artist * ARTIST_WEIGHT)
                / (TITLE_WEIGHT + ARTIST_WEIGHT)
                * 100.0;
            (Some(artist), base)
        };

        let bonus = self.bonus(track, candidate).min(MAX_BONUS);
        let penalty = self.mix_penalty(track, candidate);

        let mut total = base + bonus;
        if base < self.high_confidence {
            total = total.min(self.high_confidence - 0.01).max(base);
        }
        total = (total - penalty).clamp(0.0, 100.0);

        ScoreBreakdown {
            title_similarity,
            artist_similarity,
            base,
            bonus,
            penalty,
            total,
        }
    }

    fn bonus(&self, track: &TrackQuery, candidate: &CandidateRecord) -> f64 {
        let mut bonus = 0.0;

        if let (Some(a), Some(b)) = (track.year, candidate.year) {
            if a == b {
                bonus += YEAR_BONUS;
            }
        }

        if let (Some(a), Some(b)) = (track.key.as_deref(), candidate.key.as_deref()) {
            if let (Some(a), Some(b)) = (MusicalKey::parse(a), MusicalKey::parse(b)) {
                if a == b {
                    bonus += KEY_BONUS;
                }
            }
        }

        if let (Some(a), Some(b)) = (track.bpm, candidate.bpm) {
            if (a - b).abs() <= BPM_TOLERANCE {
                bonus += BPM_BONUS;
            }
        }

        bonus
    }

    fn mix_penalty(&self, track: &TrackQuery, candidate: &CandidateRecord) -> f64 {
        let wanted = track
            .mix
            .as_deref()
            .map(|m| self.normalize(m))
            .filter(|m| !m.is_empty())
            .or_else(|| self.bracketed_mix(&self.cleaner.clean_title(track)))
            .filter(|m| !self.cleaner.is_generic_for(m, track));

        let Some(wanted) = wanted else {
            return 0.0;
        };

        let offered = candidate
            .mix
            .as_deref()
            .map(|m| self.normalize(m))
            .filter(|m| !m.is_empty())
            .or_else(|| self.bracketed_mix(&candidate.title));

        match offered {
            Some(offered) if similarity(&wanted, &offered) >= MIX_SIMILARITY_FLOOR => 0.0,
            _ => MIX_MISMATCH_PENALTY,
        }
    }

    /// Normalized content of the first bracketed group, if any.
    fn bracketed_mix(&self, title: &str) -> Option<String> {
        self.bracket_content
            .captures(title)
            .map(|caps| self.normalize(&caps[1]))
            .filter(|m| !m.is_empty())
    }

    /// Mean of the best matches in both directions between the two artist sets.
    fn artist_similarity(&self, track_artist: &str, candidate_artists: &[String]) -> f64 {
        let wanted: Vec<String> = self
            .cleaner
            .split_artists(track_artist)
            .iter()
            .map(|a| self.normalize(a))
            .filter(|a| !a.is_empty())
            .collect();
        let offered: Vec<String> = candidate_artists
            .iter()
            .flat_map(|a| self.cleaner.split_artists(a))
            .map(|a| self.normalize(&a))
            .filter(|a| !a.is_empty())
            .collect();

        if wanted.is_empty() || offered.is_empty() {
            return 0.0;
        }

        let best_mean = |from: &[String], to: &[String]| -> f64 {
            from.iter()
                .map(|a| to.iter().map(|b| similarity(a, b)).fold(0.0, f64::max))
                .sum::<f64>()
                / from.len() as f64
        };

        let pairwise = (best_mean(&wanted, &offered) + best_mean(&offered, &wanted)) / 2.0;
        let joined = similarity(&wanted.join(" "), &offered.join(" "));
        pairwise.max(joined)
    }

    fn normalize(&self, text: &str) -> String {
        self.non_word
            .replace_all(&text.to_lowercase(), " ")
            .trim()
            .to_string()
    }
}

/// Similarity in `[0, 1]`: the better of plain and token-sorted normalized
/// Levenshtein, so word order differences are forgiven.
fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let direct = strsim::normalized_levenshtein(a, b);
    let sorted = strsim::normalized_levenshtein(&sort_tokens(a), &sort_tokens(b));
    direct.max(sorted)
}

fn sort_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// A musical key reduced to pitch class and mode, so that enharmonic
/// spellings and Camelot/Open Key codes compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicalKey {
    /// 0 = C, 1 = C#/Db, ... 11 = B
    pub pitch_class: u8,
    pub minor: bool,
}

impl MusicalKey {
    /// Parse "A minor", "Am", "F#m", "Gb maj", "D♭ Major", "8A" (Camelot) or
    /// "1m" (Open Key).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text
            .trim()
            .to_lowercase()
            .replace('♯', "#")
            .replace('♭', "b");

        if let Some(key) = Self::parse_wheel_code(&text) {
            return Some(key);
        }

        let mut chars = text.chars().peekable();
        let base = match chars.next()? {
            'c' => 0,
            'd' => 2,
            'e' => 4,
            'f' => 5,
            'g' => 7,
            'a' => 9,
            'b' => 11,
            _ => return None,
        };
        let rest: String = chars.collect();
        let rest = rest.trim_start();

        let (shift, rest) = if let Some(r) = rest.strip_prefix("sharp") {
            (1, r)
        } else if let Some(r) = rest.strip_prefix("flat") {
            (-1, r)
        } else if let Some(r) = rest.strip_prefix('#') {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (-1, r)
        } else {
            (0, rest)
        };

        let minor = match rest.trim() {
            "" | "maj" | "major" => false,
            "m" | "min" | "minor" => true,
            _ => return None,
        };

        Some(Self {
            pitch_class: (base + shift + 12) as u8 % 12,
            minor,
        })
    }

    /// Camelot ("8A", "12B") and Open Key ("1m", "6d") codes.
    fn parse_wheel_code(text: &str) -> Option<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let split = compact.find(|c: char| !c.is_ascii_digit())?;
        let (number, letter) = compact.split_at(split);
        let number: u32 = number.parse().ok()?;
        if !(1..=12).contains(&number) {
            return None;
        }

        let (camelot, minor) = match letter {
            "a" => (number, true),
            "b" => (number, false),
            "m" => ((number + 6) % 12 + 1, true),
            "d" => ((number + 6) % 12 + 1, false),
            _ => return None,
        };

        // 8B is C major and 8A is A minor; each step adds a fifth.
        let start = if minor { 8 } else { 11 };
        Some(Self {
            pitch_class: ((start + 7 * (camelot - 1)) % 12) as u8,
            minor,
        })
    }
}
