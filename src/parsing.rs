//! Parsing of catalog search-result and detail pages.
//!
//! Both HTML pages and JSON payloads are understood. All functions are pure:
//! malformed or unrecognized input yields an empty list or `None`, never an
//! error, because the remote layout can change at any time.

use crate::types::CandidateRecord;
use http_types::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;

/// Path fragment identifying detail-page links in search results.
pub const DETAIL_PATH_MARKER: &str = "/track/";

/// Stateless parser for catalog pages.
#[derive(Debug, Clone, Default)]
pub struct CatalogParser {
    base_url: Option<Url>,
}

impl CatalogParser {
    /// Create a parser resolving relative links against `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: Url::parse(base_url).ok(),
        }
    }

    /// Extract detail-page URLs from a search-results body, in page order and
    /// without duplicates.
    pub fn parse_search_results(&self, body: &str) -> Vec<String> {
        let trimmed = body.trim_start();
        let raw: Vec<String> = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => Self::json_result_links(&value),
                Err(e) => {
                    log::debug!("Search results look like JSON but do not parse: {e}");
                    Vec::new()
                }
            }
        } else {
            Self::html_result_links(body)
        };

        let mut seen = HashSet::new();
        let urls: Vec<String> = raw
            .into_iter()
            .filter_map(|href| self.absolutize(&href))
            .filter(|url| seen.insert(url.clone()))
            .collect();

        log::debug!("Parsed {} result links", urls.len());
        urls
    }

    /// Parse a detail page into a candidate record.
    ///
    /// Returns `None` when no title can be found.
    pub fn parse_detail_page(&self, body: &str) -> Option<CandidateRecord> {
        let trimmed = body.trim_start();
        let record = if trimmed.starts_with('{') {
            serde_json::from_str::<Value>(trimmed)
                .ok()
                .map(|value| Self::record_from_json(&value))
        } else {
            Some(self.record_from_html(body))
        }?;

        if record.title.trim().is_empty() {
            log::debug!("Detail page has no recognizable title");
            return None;
        }
        Some(record)
    }

    fn html_result_links(body: &str) -> Vec<String> {
        let document = Html::parse_document(body);
        let link_selector = Selector::parse("a[href]").unwrap();

        document
            .select(&link_selector)
            .filter_map(|link| link.value().attr("href"))
            .filter(|href| href.contains(DETAIL_PATH_MARKER))
            .map(|href| href.to_string())
            .collect()
    }

    fn json_result_links(value: &Value) -> Vec<String> {
        let items = match value {
            Value::Array(items) => Some(items),
            Value::Object(map) => ["tracks", "results", "data"]
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_array)),
            _ => None,
        };

        items
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(url) => Some(url.clone()),
                        Value::Object(obj) => obj
                            .get("url")
                            .or_else(|| obj.get("href"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match Url::parse(href) {
            Ok(url) => Some(url.to_string()),
            Err(_) => match &self.base_url {
                Some(base) => base.join(href).ok().map(|url| url.to_string()),
                None => Some(href.to_string()),
            },
        }
    }

    fn record_from_json(value: &Value) -> CandidateRecord {
        let text = |field: &str| -> Option<String> {
            value
                .get(field)
                .and_then(json_text)
                .filter(|s| !s.is_empty())
        };

        let release_date = text("release_date")
            .or_else(|| text("publish_date"))
            .or_else(|| text("datePublished"));

        CandidateRecord {
            title: text("title").or_else(|| text("name")).unwrap_or_default(),
            mix: text("mix").or_else(|| text("mix_name")),
            artists: json_names(value.get("artists").or_else(|| value.get("byArtist"))),
            url: text("url").unwrap_or_default(),
            key: text("key"),
            bpm: value.get("bpm").and_then(json_number),
            year: value
                .get("year")
                .and_then(json_number)
                .map(|y| y as i32)
                .or_else(|| release_date.as_deref().and_then(year_from_date)),
            label: text("label").or_else(|| text("recordLabel")),
            genres: json_names(value.get("genres").or_else(|| value.get("genre"))),
            release: text("release").or_else(|| text("inAlbum")),
            release_date,
        }
    }

    fn record_from_html(&self, body: &str) -> CandidateRecord {
        let document = Html::parse_document(body);

        let mut record = Self::json_ld_record(&document).unwrap_or_default();

        if record.title.is_empty() {
            record.title = field_text(&document, "title")
                .or_else(|| {
                    let h1 = Selector::parse("h1").unwrap();
                    document.select(&h1).next().map(element_text)
                })
                .unwrap_or_default();
        }
        if record.mix.is_none() {
            record.mix = field_text(&document, "mix");
        }
        if record.artists.is_empty() {
            record.artists = field_texts(&document, "artist");
        }
        if record.url.is_empty() {
            let canonical = Selector::parse("link[rel=\"canonical\"]").unwrap();
            record.url = document
                .select(&canonical)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| self.absolutize(href))
                .unwrap_or_default();
        }
        if record.key.is_none() {
            record.key = field_text(&document, "key");
        }
        if record.bpm.is_none() {
            record.bpm = field_text(&document, "bpm").and_then(|b| leading_number(&b));
        }
        if record.label.is_none() {
            record.label = field_text(&document, "label");
        }
        if record.genres.is_empty() {
            record.genres = field_texts(&document, "genre");
        }
        if record.release.is_none() {
            record.release = field_text(&document, "release");
        }
        if record.release_date.is_none() {
            record.release_date = field_text(&document, "release-date");
        }
        if record.year.is_none() {
            record.year = field_text(&document, "year")
                .and_then(|y| y.trim().parse().ok())
                .or_else(|| record.release_date.as_deref().and_then(year_from_date));
        }

        record
    }

    /// Read a schema.org `MusicRecording` from JSON-LD script tags.
    fn json_ld_record(document: &Html) -> Option<CandidateRecord> {
        let script = Selector::parse("script[type=\"application/ld+json\"]").unwrap();
        document
            .select(&script)
            .filter_map(|node| serde_json::from_str::<Value>(&node.inner_html()).ok())
            .find(|value| value.get("@type").and_then(Value::as_str) == Some("MusicRecording"))
            .map(|value| Self::record_from_json(&value))
    }
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_texts(document: &Html, field: &str) -> Vec<String> {
    let selector = match Selector::parse(&format!("[data-field=\"{field}\"]")) {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };
    document
        .select(&selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

fn field_text(document: &Html, field: &str) -> Option<String> {
    field_texts(document, field).into_iter().next()
}

/// Text of a JSON value that is a string, a number or an object with `name`.
fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj.get("name").and_then(json_text),
        _ => None,
    }
}

fn json_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(json_text).collect(),
        Some(other) => json_text(other).into_iter().collect(),
        None => Vec::new(),
    }
    .into_iter()
    .filter(|name| !name.is_empty())
    .collect()
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn leading_number(text: &str) -> Option<f64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

fn year_from_date(date: &str) -> Option<i32> {
    let year: String = date.trim().chars().take(4).collect();
    if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        year.parse().ok()
    } else {
        None
    }
}
