//! Event extraction: markup → model → JSON → normalized event records.
//!
//! For each chunk of cleaned page markup the model is asked for a JSON array
//! of events. Model output is free-form text, so the JSON is located with
//! increasingly lenient strategies:
//!
//! 1. the contents of a fenced code block (```` ```json ... ``` ````)
//! 2. the first bracketed array of objects anywhere in the text
//! 3. the whole response, but only if it already looks like JSON
//!
//! A chunk whose generation or parsing fails contributes no events; the
//! remaining chunks are still processed. After all chunks, events are
//! deduplicated by title (first occurrence wins), missing fields are filled
//! with `N/A`, and dates are normalized to `MM-DD` where possible.

use crate::api::Generate;
use crate::chunker::{chunk_html, clean_html};
use crate::models::{EventRecord, NOT_AVAILABLE, RawEvent};
use crate::utils::{looks_truncated, truncate_for_log};
use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Accepted input formats for event dates, tried in order.
pub const DATE_FORMATS: [&str; 4] = ["%m-%d", "%m/%d", "%B %d", "%b %d"];

/// Canonical output format for event dates.
pub const CANONICAL_DATE_FORMAT: &str = "%m-%d";

/// Leap year so that Feb 29 survives the round trip.
const PLACEHOLDER_YEAR: i32 = 2000;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?i:json)\s*(.*?)\s*```").expect("valid regex"));

static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static BARE_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\[\s*\{\s*".*?\}\s*\]"#).expect("valid regex"));

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON found in model response")]
    NoJson,

    #[error("model response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("model response JSON is neither an array nor an object")]
    NotAnArray,
}

/// Locate the JSON payload inside a free-form model response.
///
/// A ```` ```json ```` fence wins over any other fenced block, so a response
/// that quotes the page markup before its answer still parses.
///
/// Returns [`ParseError::NoJson`] rather than handing arbitrary prose to the
/// JSON decoder when neither pattern matches and the response does not itself
/// start like JSON.
pub fn extract_json(text: &str) -> Result<&str, ParseError> {
    if let Some(block) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
        return Ok(block.as_str().trim());
    }

    // Untagged or mislabelled fences: first one whose body looks like JSON.
    let fenced = ANY_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| body.starts_with('[') || body.starts_with('{'));
    if let Some(block) = fenced {
        return Ok(block);
    }

    if let Some(array) = BARE_ARRAY.find(text) {
        return Ok(array.as_str());
    }

    let trimmed = text.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        Ok(trimmed)
    } else {
        Err(ParseError::NoJson)
    }
}

/// Decode the events in a model response.
///
/// A lone object is treated as a one-element array; array elements that are
/// not objects are skipped.
pub fn parse_events(response: &str) -> Result<Vec<RawEvent>, ParseError> {
    let json = extract_json(response)?;
    let value: Value = serde_json::from_str(json)?;

    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(ParseError::NotAnArray),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawEvent>(item) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "Skipping non-object array element");
                None
            }
        })
        .collect())
}

/// Normalize a date string to `MM-DD`.
///
/// The first of [`DATE_FORMATS`] that parses wins; an unparseable date is
/// returned unchanged (trimmed). Normalizing a canonical date is a no-op.
pub fn normalize_date(date: &str) -> String {
    let trimmed = date.trim();
    if trimmed == NOT_AVAILABLE {
        return trimmed.to_string();
    }

    let dated = format!("{trimmed} {PLACEHOLDER_YEAR}");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&dated, &format!("{fmt} %Y")).ok())
        .map(|d| d.format(CANONICAL_DATE_FORMAT).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Deduplicate by title, fill missing fields, and normalize dates.
pub fn post_process(events: Vec<RawEvent>) -> Vec<EventRecord> {
    events
        .into_iter()
        .unique_by(|e| e.title_key().to_string())
        .map(|raw| {
            let mut record = EventRecord::from(raw);
            record.date = normalize_date(&record.date);
            record
        })
        .collect()
}

/// Instruction sent with every chunk.
pub fn build_prompt(site_name: &str, site_url: &str, chunk: &str) -> String {
    format!(
        r#"You are an expert web scraper extracting event listings from the HTML of {site_name}.
URL: {site_url}

Extract ALL events found in the HTML below, with these fields:
1. title: The event title
2. date: The event date in MM-DD format
3. time: The event time in HH:MM AM/PM format
4. location: Where the event takes place
5. url: The URL of the event details page
6. image_url: The URL of the event image

Return the results as a JSON array with one object per event containing exactly these fields.
If a field cannot be found, use "{na}" as its value.

Example format:
```json
[
  {{
    "title": "Event Title",
    "date": "04-24",
    "time": "7:00 PM",
    "location": "Event Location",
    "url": "https://example.com/event",
    "image_url": "https://example.com/image.jpg"
  }}
]
```

Here is the HTML content:
{chunk}
"#,
        na = NOT_AVAILABLE,
    )
}

/// Runs the chunk → model → parse loop for one page.
pub struct EventExtractor<'a, M> {
    model: &'a M,
    max_chunk_size: usize,
}

impl<'a, M: Generate> EventExtractor<'a, M> {
    pub fn new(model: &'a M, max_chunk_size: usize) -> Self {
        Self {
            model,
            max_chunk_size,
        }
    }

    /// Extract events from a rendered page.
    ///
    /// The screenshot, if any, accompanies only the first chunk and only when
    /// the model accepts images. Never fails: problems are logged per chunk.
    #[instrument(level = "info", skip_all, fields(site = %site_name))]
    pub async fn extract(
        &self,
        html: &str,
        screenshot: Option<&str>,
        site_name: &str,
        site_url: &str,
    ) -> Vec<EventRecord> {
        let cleaned = clean_html(html);
        let chunks = chunk_html(&cleaned, self.max_chunk_size);
        let total = chunks.len();
        let attach_image = self.model.supports_images();

        let mut all_events = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let n = i + 1;
            info!(chunk = n, total, bytes = chunk.len(), "Processing chunk");

            let prompt = build_prompt(site_name, site_url, chunk);
            let image = if i == 0 && attach_image { screenshot } else { None };

            let response = match self.model.generate(&prompt, image).await {
                Ok(response) => response,
                Err(e) => {
                    error!(chunk = n, error = %e, "Model call failed; skipping chunk");
                    continue;
                }
            };

            match parse_events(&response) {
                Ok(events) => {
                    info!(chunk = n, count = events.len(), "Extracted events from chunk");
                    all_events.extend(events);
                }
                Err(e) => {
                    if let ParseError::InvalidJson(ref json_err) = e {
                        if looks_truncated(json_err) {
                            warn!(chunk = n, "Model output looks cut off mid-JSON");
                        }
                    }
                    error!(
                        chunk = n,
                        error = %e,
                        response = %truncate_for_log(&response, 2000),
                        "Error parsing events from chunk"
                    );
                }
            }
        }

        let raw_count = all_events.len();
        let records = post_process(all_events);
        info!(raw = raw_count, kept = records.len(), "Post-processed events");
        records
    }
}
