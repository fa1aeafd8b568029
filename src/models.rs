//! Data models for scraped events and the sites they come from.
//!
//! This module defines the core data structures used throughout the application:
//! - [`SiteDescriptor`]: One entry of the site registry
//! - [`FetchedPage`]: Rendered markup (and optional screenshot) for one site
//! - [`RawEvent`]: Partial event object as produced by the model
//! - [`EventRecord`]: Normalized event row with every field populated
//! - [`SourcedEvent`]: An [`EventRecord`] tagged with the site it came from
//!
//! Missing values are never represented by absence: every normalized field
//! holds either a real value or the [`NOT_AVAILABLE`] sentinel.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Sentinel written into any field the model could not determine.
pub const NOT_AVAILABLE: &str = "N/A";

/// Column order of per-site CSV files.
pub const EVENT_COLUMNS: [&str; 6] = ["title", "date", "time", "location", "url", "image_url"];

/// Column order of the combined CSV file.
pub const SOURCED_EVENT_COLUMNS: [&str; 7] = [
    "title",
    "date",
    "time",
    "location",
    "url",
    "image_url",
    "source",
];

/// A scrape target from the site registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteDescriptor {
    /// Display name, also used for file names and the `source` column.
    pub name: String,
    /// Page listing the site's events.
    pub url: String,
    /// Free-text description of the page.
    #[serde(default)]
    pub description: String,
}

impl SiteDescriptor {
    pub fn new(name: &str, url: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            description: description.to_string(),
        }
    }
}

/// Rendered page content returned by the browser.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    /// Page source after scrolling has settled.
    pub html: String,
    /// Base64-encoded PNG of the viewport, when one was requested.
    pub screenshot: Option<String>,
}

/// An event object as returned by the model, before normalization.
///
/// Every field is optional. Strings are trimmed; blank strings and `null`
/// decode as `None`; numbers and booleans are stringified. Unknown keys are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image_url: Option<String>,
}

impl RawEvent {
    /// Title used as the deduplication key; missing titles share the sentinel.
    pub fn title_key(&self) -> &str {
        self.title.as_deref().unwrap_or(NOT_AVAILABLE)
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let text = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Nested structures are not a meaningful field value.
        Value::Array(_) | Value::Object(_) => return Ok(None),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// A normalized event row. All six fields are always populated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventRecord {
    pub title: String,
    /// `MM-DD` when the model's date could be parsed, otherwise as given.
    pub date: String,
    pub time: String,
    pub location: String,
    pub url: String,
    pub image_url: String,
}

impl From<RawEvent> for EventRecord {
    fn from(raw: RawEvent) -> Self {
        let or_na = |field: Option<String>| field.unwrap_or_else(|| NOT_AVAILABLE.to_string());
        Self {
            title: or_na(raw.title),
            date: or_na(raw.date),
            time: or_na(raw.time),
            location: or_na(raw.location),
            url: or_na(raw.url),
            image_url: or_na(raw.image_url),
        }
    }
}

impl EventRecord {
    /// Field values in [`EVENT_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.title.clone(),
            self.date.clone(),
            self.time.clone(),
            self.location.clone(),
            self.url.clone(),
            self.image_url.clone(),
        ]
    }
}

/// An event tagged with the name of the site it was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourcedEvent {
    #[serde(flatten)]
    pub event: EventRecord,
    pub source: String,
}

impl SourcedEvent {
    /// Field values in [`SOURCED_EVENT_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = self.event.to_row();
        row.push(self.source.clone());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_full_object() {
        let json = r#"{
            "title": "Jazz Night",
            "date": "4/24",
            "time": "7:00 PM",
            "location": "Riverfront",
            "url": "http://x/e1",
            "image_url": "N/A"
        }"#;
        let raw: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(raw.title.as_deref(), Some("Jazz Night"));
        assert_eq!(raw.image_url.as_deref(), Some("N/A"));
    }

    #[test]
    fn test_raw_event_lenient_fields() {
        let json = r#"{"title": "  Trivia  ", "date": null, "time": 19, "location": "", "extra": "ignored"}"#;
        let raw: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(raw.title.as_deref(), Some("Trivia"));
        assert_eq!(raw.date, None);
        assert_eq!(raw.time.as_deref(), Some("19"));
        assert_eq!(raw.location, None);
        assert_eq!(raw.url, None);
    }

    #[test]
    fn test_missing_fields_become_sentinel() {
        let raw: RawEvent = serde_json::from_str(r#"{"title": "Open Mic"}"#).unwrap();
        let record = EventRecord::from(raw);
        assert_eq!(record.title, "Open Mic");
        assert_eq!(record.date, NOT_AVAILABLE);
        assert_eq!(record.time, NOT_AVAILABLE);
        assert_eq!(record.location, NOT_AVAILABLE);
        assert_eq!(record.url, NOT_AVAILABLE);
        assert_eq!(record.image_url, NOT_AVAILABLE);
    }

    #[test]
    fn test_title_key_for_untitled_event() {
        assert_eq!(RawEvent::default().title_key(), NOT_AVAILABLE);
    }

    #[test]
    fn test_sourced_event_row_order() {
        let event = SourcedEvent {
            event: EventRecord::from(RawEvent {
                title: Some("Book Club".to_string()),
                ..RawEvent::default()
            }),
            source: "Chatt Library".to_string(),
        };
        let row = event.to_row();
        assert_eq!(row.len(), SOURCED_EVENT_COLUMNS.len());
        assert_eq!(row[0], "Book Club");
        assert_eq!(row[6], "Chatt Library");
    }
}
