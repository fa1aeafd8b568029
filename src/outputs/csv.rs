//! CSV reading and writing for event tables.
//!
//! Files are comma-separated with a header row. Fields containing a comma,
//! quote or line break are quoted, with embedded quotes doubled.

use crate::models::{
    EVENT_COLUMNS, EventRecord, NOT_AVAILABLE, SOURCED_EVENT_COLUMNS, SourcedEvent,
};
use std::error::Error;
use std::iter::Peekable;
use std::mem::take;
use std::path::Path;
use std::str::Chars;
use tokio::fs;
use tracing::{info, instrument};

/// A row type with a fixed header.
pub trait CsvRecord {
    const HEADER: &'static [&'static str];

    /// Field values in [`CsvRecord::HEADER`] order.
    fn fields(&self) -> Vec<String>;
}

impl CsvRecord for EventRecord {
    const HEADER: &'static [&'static str] = &EVENT_COLUMNS;

    fn fields(&self) -> Vec<String> {
        self.to_row()
    }
}

impl CsvRecord for SourcedEvent {
    const HEADER: &'static [&'static str] = &SOURCED_EVENT_COLUMNS;

    fn fields(&self) -> Vec<String> {
        self.to_row()
    }
}

/* ---------------- Writing ---------------- */

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn push_line<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field.as_ref());
    }
    out.push('\n');
}

/// Render the header line followed by one line per record.
pub fn render<R: CsvRecord>(records: &[R]) -> String {
    let mut out = String::new();
    push_line(&mut out, R::HEADER);
    for record in records {
        push_line(&mut out, record.fields().as_slice());
    }
    out
}

async fn write_file(path: &Path, contents: String) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(path, contents).await?;
    Ok(())
}

/// Write one site's events (no `source` column).
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_site_events(path: &Path, events: &[EventRecord]) -> Result<(), Box<dyn Error>> {
    write_file(path, render(events)).await?;
    info!(count = events.len(), "Wrote site events CSV");
    Ok(())
}

/// Write the combined table of every site's events.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_combined(path: &Path, events: &[SourcedEvent]) -> Result<(), Box<dyn Error>> {
    write_file(path, render(events)).await?;
    info!(count = events.len(), "Wrote combined events CSV");
    Ok(())
}

/* ---------------- Reading ---------------- */

/// Lines of CSV text split into fields; blank lines are skipped.
///
/// Quoted fields may contain separators, doubled quotes and line breaks.
/// Lines may end in `\n`, `\r\n` or a bare `\r`.
pub struct Records<'a> {
    chars: Peekable<Chars<'a>>,
}

pub fn records(text: &str) -> Records<'_> {
    Records {
        chars: text.chars().peekable(),
    }
}

impl Records<'_> {
    fn read_line(&mut self) -> Vec<String> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;

        while let Some(ch) = self.chars.next() {
            match (ch, quoted) {
                ('"', true) if self.chars.next_if_eq(&'"').is_some() => field.push('"'),
                ('"', _) => quoted = !quoted,
                (',', false) => fields.push(take(&mut field)),
                ('\r', false) => {
                    self.chars.next_if_eq(&'\n');
                    break;
                }
                ('\n', false) => break,
                (c, _) => field.push(c),
            }
        }

        fields.push(field);
        fields
    }
}

impl Iterator for Records<'_> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.chars.peek()?;
            let line = self.read_line();
            if !(line.len() == 1 && line[0].is_empty()) {
                return Some(line);
            }
        }
    }
}

/// Read a combined CSV back into events.
///
/// Columns are matched by header name; a missing column or short row yields
/// `N/A` for that field.
pub fn parse_combined(text: &str) -> Vec<SourcedEvent> {
    let mut rows = records(text);
    let Some(header) = rows.next() else {
        return Vec::new();
    };

    let index: Vec<Option<usize>> = SOURCED_EVENT_COLUMNS
        .iter()
        .map(|col| header.iter().position(|h| h.trim() == *col))
        .collect();

    rows.map(|row| {
        let cell = |col: usize| -> String {
            index[col]
                .and_then(|i| row.get(i))
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        SourcedEvent {
            event: EventRecord {
                title: cell(0),
                date: cell(1),
                time: cell(2),
                location: cell(3),
                url: cell(4),
                image_url: cell(5),
            },
            source: cell(6),
        }
    })
    .collect()
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_combined(path: &Path) -> Result<Vec<SourcedEvent>, Box<dyn Error>> {
    let text = fs::read_to_string(path).await?;
    Ok(parse_combined(&text))
}
