//! HTML report generation from the combined events CSV.
//!
//! The report is a single self-contained page: a styled table of every event,
//! ordered by date with undated events last. Image URLs become `<img>` tags;
//! everything else is escaped text.

use crate::models::{NOT_AVAILABLE, SourcedEvent};
use crate::outputs::csv::read_combined;
use chrono::{Local, NaiveDate};
use std::error::Error;
use std::fmt::Write;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const STYLE: &str = r#"<style>
    body { font-family: Arial, sans-serif; margin: 20px; }
    h1 { color: #333; text-align: center; }
    table { border-collapse: collapse; width: 100%; margin-bottom: 20px; }
    th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
    th { background-color: #f2f2f2; position: sticky; top: 0; }
    tr:nth-child(even) { background-color: #f9f9f9; }
    tr:hover { background-color: #f1f1f1; }
    .event-image { width: 340px; height: 227px; object-fit: cover; }
</style>"#;

const HEADERS: [&str; 7] = ["title", "date", "time", "location", "url", "image", "source"];

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn is_missing(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == NOT_AVAILABLE
}

/// Sort key for an `MM-DD` date; `None` for anything else.
fn parse_month_day(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{} 2000", date.trim()), "%m-%d %Y").ok()
}

fn image_cell(url: &str) -> String {
    if is_missing(url) {
        NOT_AVAILABLE.to_string()
    } else {
        format!(
            r#"<img class="event-image" src="{}" alt="Event image">"#,
            escape_html(url)
        )
    }
}

fn url_cell(url: &str) -> String {
    if is_missing(url) {
        NOT_AVAILABLE.to_string()
    } else {
        let escaped = escape_html(url);
        format!(r#"<a href="{escaped}">{escaped}</a>"#)
    }
}

/// Order events by date; missing or unparseable dates go last, ties keep input order.
pub fn sort_by_date(events: &mut [SourcedEvent]) {
    events.sort_by_key(|e| {
        let parsed = parse_month_day(&e.event.date);
        (parsed.is_none(), parsed)
    });
}

/// Render the full HTML document.
pub fn render_report(events: &[SourcedEvent], title: &str, updated: NaiveDate) -> String {
    let mut sorted = events.to_vec();
    sort_by_date(&mut sorted);

    let mut rows = String::new();
    for e in &sorted {
        let ev = &e.event;
        let cells = [
            escape_html(&ev.title),
            escape_html(&ev.date),
            escape_html(&ev.time),
            escape_html(&ev.location),
            url_cell(&ev.url),
            image_cell(&ev.image_url),
            escape_html(&e.source),
        ];
        rows.push_str("      <tr>");
        for cell in cells {
            let _ = write!(rows, "<td>{cell}</td>");
        }
        rows.push_str("</tr>\n");
    }

    let header_cells: String = HEADERS.iter().map(|h| format!("<th>{h}</th>")).collect();
    let title = escape_html(title);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  {STYLE}
</head>
<body>
  <h1>{title}</h1>
  <p>Last updated: {updated}</p>
  <table class="event-table">
    <thead>
      <tr>{header_cells}</tr>
    </thead>
    <tbody>
{rows}    </tbody>
  </table>
</body>
</html>
"#,
        updated = updated.format("%B %d, %Y"),
    )
}

/// Render `csv_path` into `html_path`. Returns the number of events rendered.
#[instrument(level = "info", skip_all, fields(csv = %csv_path.display(), html = %html_path.display()))]
pub async fn write_report(
    csv_path: &Path,
    html_path: &Path,
    title: &str,
) -> Result<usize, Box<dyn Error>> {
    let events = read_combined(csv_path).await?;
    let html = render_report(&events, title, Local::now().date_naive());
    fs::write(html_path, html).await?;
    info!(count = events.len(), "Wrote HTML report");
    Ok(events.len())
}
