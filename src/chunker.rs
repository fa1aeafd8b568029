//! HTML cleaning and context-window chunking.
//!
//! Page markup is reduced before it reaches the model: `<script>` and
//! `<style>` elements are dropped and, when the page has an identifiable main
//! content region, only that region is kept. The cleaned markup is then split
//! into chunks no larger than a byte budget.
//!
//! Splitting prefers element boundaries: every `<div`, `<section>` or
//! `<article>` opening tag is a candidate cut point and consecutive segments
//! are packed greedily. A segment that alone exceeds the budget, or markup
//! with no candidate cut points at all, is sliced by size on UTF-8 character
//! boundaries. Either way the chunks concatenate back to the input exactly.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

static STRIP_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script, style").expect("valid selector"));

/// Main-content candidates, tried in order.
static MAIN_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["main", "div#main", "div.main"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:div|section|article)\b").expect("valid regex"));

/// Strip script/style elements and scope to the main content region if present.
pub fn clean_html(html: &str) -> String {
    let mut document = Html::parse_document(html);

    let stripped: Vec<_> = document.select(&STRIP_SELECTOR).map(|el| el.id()).collect();
    for id in &stripped {
        if let Some(mut node) = document.tree.get_mut(*id) {
            node.detach();
        }
    }

    let main = MAIN_SELECTORS
        .iter()
        .find_map(|selector| document.select(selector).next());

    let scoped = main.is_some();
    let cleaned = match main {
        Some(region) => region.html(),
        None => document.html(),
    };
    debug!(
        original_bytes = html.len(),
        cleaned_bytes = cleaned.len(),
        removed = stripped.len(),
        scoped,
        "Cleaned HTML"
    );
    cleaned
}

/// Split `html` into chunks of at most `max_size` bytes.
///
/// Always returns at least one chunk; input that already fits is returned
/// whole. A `max_size` of zero is treated as one.
pub fn chunk_html(html: &str, max_size: usize) -> Vec<String> {
    let max_size = max_size.max(1);
    if html.len() <= max_size {
        return vec![html.to_string()];
    }

    let segments = structural_segments(html);
    if segments.len() <= 1 {
        return slice_by_size(html, max_size)
            .into_iter()
            .map(String::from)
            .collect();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for segment in segments {
        if segment.len() > max_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(slice_by_size(segment, max_size).into_iter().map(String::from));
            continue;
        }
        if current.len() + segment.len() > max_size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(segment);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Cut `html` just before every structural opening tag.
fn structural_segments(html: &str) -> Vec<&str> {
    let mut cuts: Vec<usize> = BOUNDARY
        .find_iter(html)
        .map(|m| m.start())
        .filter(|&start| start > 0)
        .collect();
    cuts.push(html.len());

    let mut segments = Vec::with_capacity(cuts.len());
    let mut start = 0;
    for end in cuts {
        if end > start {
            segments.push(&html[start..end]);
            start = end;
        }
    }
    segments
}

/// Fixed-size slices that never split a UTF-8 character.
///
/// A single character wider than `max_size` gets a slice of its own.
fn slice_by_size(text: &str, max_size: usize) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = max_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        slices.push(head);
        rest = tail;
    }
    slices
}
