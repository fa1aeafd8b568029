//! Utility functions for string handling and file system operations.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging raw model output
//! - JSON error detection for spotting truncated model responses
//! - File stem generation from site names
//! - File system validation for output directories

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary)
/// with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let kept = truncate_to_char_boundary(s, max);
    if kept.len() == s.len() {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", kept, s.len() - kept.len())
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// Local models sometimes stop mid-array when they hit their output limit;
/// the resulting JSON fails with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a site name to a file stem: lowercased, spaces replaced by `_`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(site_file_stem("Visit Chattanooga"), "visit_chattanooga");
/// ```
pub fn site_file_stem(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
