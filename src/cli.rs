//! Command-line interface definitions for Event Scout.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every option overrides the corresponding value from the config file; most
//! can also be provided via environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Event Scout application.
///
/// # Examples
///
/// ```sh
/// # Scrape every registered site with the built-in configuration
/// event_scout
///
/// # Use a config file and a different model, then render the HTML report
/// event_scout --config sites.yaml --model mistral:latest --html
///
/// # Only re-scrape one site
/// event_scout --site "Chatt Library"
///
/// # Re-render the report from the last run's CSV
/// event_scout --render-only
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "EVENT_SCOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output directory for CSV and HTML files
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Output directory for the run log and raw HTML snapshots
    #[arg(short, long)]
    pub log_dir: Option<PathBuf>,

    /// Preferred model name (falls back to an installed model when missing)
    #[arg(short, long, env = "EVENT_SCOUT_MODEL")]
    pub model: Option<String>,

    /// Base URL of the local model API
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Base URL of the WebDriver server
    #[arg(long, env = "WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,

    /// Maximum chunk size in bytes for markup sent to the model
    #[arg(long)]
    pub max_chunk_size: Option<usize>,

    /// Restrict the run to the named site (repeatable)
    #[arg(short, long = "site", value_name = "NAME")]
    pub sites: Vec<String>,

    /// Render the HTML report after extraction
    #[arg(long)]
    pub html: bool,

    /// Skip extraction and only render the HTML report from the existing combined CSV
    #[arg(long, conflicts_with = "sites")]
    pub render_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["event_scout"]);
        assert!(cli.data_dir.is_none());
        assert!(cli.sites.is_empty());
        assert!(!cli.html);
        assert!(!cli.render_only);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "event_scout",
            "--data-dir",
            "./out",
            "--log-dir",
            "./logs",
            "--max-chunk-size",
            "8000",
            "--html",
        ]);

        assert_eq!(cli.data_dir, Some(PathBuf::from("./out")));
        assert_eq!(cli.log_dir, Some(PathBuf::from("./logs")));
        assert_eq!(cli.max_chunk_size, Some(8000));
        assert!(cli.html);
    }

    #[test]
    fn test_cli_short_flags_and_repeated_sites() {
        let cli = Cli::parse_from([
            "event_scout",
            "-d",
            "/tmp/data",
            "-s",
            "Chatt Library",
            "-s",
            "CHA Guide Events",
        ]);

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/data")));
        assert_eq!(cli.sites, vec!["Chatt Library", "CHA Guide Events"]);
    }

    #[test]
    fn test_cli_render_only_conflicts_with_site() {
        let result = Cli::try_parse_from(["event_scout", "--render-only", "--site", "Chatt Library"]);
        assert!(result.is_err());
    }
}
