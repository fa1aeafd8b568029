//! Run configuration: site registry, endpoints, limits and output paths.
//!
//! Configuration is an explicit value passed into the pipeline. It is read
//! from an optional YAML file; every field has a default so that an absent
//! or partial file still produces a usable configuration. Command-line flags
//! are applied on top by [`AppConfig::apply_cli`].
//!
//! ```yaml
//! sites:
//!   - name: Chatt Library
//!     url: https://chattlibrary.org/events/
//!     description: Events page from Chattanooga Library.
//! model:
//!   model: llava:latest
//! extraction:
//!   max_chunk_size: 12000
//! ```

use crate::cli::Cli;
use crate::models::SiteDescriptor;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for one extraction run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sites in processing order.
    pub sites: Vec<SiteDescriptor>,
    pub model: ModelConfig,
    pub browser: BrowserConfig,
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
}

/// Local model endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the model API, e.g. `http://localhost:11434/api`.
    pub endpoint: String,
    /// Preferred model name.
    pub model: String,
    /// Tried in order when `model` is not installed.
    pub fallback_models: Vec<String>,
    /// A model whose name contains any of these accepts image input.
    pub vision_markers: Vec<String>,
    pub request_timeout_secs: u64,
    /// Retries for transient failures; 0 disables retrying.
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

/// WebDriver connection and page-settling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Base URL of a running WebDriver server (chromedriver).
    pub webdriver_url: String,
    /// Extra command-line switches for the browser.
    pub browser_args: Vec<String>,
    /// Delay after navigation before the first height measurement.
    pub page_load_wait_ms: u64,
    /// Delay after each scroll before re-measuring.
    pub scroll_settle_ms: u64,
    /// Hard cap on scroll iterations per page.
    pub max_scrolls: usize,
    /// Wall-clock cap on the whole scroll loop.
    pub scroll_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Upper bound, in bytes, for each chunk of markup sent to the model.
    pub max_chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// CSV and HTML artifacts.
    pub data_dir: PathBuf,
    /// Run log and raw HTML snapshots.
    pub log_dir: PathBuf,
    /// Heading of the HTML report.
    pub report_title: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sites: default_sites(),
            model: ModelConfig::default(),
            browser: BrowserConfig::default(),
            extraction: ExtractionConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api".to_string(),
            model: "llava:latest".to_string(),
            fallback_models: vec![
                "mistral:latest".to_string(),
                "llama3:latest".to_string(),
                "phi3:latest".to_string(),
            ],
            vision_markers: vec!["llava".to_string(), "vision".to_string()],
            request_timeout_secs: 300,
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser_args: [
                "--headless",
                "--disable-gpu",
                "--window-size=1920,1080",
                "--no-sandbox",
                "--disable-dev-shm-usage",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            page_load_wait_ms: 5000,
            scroll_settle_ms: 2000,
            max_scrolls: 20,
            scroll_timeout_secs: 90,
            request_timeout_secs: 120,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 12_000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            report_title: "Chattanooga Events".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl BrowserConfig {
    pub fn page_load_wait(&self) -> Duration {
        Duration::from_millis(self.page_load_wait_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn scroll_timeout(&self) -> Duration {
        Duration::from_secs(self.scroll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl OutputConfig {
    pub fn combined_csv_path(&self) -> PathBuf {
        self.data_dir.join("all_events.csv")
    }

    pub fn site_csv_path(&self, stem: &str) -> PathBuf {
        self.data_dir.join(format!("{stem}_events.csv"))
    }

    pub fn snapshot_path(&self, stem: &str) -> PathBuf {
        self.log_dir.join(format!("{stem}.html"))
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.log_dir.join("ai_extraction.log")
    }

    pub fn html_report_path(&self) -> PathBuf {
        self.data_dir.join("events_table.html")
    }
}

fn default_sites() -> Vec<SiteDescriptor> {
    vec![
        SiteDescriptor::new(
            "Visit Chattanooga",
            "https://www.visitchattanooga.com/events/",
            "Events page from Visit Chattanooga website.",
        ),
        SiteDescriptor::new(
            "CHA Guide Events",
            "https://www.cha.guide/events",
            "Events listing from CHA Guide.",
        ),
        SiteDescriptor::new(
            "Chattanooga Pulse",
            "https://www.chattanoogapulse.com/search/event/the-pulse-event-search/#page=1",
            "Event search page from Chattanooga Pulse.",
        ),
        SiteDescriptor::new(
            "Chatt Library",
            "https://chattlibrary.org/events/",
            "Events page from Chattanooga Library.",
        ),
    ]
}

impl AppConfig {
    /// Load configuration from `path`, or the built-in defaults when `None`.
    ///
    /// Runs before logging is set up, so the caller reports the source.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to an empty mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Overlay command-line overrides onto the loaded configuration.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(dir) = &cli.data_dir {
            self.output.data_dir = dir.clone();
        }
        if let Some(dir) = &cli.log_dir {
            self.output.log_dir = dir.clone();
        }
        if let Some(model) = &cli.model {
            self.model.model = model.clone();
        }
        if let Some(endpoint) = &cli.ollama_url {
            self.model.endpoint = endpoint.clone();
        }
        if let Some(webdriver) = &cli.webdriver_url {
            self.browser.webdriver_url = webdriver.clone();
        }
        if let Some(size) = cli.max_chunk_size {
            self.extraction.max_chunk_size = size;
        }
        if !cli.sites.is_empty() {
            self.retain_sites(&cli.sites)?;
        }
        Ok(())
    }

    /// Keep only the named sites, preserving registry order.
    pub fn retain_sites(&mut self, names: &[String]) -> Result<(), ConfigError> {
        let known: HashSet<&str> = self.sites.iter().map(|s| s.name.as_str()).collect();
        if let Some(unknown) = names.iter().find(|n| !known.contains(n.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "unknown site {unknown:?}; known sites: {}",
                self.sites.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        self.sites.retain(|s| names.contains(&s.name));
        Ok(())
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sites.is_empty() {
            return Err(ConfigError::Invalid("site registry is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "site with url {} has a blank name",
                    site.url
                )));
            }
            if !seen.insert(site.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate site name {:?}",
                    site.name
                )));
            }
            match Url::parse(&site.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(ConfigError::Invalid(format!(
                        "site {:?} has unsupported scheme {:?}",
                        site.name,
                        url.scheme()
                    )));
                }
                Err(e) => {
                    return Err(ConfigError::Invalid(format!(
                        "site {:?} has invalid url {:?}: {e}",
                        site.name, site.url
                    )));
                }
            }
        }

        if self.extraction.max_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "extraction.max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.browser.max_scrolls == 0 {
            return Err(ConfigError::Invalid(
                "browser.max_scrolls must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
