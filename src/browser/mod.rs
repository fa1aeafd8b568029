//! Page fetching through a headless browser.
//!
//! A single browser session is launched at startup and reused for every site.
//! Each fetch navigates to the page, scrolls until the document height stops
//! growing (so lazily loaded listings are present), then captures the page
//! source and, for multimodal models, a screenshot.
//!
//! The scroll loop is bounded both by an iteration cap and a wall-clock
//! timeout; hitting either bound captures the page as it is.

pub mod error;
pub mod webdriver;

pub use error::{BrowserError, Result};

use crate::config::BrowserConfig;
use crate::models::FetchedPage;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use webdriver::WebDriverSession;

const HEIGHT_SCRIPT: &str = "return document.body.scrollHeight;";
const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Something that can load a URL and hand back its rendered markup.
pub trait PageSource {
    async fn fetch(&mut self, url: &str, capture_screenshot: bool) -> Result<FetchedPage>;
}

/// A page whose height can be measured and which can be scrolled to the bottom.
pub trait Scrollable {
    async fn height(&mut self) -> Result<u64>;
    async fn scroll_to_bottom(&mut self) -> Result<()>;
}

/// Bounds for the scroll-until-stable loop.
#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    pub settle: Duration,
    pub max_scrolls: usize,
    pub timeout: Duration,
}

impl From<&BrowserConfig> for ScrollPolicy {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            settle: config.scroll_settle(),
            max_scrolls: config.max_scrolls,
            timeout: config.scroll_timeout(),
        }
    }
}

/// How the scroll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Height stopped changing after this many scrolls.
    Settled { scrolls: usize },
    /// `max_scrolls` reached while the page was still growing.
    IterationCap,
    /// The wall-clock timeout elapsed first.
    TimedOut { scrolls: usize },
}

/// Scroll to the bottom repeatedly until the page height stops increasing.
pub async fn scroll_until_stable<S: Scrollable>(
    page: &mut S,
    policy: &ScrollPolicy,
) -> Result<ScrollOutcome> {
    let started = Instant::now();
    let mut last_height = page.height().await?;

    for scroll in 1..=policy.max_scrolls {
        if started.elapsed() >= policy.timeout {
            return Ok(ScrollOutcome::TimedOut {
                scrolls: scroll - 1,
            });
        }

        page.scroll_to_bottom().await?;
        sleep(policy.settle).await;

        let new_height = page.height().await?;
        debug!(scroll, last_height, new_height, "Scrolled");
        if new_height == last_height {
            return Ok(ScrollOutcome::Settled { scrolls: scroll });
        }
        last_height = new_height;
    }

    Ok(ScrollOutcome::IterationCap)
}

impl Scrollable for WebDriverSession {
    async fn height(&mut self) -> Result<u64> {
        let value = self.execute(HEIGHT_SCRIPT).await?;
        value
            .as_f64()
            .map(|h| h.max(0.0) as u64)
            .ok_or_else(|| BrowserError::Protocol(format!("page height is not a number: {value}")))
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.execute(SCROLL_SCRIPT).await.map(|_| ())
    }
}

/// Headless browser driven over WebDriver.
pub struct Browser {
    session: WebDriverSession,
    page_load_wait: Duration,
    scroll: ScrollPolicy,
}

impl Browser {
    /// Launch the browser. Callers must [`Browser::close`] it on every exit path.
    #[instrument(level = "info", skip_all, fields(driver = %config.webdriver_url))]
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let session = WebDriverSession::start(
            &config.webdriver_url,
            &config.browser_args,
            config.request_timeout(),
        )
        .await?;

        Ok(Self {
            session,
            page_load_wait: config.page_load_wait(),
            scroll: ScrollPolicy::from(config),
        })
    }

    /// Quit the browser. Failure is logged, not returned.
    pub async fn close(self) {
        let session_id = self.session.session_id().to_string();
        if let Err(e) = self.session.close().await {
            warn!(%session_id, error = %e, "Failed to close browser session");
        }
    }
}

impl PageSource for Browser {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&mut self, url: &str, capture_screenshot: bool) -> Result<FetchedPage> {
        self.session.navigate(url).await?;
        sleep(self.page_load_wait).await;

        match scroll_until_stable(&mut self.session, &self.scroll).await? {
            ScrollOutcome::Settled { scrolls } => {
                debug!(scrolls, "Page height settled");
            }
            ScrollOutcome::IterationCap => {
                warn!(
                    max_scrolls = self.scroll.max_scrolls,
                    "Page still growing at scroll cap; capturing as-is"
                );
            }
            ScrollOutcome::TimedOut { scrolls } => {
                warn!(
                    scrolls,
                    timeout = ?self.scroll.timeout,
                    "Scroll loop timed out; capturing as-is"
                );
            }
        }

        let html = self.session.page_source().await?;

        let screenshot = if capture_screenshot {
            match self.session.screenshot().await {
                Ok(png) => Some(png),
                Err(e) => {
                    warn!(error = %e, "Screenshot failed; continuing without it");
                    None
                }
            }
        } else {
            None
        };

        info!(
            bytes = html.len(),
            screenshot = screenshot.is_some(),
            "Fetched page"
        );
        Ok(FetchedPage { html, screenshot })
    }
}
