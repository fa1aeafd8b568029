//! Site-by-site extraction run.
//!
//! Sites are processed strictly in registry order, one at a time: fetch the
//! page, keep a raw snapshot for debugging, extract events, and write the
//! site's CSV. A failure on one site is logged and the run moves on. Once all
//! sites are done the tagged events are written to the combined CSV, unless
//! there are none at all, which ends the run with [`RunError::NoEvents`].

use crate::api::Generate;
use crate::browser::PageSource;
use crate::config::AppConfig;
use crate::extractor::EventExtractor;
use crate::models::{SiteDescriptor, SourcedEvent};
use crate::outputs::csv;
use crate::utils::site_file_stem;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no events were extracted ({failed} of {attempted} sites failed)")]
    NoEvents { attempted: usize, failed: usize },

    #[error("failed to write {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Per-site result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOutcome {
    Extracted { events: usize },
    FetchFailed { error: String },
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sites: Vec<(String, SiteOutcome)>,
    pub total_events: usize,
    pub combined_csv: PathBuf,
}

impl RunSummary {
    pub fn failed_sites(&self) -> usize {
        self.sites
            .iter()
            .filter(|(_, o)| matches!(o, SiteOutcome::FetchFailed { .. }))
            .count()
    }
}

pub struct Orchestrator {
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Process every registered site and write the combined CSV.
    #[instrument(level = "info", skip_all, fields(sites = self.config.sites.len()))]
    pub async fn run<P, M>(&self, pages: &mut P, model: &M) -> Result<RunSummary, RunError>
    where
        P: PageSource,
        M: Generate,
    {
        let extractor = EventExtractor::new(model, self.config.extraction.max_chunk_size);
        let capture_screenshot = model.supports_images();

        let mut outcomes = Vec::with_capacity(self.config.sites.len());
        let mut all_events: Vec<SourcedEvent> = Vec::new();

        for site in &self.config.sites {
            let outcome = self
                .process_site(site, pages, &extractor, capture_screenshot, &mut all_events)
                .await;
            outcomes.push((site.name.clone(), outcome));
        }

        let attempted = outcomes.len();
        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SiteOutcome::FetchFailed { .. }))
            .count();

        if all_events.is_empty() {
            error!(attempted, failed, "No events were extracted; combined CSV not written");
            return Err(RunError::NoEvents { attempted, failed });
        }

        let combined_csv = self.config.output.combined_csv_path();
        csv::write_combined(&combined_csv, &all_events)
            .await
            .map_err(|e| RunError::Io {
                path: combined_csv.clone(),
                message: e.to_string(),
            })?;
        info!(
            path = %combined_csv.display(),
            count = all_events.len(),
            failed_sites = failed,
            "Saved all events"
        );

        Ok(RunSummary {
            sites: outcomes,
            total_events: all_events.len(),
            combined_csv,
        })
    }

    #[instrument(level = "info", skip_all, fields(site = %site.name, url = %site.url))]
    async fn process_site<P, M>(
        &self,
        site: &SiteDescriptor,
        pages: &mut P,
        extractor: &EventExtractor<'_, M>,
        capture_screenshot: bool,
        all_events: &mut Vec<SourcedEvent>,
    ) -> SiteOutcome
    where
        P: PageSource,
        M: Generate,
    {
        let t0 = Instant::now();
        info!("Processing site");

        let page = match pages.fetch(&site.url, capture_screenshot).await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, "Failed to fetch content; skipping site");
                return SiteOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        let stem = site_file_stem(&site.name);
        let output = &self.config.output;

        let snapshot = output.snapshot_path(&stem);
        if let Err(e) = write_snapshot(&snapshot, &page.html).await {
            warn!(path = %snapshot.display(), error = %e, "Could not save HTML snapshot");
        }

        let events = extractor
            .extract(&page.html, page.screenshot.as_deref(), &site.name, &site.url)
            .await;

        let site_csv = output.site_csv_path(&stem);
        if let Err(e) = csv::write_site_events(&site_csv, &events).await {
            error!(path = %site_csv.display(), error = %e, "Failed to save site events");
        }

        info!(
            count = events.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "Extracted events from site"
        );

        let count = events.len();
        all_events.extend(events.into_iter().map(|event| SourcedEvent {
            event,
            source: site.name.clone(),
        }));
        SiteOutcome::Extracted { events: count }
    }
}

async fn write_snapshot(path: &std::path::Path, html: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, html).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, ScriptedPages};
    use std::path::Path;

    const JAZZ_NIGHT: &str = r#"[{"title":"Jazz Night","date":"4/24","time":"7:00 PM","location":"Riverfront","url":"http://x/e1","image_url":"N/A"}]"#;

    fn config_in(dir: &Path, sites: &[(&str, &str)]) -> AppConfig {
        let mut config = AppConfig::default();
        config.sites = sites
            .iter()
            .map(|(name, url)| SiteDescriptor::new(name, url, ""))
            .collect();
        config.output.data_dir = dir.join("data");
        config.output.log_dir = dir.join("logs");
        config
    }

    #[tokio::test]
    async fn test_all_sites_fail_writes_no_combined_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(
            tmp.path(),
            &[("Visit Chattanooga", "https://a.test/"), ("Chatt Library", "https://b.test/")],
        );
        let combined = config.output.combined_csv_path();
        let orchestrator = Orchestrator::new(config);
        let mut pages = ScriptedPages::default();
        let model = ScriptedModel::new(vec![]);

        let result = orchestrator.run(&mut pages, &model).await;

        assert!(matches!(
            result,
            Err(RunError::NoEvents { attempted: 2, failed: 2 })
        ));
        assert!(!combined.exists());
        assert_eq!(pages.fetched.len(), 2);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_site_does_not_stop_later_sites() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(
            tmp.path(),
            &[("Visit Chattanooga", "https://down.test/"), ("Chatt Library", "https://up.test/")],
        );
        let orchestrator = Orchestrator::new(config);
        let mut pages = ScriptedPages::default()
            .with_page("https://up.test/", "<main><div>Jazz Night</div></main>");
        let model = ScriptedModel::new(vec![Ok(JAZZ_NIGHT.to_string())]);

        let summary = orchestrator.run(&mut pages, &model).await.unwrap();

        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.failed_sites(), 1);
        assert_eq!(
            summary.sites[1],
            ("Chatt Library".to_string(), SiteOutcome::Extracted { events: 1 })
        );

        let output = &orchestrator.config().output;
        assert!(!output.site_csv_path("visit_chattanooga").exists());
        assert!(output.site_csv_path("chatt_library").exists());
        assert!(output.snapshot_path("chatt_library").exists());

        let combined = std::fs::read_to_string(&summary.combined_csv).unwrap();
        let mut lines = combined.lines();
        assert_eq!(lines.next(), Some("title,date,time,location,url,image_url,source"));
        assert_eq!(
            lines.next(),
            Some("Jazz Night,04-24,7:00 PM,Riverfront,http://x/e1,N/A,Chatt Library")
        );
    }

    #[tokio::test]
    async fn test_combined_csv_tags_each_source_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(
            tmp.path(),
            &[("CHA Guide Events", "https://a.test/"), ("Chattanooga Pulse", "https://b.test/")],
        );
        let orchestrator = Orchestrator::new(config);
        let mut pages = ScriptedPages::default()
            .with_page("https://a.test/", "<main><div>a</div></main>")
            .with_page("https://b.test/", "<main><div>b</div></main>");
        let model = ScriptedModel::new(vec![
            Ok(r#"[{"title": "Trivia Night"}]"#.to_string()),
            Ok(r#"[{"title": "Trivia Night"}, {"title": "Art Walk"}]"#.to_string()),
        ]);

        let summary = orchestrator.run(&mut pages, &model).await.unwrap();

        // Deduplication is per site; the same title from two sites is kept twice.
        assert_eq!(summary.total_events, 3);
        let events = csv::read_combined(&summary.combined_csv).await.unwrap();
        let tagged: Vec<_> = events
            .iter()
            .map(|e| (e.event.title.as_str(), e.source.as_str()))
            .collect();
        assert_eq!(
            tagged,
            [
                ("Trivia Night", "CHA Guide Events"),
                ("Trivia Night", "Chattanooga Pulse"),
                ("Art Walk", "Chattanooga Pulse"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sites_with_no_events_still_get_csv_but_run_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), &[("Chatt Library", "https://a.test/")]);
        let orchestrator = Orchestrator::new(config);
        let mut pages = ScriptedPages::default().with_page("https://a.test/", "<main></main>");
        let model = ScriptedModel::new(vec![Ok("[]".to_string())]);

        let result = orchestrator.run(&mut pages, &model).await;

        assert!(matches!(
            result,
            Err(RunError::NoEvents { attempted: 1, failed: 0 })
        ));
        let output = &orchestrator.config().output;
        let site_csv = std::fs::read_to_string(output.site_csv_path("chatt_library")).unwrap();
        assert_eq!(site_csv, "title,date,time,location,url,image_url\n");
        assert!(!output.combined_csv_path().exists());
    }

    #[tokio::test]
    async fn test_screenshot_requested_only_for_vision_models() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), &[("Chatt Library", "https://a.test/")]);
        let orchestrator = Orchestrator::new(config);

        let mut pages = ScriptedPages::default().with_page("https://a.test/", "<main>x</main>");
        let model = ScriptedModel::new(vec![Ok(JAZZ_NIGHT.to_string())]).with_vision(true);
        orchestrator.run(&mut pages, &model).await.unwrap();
        assert_eq!(pages.fetched, vec![("https://a.test/".to_string(), true)]);
        assert!(model.images()[0].is_some());

        let mut pages = ScriptedPages::default().with_page("https://a.test/", "<main>x</main>");
        let model = ScriptedModel::new(vec![Ok(JAZZ_NIGHT.to_string())]);
        orchestrator.run(&mut pages, &model).await.unwrap();
        assert_eq!(pages.fetched, vec![("https://a.test/".to_string(), false)]);
    }
}
