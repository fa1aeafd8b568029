//! # Event Scout
//!
//! Collects local event listings from a registry of event websites, using a
//! headless browser to render each page and a locally hosted language model
//! to pull structured events out of the markup. Results are written as CSV
//! (one file per site plus a combined file) and optionally as an HTML table.
//!
//! ## Usage
//!
//! ```sh
//! chromedriver --port=9515 &
//! ollama serve &
//! event_scout --html
//! ```
//!
//! ## Architecture
//!
//! The application is a strictly sequential pipeline:
//! 1. **Fetching**: Render each site's page and scroll until it stops growing
//! 2. **Chunking**: Strip scripts/styles and split the markup to fit the model's context
//! 3. **Extraction**: Ask the model for a JSON array of events per chunk
//! 4. **Normalization**: Deduplicate by title, fill missing fields, normalize dates
//! 5. **Output**: Write per-site and combined CSV files, then the HTML report

use clap::Parser;
use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod browser;
mod chunker;
mod cli;
mod config;
mod extractor;
mod models;
mod orchestrator;
mod outputs;
#[cfg(test)]
mod test_support;
mod utils;

use api::{Generate, OllamaClient, RetryGenerate};
use browser::Browser;
use cli::Cli;
use config::AppConfig;
use orchestrator::{Orchestrator, SiteOutcome};
use outputs::html;
use utils::ensure_writable_dir;

/// Open the run log; an extraction run starts it fresh, other runs append.
fn open_run_log(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}

/// Console plus run-log file, both filtered by `RUST_LOG` (default `info`).
fn init_tracing(log_path: &Path, append: bool) -> Result<(), Box<dyn Error>> {
    let log_file = open_run_log(log_path, append)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());
    let file = tfmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

fn log_config_source(path: Option<&Path>, config: &AppConfig) {
    match path {
        Some(path) => info!(
            path = %path.display(),
            sites = config.sites.len(),
            "Loaded configuration"
        ),
        None => info!(
            sites = config.sites.len(),
            "No config file given; using built-in defaults"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_cli(&args)?;
    config.validate()?;

    ensure_writable_dir(&config.output.log_dir).await?;
    init_tracing(&config.output.run_log_path(), args.render_only)?;
    log_config_source(args.config.as_deref(), &config);

    let start_time = std::time::Instant::now();
    info!("event_scout starting up");
    debug!(?args, "Parsed CLI arguments");

    // Early check: ensure the data dir is writable before spending time on scraping
    if let Err(e) = ensure_writable_dir(&config.output.data_dir).await {
        error!(
            path = %config.output.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let combined_csv = config.output.combined_csv_path();
    let report_path = config.output.html_report_path();
    let report_title = config.output.report_title.clone();

    if args.render_only {
        let count = html::write_report(&combined_csv, &report_path, &report_title).await?;
        println!("Rendered {count} events to {}", report_path.display());
        return Ok(());
    }

    // ---- Model & browser ----
    let client = OllamaClient::connect(&config.model).await?;
    let model = RetryGenerate::new(
        client,
        config.model.max_retries,
        config.model.retry_base_delay(),
    );
    info!(
        model = %model.model(),
        multimodal = model.supports_images(),
        "Model client ready"
    );

    let mut browser = match Browser::launch(&config.browser).await {
        Ok(browser) => browser,
        Err(e) => {
            error!(
                driver = %config.browser.webdriver_url,
                error = %e,
                "Could not start browser; is the WebDriver server running?"
            );
            return Err(e.into());
        }
    };

    // ---- Extraction run ----
    let orchestrator = Orchestrator::new(config);
    info!(
        sites = orchestrator.config().sites.len(),
        "Starting AI-powered event extraction"
    );
    let outcome = orchestrator.run(&mut browser, &model).await;
    browser.close().await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Extraction run failed");
            return Err(e.into());
        }
    };

    for (site, result) in &summary.sites {
        match result {
            SiteOutcome::Extracted { events } => info!(%site, events, "Site done"),
            SiteOutcome::FetchFailed { error } => warn!(%site, %error, "Site failed"),
        }
    }
    println!("All events saved to {}", summary.combined_csv.display());

    // ---- HTML report ----
    if args.html {
        match html::write_report(&summary.combined_csv, &report_path, &report_title).await {
            Ok(count) => println!("Rendered {count} events to {}", report_path.display()),
            Err(e) => error!(path = %report_path.display(), error = %e, "Failed to write HTML report"),
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        total_events = summary.total_events,
        failed_sites = summary.failed_sites(),
        "Execution complete"
    );

    Ok(())
}
