//! Local model API interaction with bounded exponential-backoff retries.
//!
//! This module talks to a locally hosted generative-model server exposing
//! `GET /tags` (installed models) and `POST /generate` (non-streaming
//! completion with optional base64 images).
//!
//! # Architecture
//!
//! - [`Generate`]: Core trait defining async text generation
//! - [`OllamaClient`]: HTTP implementation with model availability check and fallback
//! - [`RetryGenerate`]: Decorator that retries transient failures of any `Generate`
//!
//! # Retry Strategy
//!
//! - Only transient failures are retried (network, timeout, HTTP 429 and 5xx)
//! - Exponential backoff from the configured base delay, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use crate::config::ModelConfig;
use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("model API error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode model API response: {0}")]
    Decode(String),
}

impl ModelError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::Timeout(_) => true,
            ModelError::Status { status, .. } => *status == 429 || *status >= 500,
            ModelError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout(err.to_string())
        } else if err.is_decode() {
            ModelError::Decode(err.to_string())
        } else {
            ModelError::Network(err.to_string())
        }
    }
}

/// Trait for async text generation.
///
/// Implementors send a prompt (and optionally one base64-encoded image) to a
/// model and return its raw text response.
pub trait Generate {
    /// Name of the model requests are sent to.
    fn model(&self) -> &str;

    /// Whether [`Generate::generate`] will forward an image to the model.
    fn supports_images(&self) -> bool;

    /// Send `prompt` to the model and return the raw response text.
    async fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Pick the model to use given what the endpoint reports as installed.
///
/// Returns the preferred model when installed, otherwise the first installed
/// entry of `fallbacks`, otherwise `None`.
pub fn select_model<'a>(
    preferred: &'a str,
    available: &[String],
    fallbacks: &'a [String],
) -> Option<&'a str> {
    if available.iter().any(|m| m == preferred) {
        return Some(preferred);
    }
    fallbacks
        .iter()
        .find(|f| available.contains(*f))
        .map(String::as_str)
}

/// HTTP client for a local Ollama-style model server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    vision_markers: Vec<String>,
}

impl fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OllamaClient {
    /// Build a client without contacting the endpoint.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            vision_markers: config.vision_markers.clone(),
        })
    }

    /// Build a client and resolve the model against the endpoint's registry.
    ///
    /// An unreachable endpoint or a missing model never fails construction:
    /// the problem is logged and the configured model name is kept unless a
    /// fallback is installed.
    #[instrument(level = "info", skip_all, fields(endpoint = %config.endpoint, model = %config.model))]
    pub async fn connect(config: &ModelConfig) -> Result<Self, ModelError> {
        let mut client = Self::new(config)?;

        match client.list_models().await {
            Ok(available) => {
                match select_model(&config.model, &available, &config.fallback_models) {
                    Some(chosen) if chosen == config.model => {
                        info!(model = %chosen, "Model is available");
                    }
                    Some(chosen) => {
                        warn!(
                            requested = %config.model,
                            ?available,
                            "Model not found; install it with `ollama pull {}`",
                            config.model
                        );
                        info!(model = %chosen, "Falling back to installed model");
                        client.model = chosen.to_string();
                    }
                    None => {
                        warn!(
                            requested = %config.model,
                            ?available,
                            fallbacks = ?config.fallback_models,
                            "Model not found and no fallback model installed; requests will likely fail"
                        );
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Could not reach model API; is the model server running?");
            }
        }

        Ok(client)
    }

    /// Names of the models installed on the endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let url = format!("{}/tags", self.base_url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

impl Generate for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        self.vision_markers
            .iter()
            .any(|marker| self.model.contains(marker.as_str()))
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, ModelError> {
        let url = format!("{}/generate", self.base_url);
        let images = image.filter(|_| self.supports_images()).map(|img| vec![img]);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            images,
        };

        let t0 = Instant::now();
        let response = self.http.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis(),
                "Model API returned an error"
            );
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        info!(
            elapsed_ms = t0.elapsed().as_millis(),
            response_bytes = parsed.response.len(),
            "Model generation finished"
        );
        Ok(parsed.response)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Generate`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryGenerate<T> {
    /// The underlying client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryGenerate<T>
where
    T: Generate,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift);
        delay.min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryGenerate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryGenerate")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Generate for RetryGenerate<T>
where
    T: Generate,
{
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_images(&self) -> bool {
        self.inner.supports_images()
    }

    #[instrument(level = "debug", skip_all)]
    async fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, ModelError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.generate(prompt, image).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            transient = e.is_transient(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "generate() giving up"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.delay_for(attempt) + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "generate() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_model_prefers_configured() {
        let available = names(&["llava:latest", "mistral:latest"]);
        let fallbacks = names(&["mistral:latest"]);
        assert_eq!(
            select_model("llava:latest", &available, &fallbacks),
            Some("llava:latest")
        );
    }

    #[test]
    fn test_select_model_uses_first_installed_fallback() {
        let available = names(&["phi3:latest", "llama3:latest"]);
        let fallbacks = names(&["mistral:latest", "llama3:latest", "phi3:latest"]);
        assert_eq!(
            select_model("llava:latest", &available, &fallbacks),
            Some("llama3:latest")
        );
    }

    #[test]
    fn test_select_model_none_available() {
        let available = names(&["gemma:2b"]);
        let fallbacks = names(&["mistral:latest"]);
        assert_eq!(select_model("llava:latest", &available, &fallbacks), None);
    }

    /// Serve a single `200 OK` JSON response on a local port; returns the API base URL.
    async fn serve_json_once(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/api")
    }

    #[tokio::test]
    async fn test_connect_unreachable_endpoint_keeps_configured_model() {
        let config = ModelConfig {
            endpoint: "http://127.0.0.1:1/api".to_string(),
            ..ModelConfig::default()
        };
        let client = OllamaClient::connect(&config).await.unwrap();
        assert_eq!(client.model(), "llava:latest");
        assert!(client.supports_images());
    }

    #[tokio::test]
    async fn test_connect_switches_to_installed_fallback() {
        let endpoint = serve_json_once(r#"{"models":[{"name":"phi3:latest"}]}"#).await;
        let config = ModelConfig {
            endpoint,
            ..ModelConfig::default()
        };
        let client = OllamaClient::connect(&config).await.unwrap();
        assert_eq!(client.model(), "phi3:latest");
        assert!(!client.supports_images());
    }

    #[tokio::test]
    async fn test_connect_keeps_installed_model() {
        let endpoint =
            serve_json_once(r#"{"models":[{"name":"mistral:latest"},{"name":"llava:latest"}]}"#)
                .await;
        let config = ModelConfig {
            endpoint,
            ..ModelConfig::default()
        };
        let client = OllamaClient::connect(&config).await.unwrap();
        assert_eq!(client.model(), "llava:latest");
    }

    #[test]
    fn test_supports_images_by_marker() {
        let mut config = ModelConfig::default();
        let client = OllamaClient::new(&config).unwrap();
        assert!(client.supports_images());

        config.model = "mistral:latest".to_string();
        let client = OllamaClient::new(&config).unwrap();
        assert!(!client.supports_images());
    }

    #[test]
    fn test_generate_request_omits_images_when_absent() {
        let request = GenerateRequest {
            model: "mistral:latest",
            prompt: "hi",
            stream: false,
            images: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert!(json.get("images").is_none());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::Network("x".into()).is_transient());
        assert!(ModelError::Timeout("x".into()).is_transient());
        assert!(ModelError::Status { status: 503, body: String::new() }.is_transient());
        assert!(ModelError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!ModelError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!ModelError::Decode("x".into()).is_transient());
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryGenerate::new(ScriptedModel::new(vec![]), 10, StdDuration::from_secs(1));
        assert_eq!(retry.delay_for(1), StdDuration::from_secs(1));
        assert_eq!(retry.delay_for(3), StdDuration::from_secs(4));
        assert_eq!(retry.delay_for(9), StdDuration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let inner = ScriptedModel::new(vec![
            Err(ModelError::Network("connection reset".into())),
            Ok("[]".to_string()),
        ]);
        let retry = RetryGenerate::new(inner, 2, StdDuration::from_millis(1));
        assert_eq!(retry.generate("p", None).await.unwrap(), "[]");
        assert_eq!(retry.inner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_failure() {
        let inner = ScriptedModel::new(vec![Err(ModelError::Status {
            status: 404,
            body: "model not found".into(),
        })]);
        let retry = RetryGenerate::new(inner, 3, StdDuration::from_millis(1));
        assert!(retry.generate("p", None).await.is_err());
        assert_eq!(retry.inner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let inner = ScriptedModel::new(vec![]);
        let retry = RetryGenerate::new(inner, 2, StdDuration::from_millis(1));
        assert!(retry.generate("p", None).await.is_err());
        assert_eq!(retry.inner.call_count(), 3);
    }
}
