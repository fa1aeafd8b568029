//! Minimal W3C WebDriver client over HTTP.
//!
//! Talks to a running driver server (e.g. `chromedriver --port=9515`) and
//! covers only the commands the page fetcher needs: session creation,
//! navigation, synchronous script execution, page source, screenshot and
//! session deletion.

use super::error::{BrowserError, Result};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

pub struct WebDriverSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverSession {
    /// Start a new headless browser session on the driver at `base_url`.
    pub async fn start(base_url: &str, browser_args: &[String], timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": browser_args }
                }
            }
        });

        let resp = client
            .post(format!("{base_url}/session"))
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let payload: Value = resp.json().await?;
        let session_id = session_id_from(status, payload)?;

        info!(%session_id, driver = %base_url, "Started WebDriver session");
        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/session/{}/{}", self.base_url, self.session_id, command)
    }

    async fn read_value(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status().as_u16();
        let payload: Value = resp.json().await?;
        unwrap_value(status, payload)
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        debug!(%url, "Navigating");
        let resp = self
            .client
            .post(self.endpoint("url"))
            .json(&json!({ "url": url }))
            .send()
            .await?;
        Self::read_value(resp).await.map(|_| ())
    }

    /// Run `script` synchronously in the page and return its result.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let resp = self
            .client
            .post(self.endpoint("execute/sync"))
            .json(&json!({ "script": script, "args": [] }))
            .send()
            .await?;
        Self::read_value(resp).await
    }

    pub async fn page_source(&self) -> Result<String> {
        let resp = self.client.get(self.endpoint("source")).send().await?;
        match Self::read_value(resp).await? {
            Value::String(html) => Ok(html),
            other => Err(BrowserError::Protocol(format!(
                "page source is not a string: {other}"
            ))),
        }
    }

    /// Viewport screenshot as a base64-encoded PNG.
    pub async fn screenshot(&self) -> Result<String> {
        let resp = self.client.get(self.endpoint("screenshot")).send().await?;
        match Self::read_value(resp).await? {
            Value::String(png) => Ok(png),
            _ => Err(BrowserError::Protocol(
                "screenshot is not a base64 string".to_string(),
            )),
        }
    }

    /// Delete the session, which quits the browser process.
    pub async fn close(self) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/session/{}", self.base_url, self.session_id))
            .send()
            .await?;
        Self::read_value(resp).await?;
        info!(session_id = %self.session_id, "Closed WebDriver session");
        Ok(())
    }
}

/// Extract the `value` member of a WebDriver response, turning error payloads
/// (`{"value": {"error": ..., "message": ...}}`) into [`BrowserError::Api`].
pub(crate) fn unwrap_value(status: u16, payload: Value) -> Result<Value> {
    let mut payload = payload;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    let error_code = value.get("error").and_then(Value::as_str);
    if !(200..300).contains(&status) || error_code.is_some() {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(BrowserError::Api {
            status,
            message: format!("{}: {}", error_code.unwrap_or("unknown error"), message),
        });
    }
    Ok(value)
}

/// Session id from a new-session response; accepts both the W3C shape
/// (`value.sessionId`) and the legacy top-level `sessionId`.
pub(crate) fn session_id_from(status: u16, payload: Value) -> Result<String> {
    let legacy = payload
        .get("sessionId")
        .and_then(Value::as_str)
        .map(String::from);
    let value = unwrap_value(status, payload)?;
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(String::from)
        .or(legacy)
        .ok_or_else(|| BrowserError::Protocol("new session response has no sessionId".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_value_success() {
        let payload = json!({ "value": "<html></html>" });
        assert_eq!(unwrap_value(200, payload).unwrap(), json!("<html></html>"));
    }

    #[test]
    fn test_unwrap_value_null_for_void_commands() {
        let payload = json!({ "value": null });
        assert_eq!(unwrap_value(200, payload).unwrap(), Value::Null);
    }

    #[test]
    fn test_unwrap_value_error_payload() {
        let payload = json!({
            "value": {
                "error": "unknown error",
                "message": "net::ERR_NAME_NOT_RESOLVED",
                "stacktrace": ""
            }
        });
        match unwrap_value(500, payload) {
            Err(BrowserError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert!(message.contains("ERR_NAME_NOT_RESOLVED"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_session_id_w3c_shape() {
        let payload = json!({ "value": { "sessionId": "abc123", "capabilities": {} } });
        assert_eq!(session_id_from(200, payload).unwrap(), "abc123");
    }

    #[test]
    fn test_session_id_legacy_shape() {
        let payload = json!({ "sessionId": "legacy42", "status": 0, "value": {} });
        assert_eq!(session_id_from(200, payload).unwrap(), "legacy42");
    }

    #[test]
    fn test_session_id_missing() {
        let payload = json!({ "value": {} });
        assert!(matches!(
            session_id_from(200, payload),
            Err(BrowserError::Protocol(_))
        ));
    }
}
