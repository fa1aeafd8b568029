use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("WebDriver error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        BrowserError::Network(err.to_string())
    }
}
