//! Scripted stand-ins for the model and the browser.

use crate::api::{Generate, ModelError};
use crate::browser::{BrowserError, PageSource, Result as BrowserResult};
use crate::models::FetchedPage;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

/// Replays canned responses in order; fails with a network error once exhausted.
pub struct ScriptedModel {
    responses: RefCell<VecDeque<Result<String, ModelError>>>,
    calls: RefCell<Vec<(String, Option<String>)>>,
    vision: bool,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: RefCell::new(Vec::new()),
            vision: false,
        }
    }

    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Image argument of every call, in order.
    pub fn images(&self) -> Vec<Option<String>> {
        self.calls.borrow().iter().map(|(_, img)| img.clone()).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl Generate for ScriptedModel {
    fn model(&self) -> &str {
        if self.vision { "llava:latest" } else { "mistral:latest" }
    }

    fn supports_images(&self) -> bool {
        self.vision
    }

    async fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, ModelError> {
        self.calls
            .borrow_mut()
            .push((prompt.to_string(), image.map(String::from)));
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Network("script exhausted".to_string())))
    }
}

/// Serves fixed HTML per URL; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedPages {
    pages: HashMap<String, String>,
    pub fetched: Vec<(String, bool)>,
}

impl ScriptedPages {
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

impl PageSource for ScriptedPages {
    async fn fetch(&mut self, url: &str, capture_screenshot: bool) -> BrowserResult<FetchedPage> {
        self.fetched.push((url.to_string(), capture_screenshot));
        match self.pages.get(url) {
            Some(html) => Ok(FetchedPage {
                html: html.clone(),
                screenshot: capture_screenshot.then(|| "c2NyZWVuc2hvdA==".to_string()),
            }),
            None => Err(BrowserError::Api {
                status: 500,
                message: format!("unknown error: net::ERR_NAME_NOT_RESOLVED at {url}"),
            }),
        }
    }
}
