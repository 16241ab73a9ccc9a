//! Gemini backend with Google Search grounding.
//!
//! One backend per model, so the dispatcher's ordered chain doubles as the
//! model fallback list.

use async_trait::async_trait;
use avs_core::error::ResearchError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::backend::{ResearchBackend, classify_status, classify_transport, describe, empty_answer, http_client};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The key travels in a header so it never appears in a request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiBackend {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: GEMINI_BASE_URL.to_string(),
            client: http_client(timeout),
        }
    }

    /// Point the backend at a different endpoint root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(query: &str) -> serde_json::Value {
        json!({
            "contents": [{ "parts": [{ "text": query }] }],
            "tools": [{ "google_search": {} }]
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// The text of the first part of the first candidate.
fn extract_answer(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
        .filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl ResearchBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<String, ResearchError> {
        let Some(api_key) = &self.api_key else {
            return Err(ResearchError::NotConfigured(self.model.clone()));
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, "Sending grounded research request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key.as_str())
            .json(&Self::request_body(query))
            .send()
            .await
            .map_err(|e| classify_transport(&self.model, e))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(&self.model, status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| empty_answer(&self.model, &format!("200: unreadable response: {}", describe(e))))?;

        extract_answer(parsed)
            .ok_or_else(|| empty_answer(&self.model, "200: Success but contained no candidates."))
    }
}
