//! Tavily search backend.

use async_trait::async_trait;
use avs_core::error::ResearchError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::backend::{ResearchBackend, classify_status, classify_transport, describe, empty_answer, http_client};

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

pub struct TavilyBackend {
    api_key: Option<String>,
    url: String,
    client: reqwest::Client,
}

impl TavilyBackend {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            url: TAVILY_SEARCH_URL.to_string(),
            client: http_client(timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily's synthesized answer, else the result snippets one per line.
fn extract_answer(response: SearchResponse) -> Option<String> {
    if let Some(answer) = response.answer.filter(|a| !a.trim().is_empty()) {
        return Some(answer);
    }
    let snippets: Vec<String> = response
        .results
        .into_iter()
        .filter(|hit| !hit.content.trim().is_empty())
        .map(|hit| format!("- {} ({}): {}", hit.title, hit.url, hit.content.trim()))
        .collect();
    if snippets.is_empty() {
        None
    } else {
        Some(snippets.join("\n"))
    }
}

#[async_trait]
impl ResearchBackend for TavilyBackend {
    fn name(&self) -> &str {
        "tavily"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<String, ResearchError> {
        let Some(api_key) = &self.api_key else {
            return Err(ResearchError::NotConfigured(self.name().to_string()));
        };

        debug!("Sending Tavily search request");
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&json!({ "query": query, "include_answer": true }))
            .send()
            .await
            .map_err(|e| classify_transport(self.name(), e))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.name(), status, &body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| empty_answer(self.name(), &format!("200: unreadable response: {}", describe(e))))?;

        extract_answer(parsed).ok_or_else(|| empty_answer(self.name(), "200: no answer or results."))
    }
}
