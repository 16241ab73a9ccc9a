//! The research backend trait and shared HTTP failure classification.

use async_trait::async_trait;
use avs_core::error::ResearchError;
use std::time::Duration;

/// A single web research backend.
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    /// Name used in logs and failure details (e.g. `gemini-2.5-flash`).
    fn name(&self) -> &str;

    /// Whether the backend has the credential it needs.
    fn is_configured(&self) -> bool;

    /// Answer `query`. A blank answer must be reported as `Rejected`.
    async fn search(&self, query: &str) -> Result<String, ResearchError>;
}

const MAX_BODY_IN_DETAIL: usize = 300;

/// Map a non-success HTTP status to a research error.
///
/// 429 and 5xx are transient; every other status is final for this backend.
pub fn classify_status(backend: &str, status: u16, body: &str) -> ResearchError {
    let detail = if status == 429 {
        "429: Too Many Requests (Rate Limit)".to_string()
    } else {
        format!("{status}: {}", truncate(body.trim(), MAX_BODY_IN_DETAIL))
    };

    if status == 429 || (500..600).contains(&status) {
        ResearchError::Transient {
            backend: backend.to_string(),
            detail,
        }
    } else {
        ResearchError::Rejected {
            backend: backend.to_string(),
            detail,
        }
    }
}

/// Connection failures and timeouts are always worth another attempt.
pub fn classify_transport(backend: &str, error: reqwest::Error) -> ResearchError {
    ResearchError::Transient {
        backend: backend.to_string(),
        detail: format!("Connection/Timeout: {}", describe(error)),
    }
}

/// Render a `reqwest` error without its request URL, which may carry a
/// credential.
pub(crate) fn describe(error: reqwest::Error) -> String {
    error.without_url().to_string()
}

pub(crate) fn empty_answer(backend: &str, detail: &str) -> ResearchError {
    ResearchError::Rejected {
        backend: backend.to_string(),
        detail: detail.to_string(),
    }
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
