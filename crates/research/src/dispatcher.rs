//! Research dispatcher: ordered backend chain with retry and backoff.
//!
//! Each configured backend gets up to `max_attempts` tries. Only transient
//! failures are retried, sleeping `base_delay * 2^attempt` between tries.
//! A rejected request, or a backend that keeps failing, hands over to the
//! next one. Unconfigured backends are skipped without a request.

use avs_config::ResearchConfig;
use avs_core::error::ResearchError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::ResearchBackend;
use crate::gemini::GeminiBackend;
use crate::tavily::TavilyBackend;

pub struct ResearchDispatcher {
    backends: Vec<Arc<dyn ResearchBackend>>,
    max_attempts: u32,
    base_delay: Duration,
    request_timeout: Duration,
}

impl ResearchDispatcher {
    /// A dispatcher with no backends and the default retry policy.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Build the standard chain: each configured Gemini model, then Tavily.
    pub fn from_config(config: &ResearchConfig) -> Self {
        let timeout = config.request_timeout();
        let mut dispatcher = Self::new()
            .with_retry(config.max_attempts, config.backoff_base())
            .with_request_timeout(timeout);

        for model in &config.gemini_models {
            dispatcher = dispatcher.add(Arc::new(GeminiBackend::new(
                model.clone(),
                config.gemini_api_key.clone(),
                timeout,
            )));
        }
        if config.tavily_enabled {
            dispatcher = dispatcher.add(Arc::new(TavilyBackend::new(
                config.tavily_api_key.clone(),
                timeout,
            )));
        }
        dispatcher
    }

    /// Append a backend to the chain.
    pub fn add(mut self, backend: Arc<dyn ResearchBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Backend names in chain order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Whether any backend has a credential.
    pub fn has_configured_backend(&self) -> bool {
        self.backends.iter().any(|b| b.is_configured())
    }

    /// Research `query`, returning the answer or the failure sentinel text.
    pub async fn research(&self, query: &str) -> String {
        match self.try_research(query).await {
            Ok(answer) => answer,
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Research `query`. Fails only with [`ResearchError::Exhausted`].
    pub async fn try_research(&self, query: &str) -> Result<String, ResearchError> {
        let mut tried: Vec<&str> = Vec::new();
        let mut last_detail: Option<String> = None;

        for backend in &self.backends {
            let name = backend.name();
            if !backend.is_configured() {
                debug!(backend = %name, "Research backend not configured, skipping");
                continue;
            }
            tried.push(name);

            for attempt in 0..self.max_attempts {
                info!(
                    backend = %name,
                    attempt = attempt + 1,
                    max_attempts = self.max_attempts,
                    "Research: trying backend"
                );

                let outcome = tokio::time::timeout(self.request_timeout, backend.search(query))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ResearchError::Transient {
                            backend: name.to_string(),
                            detail: format!(
                                "Connection/Timeout: no answer within {}s",
                                self.request_timeout.as_secs()
                            ),
                        })
                    });

                match outcome {
                    Ok(answer) => {
                        info!(backend = %name, chars = answer.len(), "Research succeeded");
                        return Ok(answer);
                    }
                    Err(e) => {
                        let retry = e.is_transient() && attempt + 1 < self.max_attempts;
                        warn!(backend = %name, error = %e, retry, "Research attempt failed");
                        last_detail = Some(e.to_string());
                        if !retry {
                            break;
                        }
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        if tried.is_empty() {
            return Err(ResearchError::Exhausted {
                backends: "none".to_string(),
                detail: "no research backend configured".to_string(),
            });
        }

        Err(ResearchError::Exhausted {
            backends: tried.join(", "),
            detail: last_detail.unwrap_or_else(|| "No attempts made.".to_string()),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for ResearchDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
