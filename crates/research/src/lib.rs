//! Web research for AVS.
//!
//! A [`ResearchDispatcher`] walks an ordered list of [`ResearchBackend`]s:
//! every Gemini model (with Google Search grounding) in turn, then Tavily.
//! The first configured backend that answers wins. Rate limits, server
//! errors and timeouts are retried with exponential backoff; anything else
//! moves straight on to the next backend.

pub mod backend;
pub mod dispatcher;
pub mod gemini;
pub mod tavily;

#[cfg(test)]
pub(crate) mod test_server;

pub use backend::ResearchBackend;
pub use dispatcher::ResearchDispatcher;
pub use gemini::GeminiBackend;
pub use tavily::TavilyBackend;
