//! Context retrieval: keyword search or direct page fetch, normalized into a context block.
//!
//! Retrieval is best-effort. Callers treat any [`RetrievalError`] as "no context available"
//! and keep going with the query alone.

mod links;
mod reader;
mod tavily;
mod web;

use async_trait::async_trait;

pub use links::same_domain_links;
pub use reader::PageReader;
pub use tavily::TavilySearch;
pub use web::WebRetriever;

/// What to retrieve: search results for a keyword, or the content behind a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalMode {
    Search(String),
    Fetch(String),
}

impl RetrievalMode {
    /// Keyword or URL being retrieved.
    pub fn target(&self) -> &str {
        match self {
            RetrievalMode::Search(k) => k,
            RetrievalMode::Fetch(u) => u,
        }
    }
}

/// One piece of retrieved text with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSource {
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: String,
}

impl ContextSource {
    fn render(&self) -> String {
        let origin = match (self.title.as_deref(), self.url.as_deref()) {
            (Some(t), Some(u)) => Some(format!("{} ({})", t, u)),
            (Some(t), None) => Some(t.to_string()),
            (None, Some(u)) => Some(u.to_string()),
            (None, None) => None,
        };
        match origin {
            Some(o) => format!("來源: {}\n內容: {}", o, self.text.trim()),
            None => format!("內容: {}", self.text.trim()),
        }
    }
}

/// Text obtained for one request, in retrieval order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedContext {
    pub sources: Vec<ContextSource>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(|s| s.text.trim().is_empty())
    }

    /// Render all sources as one annotated block, blank-line separated. Untruncated.
    pub fn render(&self) -> String {
        self.sources
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(ContextSource::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Joined source text, used for the knowledge-store write-back.
    pub fn plain_text(&self) -> String {
        self.sources
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval timed out")]
    Timeout,
    #[error("retrieval service returned HTTP {0}")]
    Status(u16),
    #[error("retrieved body too short ({0} chars)")]
    TooShort(usize),
    #[error("retrieval request failed: {0}")]
    Request(String),
    #[error("retrieval response malformed: {0}")]
    Decode(String),
    #[error("retrieval returned no results")]
    Empty,
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RetrievalError::Timeout
        } else if e.is_decode() {
            RetrievalError::Decode(e.to_string())
        } else {
            RetrievalError::Request(e.to_string())
        }
    }
}

/// Fetches context for a query. Implementations must bound every network call with a timeout.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, mode: &RetrievalMode) -> Result<RetrievedContext, RetrievalError>;
}
