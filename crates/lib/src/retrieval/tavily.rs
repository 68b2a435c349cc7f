//! Tavily search client.

use crate::retrieval::{ContextSource, RetrievalError};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Clone)]
pub struct TavilySearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
}

impl TavilySearch {
    pub fn new(
        client: reqwest::Client,
        endpoint: Option<String>,
        api_key: String,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            max_results: max_results.clamp(1, 20),
            timeout,
        }
    }

    /// POST the query; results without content are dropped. No usable result is [`RetrievalError::Empty`].
    pub async fn search(&self, query: &str) -> Result<Vec<ContextSource>, RetrievalError> {
        let body = serde_json::json!({
            "query": query,
            "search_depth": "advanced",
            "max_results": self.max_results,
            "include_answer": false,
            "include_raw_content": false,
        });
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }
        let parsed: TavilySearchResponse = res.json().await?;
        let sources: Vec<ContextSource> = parsed
            .results
            .into_iter()
            .filter_map(|r| {
                let text = r.content?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(ContextSource {
                    title: r.title.filter(|t| !t.trim().is_empty()),
                    url: r.url,
                    text,
                })
            })
            .collect();
        if sources.is_empty() {
            return Err(RetrievalError::Empty);
        }
        Ok(sources)
    }
}
