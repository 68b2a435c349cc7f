//! Page-reader client: `GET {base}/{target_url}` returns the page as Markdown-ish text.

use crate::retrieval::RetrievalError;
use crate::text::char_len;
use std::time::Duration;

const DEFAULT_READER_BASE: &str = "https://r.jina.ai";

#[derive(Clone)]
pub struct PageReader {
    client: reqwest::Client,
    base: String,
    api_key: Option<String>,
    timeout: Duration,
    min_body_chars: usize,
}

impl PageReader {
    pub fn new(
        client: reqwest::Client,
        base: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
        min_body_chars: usize,
    ) -> Self {
        let base = base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_READER_BASE.to_string());
        Self {
            client,
            base,
            api_key,
            timeout,
            min_body_chars,
        }
    }

    /// Fetch `url` through the reader. Anything but HTTP 200 with a body of at least
    /// `min_body_chars` chars is an error.
    pub async fn fetch(&self, url: &str) -> Result<String, RetrievalError> {
        let endpoint = format!("{}/{}", self.base, url);
        let mut req = self
            .client
            .get(&endpoint)
            .header(reqwest::header::ACCEPT, "text/plain")
            .timeout(self.timeout);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        let status = res.status();
        if status != reqwest::StatusCode::OK {
            return Err(RetrievalError::Status(status.as_u16()));
        }
        let body = res.text().await?;
        let len = char_len(body.trim());
        if len < self.min_body_chars {
            return Err(RetrievalError::TooShort(len));
        }
        Ok(body)
    }
}

/// Title from reader output (`Title: ...` header line), if present.
pub(crate) fn reader_title(body: &str) -> Option<String> {
    body.lines()
        .take(5)
        .find_map(|l| l.strip_prefix("Title:"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
