//! Default retriever: Tavily for keywords (one retry, then a search-page fallback through the
//! reader), the page reader for URLs (plus a few same-domain sub-pages).

use crate::config::RetrievalSettings;
use crate::retrieval::reader::reader_title;
use crate::retrieval::{
    same_domain_links, ContextSource, PageReader, RetrievalError, RetrievalMode, RetrievedContext,
    Retriever, TavilySearch,
};
use crate::text::truncate_chars;
use async_trait::async_trait;

const DEFAULT_FALLBACK_SEARCH_URL: &str = "https://html.duckduckgo.com/html/?q={query}";
const SEARCH_ATTEMPTS: usize = 2;

pub struct WebRetriever {
    search: TavilySearch,
    reader: PageReader,
    fallback_search_url: String,
    source_budget: usize,
    max_sub_links: usize,
}

impl WebRetriever {
    pub fn new(client: reqwest::Client, settings: &RetrievalSettings) -> Self {
        let search = TavilySearch::new(
            client.clone(),
            settings.search_endpoint.clone(),
            settings.search_api_key.clone(),
            settings.max_results,
            settings.timeout,
        );
        let reader = PageReader::new(
            client,
            settings.reader_base.clone(),
            settings.reader_api_key.clone(),
            settings.timeout,
            settings.min_body_chars,
        );
        Self {
            search,
            reader,
            fallback_search_url: settings
                .fallback_search_url
                .clone()
                .unwrap_or_else(|| DEFAULT_FALLBACK_SEARCH_URL.to_string()),
            source_budget: settings.source_budget,
            max_sub_links: settings.max_sub_links,
        }
    }

    fn clip(&self, mut source: ContextSource) -> ContextSource {
        source.text = truncate_chars(source.text.trim(), self.source_budget).to_string();
        source
    }

    async fn search_with_fallback(&self, keyword: &str) -> Result<RetrievedContext, RetrievalError> {
        let mut first_err = None;
        for attempt in 1..=SEARCH_ATTEMPTS {
            match self.search.search(keyword).await {
                Ok(sources) => {
                    return Ok(RetrievedContext {
                        sources: sources.into_iter().map(|s| self.clip(s)).collect(),
                    })
                }
                Err(e) => {
                    log::warn!("search attempt {} failed: {}", attempt, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        let fallback_url = fallback_url(&self.fallback_search_url, keyword);
        log::info!("search failed, falling back to {}", fallback_url);
        match self.reader.fetch(&fallback_url).await {
            Ok(body) => Ok(RetrievedContext {
                sources: vec![self.clip(ContextSource {
                    title: Some(format!("網路搜尋: {}", keyword)),
                    url: Some(fallback_url),
                    text: body,
                })],
            }),
            Err(e) => {
                log::warn!("search fallback failed: {}", e);
                Err(first_err.unwrap_or(e))
            }
        }
    }

    async fn fetch_with_sub_links(&self, url: &str) -> Result<RetrievedContext, RetrievalError> {
        let body = self.reader.fetch(url).await?;
        let links = same_domain_links(&body, url, self.max_sub_links);
        let mut sources = vec![self.clip(ContextSource {
            title: reader_title(&body),
            url: Some(url.to_string()),
            text: body,
        })];

        let fetches = links.iter().map(|link| self.reader.fetch(link));
        let results = futures_util::future::join_all(fetches).await;
        for (link, result) in links.iter().zip(results) {
            match result {
                Ok(sub) => sources.push(self.clip(ContextSource {
                    title: reader_title(&sub),
                    url: Some(link.clone()),
                    text: sub,
                })),
                Err(e) => log::debug!("sub-page {} skipped: {}", link, e),
            }
        }
        Ok(RetrievedContext { sources })
    }
}

/// Substitute the URL-encoded keyword into the fallback template.
fn fallback_url(template: &str, keyword: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
    template.replace("{query}", &encoded)
}

#[async_trait]
impl Retriever for WebRetriever {
    async fn retrieve(&self, mode: &RetrievalMode) -> Result<RetrievedContext, RetrievalError> {
        match mode {
            RetrievalMode::Search(keyword) => self.search_with_fallback(keyword).await,
            RetrievalMode::Fetch(url) => self.fetch_with_sub_links(url).await,
        }
    }
}
