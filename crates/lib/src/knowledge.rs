//! Knowledge-store write-back: push fetched context into the AnythingLLM workspace as a
//! raw-text document, then embed it. Best-effort; callers only log the outcome.

use crate::config::KnowledgeSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// A document to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    pub title: String,
    pub url: Option<String>,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("knowledge store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("knowledge store api error: {0}")]
    Api(String),
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn store(&self, doc: &KnowledgeDocument) -> Result<(), KnowledgeError>;
}

/// AnythingLLM document API (`/api/v1/document/raw-text` + `update-embeddings`).
#[derive(Clone)]
pub struct AnythingLlmKnowledgeStore {
    base_url: String,
    api_key: String,
    workspace: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RawTextResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    documents: Vec<UploadedDocument>,
}

#[derive(Debug, Deserialize)]
struct UploadedDocument {
    location: Option<String>,
}

impl AnythingLlmKnowledgeStore {
    pub fn new(client: reqwest::Client, settings: &KnowledgeSettings) -> Self {
        Self {
            base_url: settings.anything_llm.base_url.trim_end_matches('/').to_string(),
            api_key: settings.anything_llm.api_key.clone(),
            workspace: settings.anything_llm.workspace.clone(),
            timeout: settings.timeout,
            client,
        }
    }

    async fn upload_raw_text(&self, doc: &KnowledgeDocument) -> Result<String, KnowledgeError> {
        let url = format!("{}/api/v1/document/raw-text", self.base_url);
        let mut metadata = serde_json::json!({ "title": doc.title });
        if let Some(ref source) = doc.url {
            metadata["docSource"] = serde_json::Value::String(source.clone());
        }
        let body = serde_json::json!({
            "textContent": doc.text,
            "metadata": metadata,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(KnowledgeError::Api(format!("raw-text upload failed: {} {}", status, body)));
        }
        let data: RawTextResponse = res.json().await?;
        uploaded_location(data)
    }

    async fn embed(&self, location: &str) -> Result<(), KnowledgeError> {
        let url = format!(
            "{}/api/v1/workspace/{}/update-embeddings",
            self.base_url, self.workspace
        );
        let body = serde_json::json!({ "adds": [location], "deletes": [] });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(KnowledgeError::Api(format!("update-embeddings failed: {} {}", status, body)));
        }
        Ok(())
    }
}

fn uploaded_location(data: RawTextResponse) -> Result<String, KnowledgeError> {
    if !data.success {
        return Err(KnowledgeError::Api(
            data.error.unwrap_or_else(|| "upload not successful".to_string()),
        ));
    }
    data.documents
        .into_iter()
        .find_map(|d| d.location)
        .ok_or_else(|| KnowledgeError::Api("upload returned no document location".to_string()))
}

#[async_trait]
impl KnowledgeStore for AnythingLlmKnowledgeStore {
    async fn store(&self, doc: &KnowledgeDocument) -> Result<(), KnowledgeError> {
        let location = self.upload_raw_text(doc).await?;
        self.embed(&location).await?;
        log::debug!("knowledge: stored {} as {}", doc.title, location);
        Ok(())
    }
}
