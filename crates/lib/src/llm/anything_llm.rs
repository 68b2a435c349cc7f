//! AnythingLLM workspace chat client (`POST /api/v1/workspace/{slug}/chat`).

use crate::config::AnythingLlmSettings;
use crate::llm::{GenerationError, Generator, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct AnythingLlmClient {
    base_url: String,
    api_key: String,
    workspace: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WorkspaceChatRequest<'a> {
    message: &'a str,
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceChatResponse {
    #[serde(default)]
    text_response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AnythingLlmClient {
    pub fn new(client: reqwest::Client, settings: &AnythingLlmSettings, timeout: Duration) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            workspace: settings.workspace.clone(),
            timeout,
            client,
        }
    }

    /// Send one chat message in "chat" mode and return `textResponse`.
    pub async fn chat(&self, message: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/v1/workspace/{}/chat", self.base_url, self.workspace);
        let body = WorkspaceChatRequest {
            message,
            mode: "chat",
        };
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
            return Err(GenerationError::Status(status.as_u16(), body));
        }
        let data: WorkspaceChatResponse = res
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        chat_response_text(data)
    }
}

fn chat_response_text(data: WorkspaceChatResponse) -> Result<String, GenerationError> {
    if let Some(err) = data.error.filter(|e| !e.trim().is_empty()) {
        return Err(GenerationError::Rejected(err));
    }
    match data.text_response {
        Some(text) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(GenerationError::EmptyAnswer),
        None => Err(GenerationError::Malformed("missing textResponse".to_string())),
    }
}

#[async_trait]
impl Generator for AnythingLlmClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        self.chat(&prompt.full_text()).await
    }
}
