//! OpenAI-compatible chat client: POST {base}/chat/completions, non-streaming.

use crate::llm::{GenerationError, Generator, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage {
    System { content: String },
    User { content: String },
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            timeout,
            client,
        }
    }

    fn request_body(&self, prompt: &Prompt) -> OpenAiChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(OpenAiMessage::System {
                content: prompt.system.clone(),
            });
        }
        messages.push(OpenAiMessage::User {
            content: prompt.body.clone(),
        });
        OpenAiChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        }
    }
}

fn response_text(data: OpenAiChatResponse) -> Result<String, GenerationError> {
    let content = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .ok_or_else(|| GenerationError::Malformed("no choices in response".to_string()))?
        .content
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(GenerationError::EmptyAnswer);
    }
    Ok(content)
}

#[async_trait]
impl Generator for OpenAiCompatClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GenerationError::Status(status.as_u16(), body));
        }
        let data: OpenAiChatResponse = res
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        response_text(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiCompatClient {
        OpenAiCompatClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1234/v1/".to_string(),
            "k".to_string(),
            "model-x".to_string(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn request_carries_system_and_user() {
        let prompt = Prompt {
            system: "sys".to_string(),
            body: "問題：q".to_string(),
        };
        let body = serde_json::to_value(client().request_body(&prompt)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "model-x",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "問題：q"}
                ],
                "stream": false
            })
        );
    }

    #[test]
    fn first_choice_content() {
        let data: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(data).unwrap(), "hi");
    }

    #[test]
    fn empty_choices_is_malformed() {
        let data: OpenAiChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(response_text(data), Err(GenerationError::Malformed(_))));
    }
}
