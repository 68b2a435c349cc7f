//! Answer generation: prompt construction and chat-service clients.
//!
//! Two backends: AnythingLLM workspace chat (default) and any OpenAI-compatible
//! `/chat/completions` endpoint with a fixed model id.

mod anything_llm;
mod openai_compat;
pub mod prompt;

use crate::config::{GenerationSettings, GenerationTarget};
use async_trait::async_trait;
use std::sync::Arc;

pub use anything_llm::AnythingLlmClient;
pub use openai_compat::OpenAiCompatClient;
pub use prompt::{Prompt, PromptBuilder, Turn};

/// Fixed lead-in of every user-visible generation failure.
pub const GENERATION_FAILURE_PHRASE: &str = "抱歉，AI 服務暫時無法回答";

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("chat service timed out")]
    Timeout,
    #[error("chat service returned HTTP {0}: {1}")]
    Status(u16, String),
    #[error("chat service response malformed: {0}")]
    Malformed(String),
    #[error("chat service rejected the request: {0}")]
    Rejected(String),
    #[error("chat service request failed: {0}")]
    Request(String),
    #[error("chat service returned an empty answer")]
    EmptyAnswer,
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else if e.is_decode() {
            GenerationError::Malformed(e.to_string())
        } else {
            GenerationError::Request(e.to_string())
        }
    }
}

impl GenerationError {
    /// Short reason in the conversation language, embedded in the failure text.
    pub fn user_detail(&self) -> String {
        match self {
            GenerationError::Timeout => "連線逾時".to_string(),
            GenerationError::Status(code, _) => format!("服務回應錯誤 {}", code),
            GenerationError::Malformed(_) => "回應格式錯誤".to_string(),
            GenerationError::Rejected(reason) => format!("請求被拒絕：{}", reason),
            GenerationError::Request(_) => "無法連線到 AI 服務".to_string(),
            GenerationError::EmptyAnswer => "AI 沒有回傳內容".to_string(),
        }
    }
}

/// Result of the generation step. Failure still yields text via [`AnswerOutcome::text`].
#[derive(Debug, Clone)]
pub enum AnswerOutcome {
    Answered(String),
    Failed(GenerationError),
}

impl AnswerOutcome {
    pub fn from_result(result: Result<String, GenerationError>) -> Self {
        match result {
            Ok(text) => AnswerOutcome::Answered(text),
            Err(e) => AnswerOutcome::Failed(e),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, AnswerOutcome::Answered(_))
    }

    /// User-visible answer; never empty.
    pub fn text(&self) -> String {
        match self {
            AnswerOutcome::Answered(text) => text.clone(),
            AnswerOutcome::Failed(e) => format!("{}。（{}）", GENERATION_FAILURE_PHRASE, e.user_detail()),
        }
    }
}

/// Sends a prompt to a chat service and returns the answer text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Build the generator for the configured backend.
pub fn build_generator(client: reqwest::Client, settings: &GenerationSettings) -> Arc<dyn Generator> {
    match &settings.target {
        GenerationTarget::AnythingLlm(a) => {
            log::info!("generation backend: anythingllm (workspace {})", a.workspace);
            Arc::new(AnythingLlmClient::new(client, a, settings.timeout))
        }
        GenerationTarget::Openai {
            base_url,
            api_key,
            model,
        } => {
            log::info!("generation backend: openai-compatible (model {})", model);
            Arc::new(OpenAiCompatClient::new(
                client,
                base_url.clone(),
                api_key.clone(),
                model.clone(),
                settings.timeout,
            ))
        }
    }
}
