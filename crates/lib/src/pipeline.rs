//! Request pipeline: validate input, retrieve context, build the prompt, generate the answer.
//!
//! The pipeline never fails past its boundary. Retrieval failure degrades to no context;
//! generation failure becomes a fixed apologetic answer. Both stay visible in [`PipelineOutcome`].

use crate::knowledge::KnowledgeDocument;
use crate::llm::{AnswerOutcome, Generator, Prompt, PromptBuilder, Turn};
use crate::retrieval::{RetrievalError, RetrievalMode, RetrievedContext, Retriever};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Inbound question as accepted by `POST /research`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Page to read; takes precedence over `keyword`.
    #[serde(default)]
    pub url: Option<String>,
    /// Search keyword.
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Set to false to answer from the query alone when no url/keyword is given.
    #[serde(default)]
    pub search: Option<bool>,
    /// Caller identifier, logged only.
    #[serde(default)]
    pub caller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("請提供 query、keyword 或 url 其中之一")]
    MissingInput,
    #[error("url 格式不正確：{0}")]
    InvalidUrl(String),
}

/// A validated question ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Short id for log correlation.
    pub id: String,
    pub query: String,
    /// None when retrieval is skipped.
    pub retrieval: Option<RetrievalMode>,
    pub history: Vec<Turn>,
    pub caller: Option<String>,
}

fn nonblank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl ResearchRequest {
    pub fn validate(self) -> Result<Question, InputError> {
        let query = nonblank(self.query);
        let url = nonblank(self.url);
        let keyword = nonblank(self.keyword);

        if let Some(ref u) = url {
            match url::Url::parse(u) {
                Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
                _ => return Err(InputError::InvalidUrl(u.clone())),
            }
        }

        let retrieval = match (&url, &keyword, &query) {
            (Some(u), _, _) => Some(RetrievalMode::Fetch(u.clone())),
            (None, Some(k), _) => Some(RetrievalMode::Search(k.clone())),
            (None, None, Some(q)) if self.search.unwrap_or(true) => Some(RetrievalMode::Search(q.clone())),
            (None, None, Some(_)) => None,
            (None, None, None) => return Err(InputError::MissingInput),
        };

        let query = match (query, keyword, url) {
            (Some(q), _, _) => q,
            (None, Some(k), _) => k,
            (None, None, Some(u)) => format!("請摘要並整理以下網頁的重點：{}", u),
            (None, None, None) => return Err(InputError::MissingInput),
        };

        Ok(Question {
            id: request_id(),
            query,
            retrieval,
            history: self.history,
            caller: nonblank(self.caller),
        })
    }
}

impl Question {
    /// A webhook text message: searched with its own text, no history.
    pub fn from_message(text: &str, caller: Option<String>) -> Result<Self, InputError> {
        ResearchRequest {
            query: Some(text.to_string()),
            caller,
            ..Default::default()
        }
        .validate()
    }
}

/// What happened in the retrieval step.
#[derive(Debug, Clone)]
pub enum ContextOutcome {
    Retrieved(RetrievedContext),
    /// Nothing to retrieve for this question.
    Skipped,
    Failed(RetrievalError),
}

impl ContextOutcome {
    pub fn context(&self) -> Option<&RetrievedContext> {
        match self {
            ContextOutcome::Retrieved(c) => Some(c),
            _ => None,
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub context: ContextOutcome,
    pub prompt: Prompt,
    pub answer: AnswerOutcome,
}

impl PipelineOutcome {
    /// The text returned to the user; never empty.
    pub fn report(&self) -> String {
        self.answer.text()
    }

    /// Document for the knowledge-store write-back, when context was retrieved.
    pub fn knowledge_document(&self, question: &Question) -> Option<KnowledgeDocument> {
        let ctx = self.context.context()?;
        let text = ctx.plain_text();
        if text.is_empty() {
            return None;
        }
        let (title, url) = match question.retrieval.as_ref()? {
            RetrievalMode::Fetch(u) => (
                ctx.sources
                    .first()
                    .and_then(|s| s.title.clone())
                    .unwrap_or_else(|| u.clone()),
                Some(u.clone()),
            ),
            RetrievalMode::Search(k) => (format!("搜尋：{}", k), None),
        };
        Some(KnowledgeDocument { title, url, text })
    }
}

/// Retriever + generator + prompt bounds, built once at startup.
#[derive(Clone)]
pub struct Pipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    prompts: PromptBuilder,
}

impl Pipeline {
    pub fn new(retriever: Arc<dyn Retriever>, generator: Arc<dyn Generator>, prompts: PromptBuilder) -> Self {
        Self {
            retriever,
            generator,
            prompts,
        }
    }

    pub async fn run(&self, question: &Question) -> PipelineOutcome {
        let context = match question.retrieval {
            Some(ref mode) => match self.retriever.retrieve(mode).await {
                Ok(ctx) if !ctx.is_empty() => {
                    log::info!("[{}] retrieved {} source(s) for {}", question.id, ctx.sources.len(), mode.target());
                    ContextOutcome::Retrieved(ctx)
                }
                Ok(_) => {
                    log::warn!("[{}] retrieval for {} returned no text", question.id, mode.target());
                    ContextOutcome::Failed(RetrievalError::Empty)
                }
                Err(e) => {
                    log::warn!("[{}] retrieval for {} failed, answering without context: {}", question.id, mode.target(), e);
                    ContextOutcome::Failed(e)
                }
            },
            None => ContextOutcome::Skipped,
        };

        let rendered = context.context().map(RetrievedContext::render);
        let prompt = self
            .prompts
            .build(&question.query, rendered.as_deref(), &question.history);

        let answer = AnswerOutcome::from_result(self.generator.generate(&prompt).await);
        match answer {
            AnswerOutcome::Answered(ref text) => {
                log::info!("[{}] answered ({} chars)", question.id, text.chars().count())
            }
            AnswerOutcome::Failed(ref e) => log::warn!("[{}] generation failed: {}", question.id, e),
        }

        PipelineOutcome {
            context,
            prompt,
            answer,
        }
    }
}
