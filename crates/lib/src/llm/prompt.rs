//! Prompt construction.
//!
//! Layout (empty sections omitted, sections separated by a blank line):
//!
//! ```text
//! {system instruction}
//!
//! 對話紀錄：
//! 使用者: ...
//! 助理: ...
//!
//! 請根據以下參考資訊回答問題：
//! {context, truncated to the context budget}
//!
//! 問題：{query}
//! ```

use crate::config::GenerationSettings;
use crate::text::truncate_chars;
use serde::{Deserialize, Serialize};

const HISTORY_HEADER: &str = "對話紀錄：";
const CONTEXT_HEADER: &str = "請根據以下參考資訊回答問題：";
const QUESTION_LABEL: &str = "問題：";

/// One prior conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    fn label(&self) -> &str {
        match self.role.as_str() {
            "user" => "使用者",
            "assistant" => "助理",
            other => other,
        }
    }
}

/// The text sent to the chat service: a system instruction and the user-side body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub body: String,
}

impl Prompt {
    /// Single-message form for services that take one text field.
    pub fn full_text(&self) -> String {
        if self.system.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.system, self.body)
        }
    }
}

/// Builds prompts with fixed truncation bounds.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_instruction: String,
    history_window: usize,
    context_budget: usize,
}

impl PromptBuilder {
    pub fn new(system_instruction: impl Into<String>, history_window: usize, context_budget: usize) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            history_window,
            context_budget,
        }
    }

    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self::new(
            settings.system_instruction.clone(),
            settings.history_window,
            settings.context_budget,
        )
    }

    /// Keeps only the last `history_window` turns and the first `context_budget` chars of context.
    pub fn build(&self, query: &str, context: Option<&str>, history: &[Turn]) -> Prompt {
        let mut sections: Vec<String> = Vec::new();

        let start = history.len().saturating_sub(self.history_window);
        let lines: Vec<String> = history[start..]
            .iter()
            .filter(|t| !t.content.trim().is_empty())
            .map(|t| format!("{}: {}", t.label(), t.content.trim()))
            .collect();
        if !lines.is_empty() {
            sections.push(format!("{}\n{}", HISTORY_HEADER, lines.join("\n")));
        }

        if let Some(ctx) = context.map(str::trim).filter(|c| !c.is_empty()) {
            let ctx = truncate_chars(ctx, self.context_budget);
            sections.push(format!("{}\n{}", CONTEXT_HEADER, ctx));
        }

        sections.push(format!("{}{}", QUESTION_LABEL, query.trim()));

        Prompt {
            system: self.system_instruction.trim().to_string(),
            body: sections.join("\n\n"),
        }
    }
}
