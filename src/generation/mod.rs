// src/generation/mod.rs
// Text-generation port used to write dynamic follow-up questions

mod openai_compat;

pub use openai_compat::{ChatMessage, OpenAiCompatGenerator};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::SignalResult;
use crate::session::{Block, Persona};

#[derive(Error, Debug)]
pub enum GenerationError {
    /// Provider rejected or failed the request
    #[error("provider error: {0}")]
    Provider(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// Provider answered but the body was unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Provider answered with no text but still billed the call
    #[error("empty completion ({input_tokens} input, {output_tokens} output tokens)")]
    EmptyCompletion {
        input_tokens: u64,
        output_tokens: u64,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GenerationError {
    /// Tokens the provider charged for even though the call failed
    pub fn billed_usage(&self) -> Option<(u64, u64)> {
        match self {
            Self::EmptyCompletion {
                input_tokens,
                output_tokens,
            } => Some((*input_tokens, *output_tokens)),
            _ => None,
        }
    }
}

/// A token-accounted completion
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Everything the generator may use to phrase a follow-up
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub persona: Persona,
    pub block: Block,
    pub question_text: String,
    pub answer_text: String,
    pub signal: SignalResult,
    pub covered_topics: Vec<String>,
    pub missing_topics: Vec<String>,
}

impl PromptContext {
    pub fn system_prompt(&self) -> String {
        format!(
            "You are interviewing a {} respondent about AI readiness in software delivery. \
             Write exactly one short, open follow-up question. Do not add commentary.",
            self.persona
        )
    }

    pub fn user_prompt(&self) -> String {
        let mut prompt = format!(
            "Interview phase: {}\nQuestion: {}\nAnswer: {}\nDetected signal: {} ({})",
            self.block,
            self.question_text,
            self.answer_text.trim(),
            self.signal.category,
            self.signal.evidence.join(", "),
        );
        if !self.covered_topics.is_empty() {
            prompt.push_str(&format!("\nAlready covered: {}", self.covered_topics.join(", ")));
        }
        if !self.missing_topics.is_empty() {
            prompt.push_str(&format!(
                "\nNot yet covered, prefer these: {}",
                self.missing_topics.join(", ")
            ));
        }
        prompt
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_prompt()),
        ]
    }
}

/// External text-completion service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn generate(&self, context: &PromptContext) -> Result<Generation, GenerationError>;
}

/// Generator used when no provider is configured; the engine falls back to
/// pool questions on every turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _context: &PromptContext) -> Result<Generation, GenerationError> {
        Err(GenerationError::Provider("generation disabled".to_string()))
    }
}
