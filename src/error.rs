// src/error.rs
// Error taxonomy for the interview engine

use thiserror::Error;

use crate::generation::GenerationError;

/// Main error type for the interview engine
#[derive(Error, Debug)]
pub enum InterviewError {
    /// Unknown or expired session id. Clients recover by restarting.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Missing or malformed turn fields
    #[error("invalid request: {0}")]
    Validation(String),

    /// A patch tried to consume a follow-up past the session allowance
    #[error("follow-up limit reached: {used}/{max}")]
    FollowUpLimit { used: u32, max: u32 },

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("question bank error: {0}")]
    QuestionBank(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience type alias for Result using InterviewError
pub type Result<T> = std::result::Result<T, InterviewError>;

impl InterviewError {
    /// Whether this error may cross the HTTP boundary as a client failure.
    ///
    /// Everything else is absorbed with a degraded fallback.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::Validation(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
