// src/generation/openai_compat.rs
// Client for OpenAI-compatible chat completion endpoints

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Generation, GenerationError, PromptContext, TextGenerator};

const DEFAULT_MAX_TOKENS: u32 = 200;
const DEFAULT_TEMPERATURE: f32 = 0.4;
/// Retries on 429 and 5xx responses
const MAX_RETRIES: u32 = 1;
const BASE_BACKOFF: Duration = Duration::from_millis(250);
/// Rough token estimate when the provider omits usage
const CHARS_PER_TOKEN: u64 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Chat-completions client with Bearer auth
pub struct OpenAiCompatGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post_with_retry(&self, request_id: &str, body: String) -> Result<String, GenerationError> {
        let url = self.endpoint();
        let mut attempts = 0;
        let mut backoff = BASE_BACKOFF;

        loop {
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }

            let error_body = response.text().await.unwrap_or_default();
            if attempts < MAX_RETRIES && (status.as_u16() == 429 || status.is_server_error()) {
                warn!(
                    request_id = %request_id,
                    status = %status,
                    error = %error_body,
                    "Transient provider error, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempts += 1;
                backoff *= 2;
                continue;
            }

            return Err(GenerationError::Provider(format!(
                "API error {}: {}",
                status, error_body
            )));
        }
    }
}

/// Extract the completion text and token usage from a response body
fn parse_response(body: &str, prompt_chars: usize) -> Result<Generation, GenerationError> {
    let data: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(format!("failed to parse body: {}", e)))?;

    let text = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let (input_tokens, output_tokens) = match data.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (
            (prompt_chars as u64).div_ceil(CHARS_PER_TOKEN),
            (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN),
        ),
    };
    if text.is_empty() {
        return Err(GenerationError::EmptyCompletion {
            input_tokens,
            output_tokens,
        });
    }

    Ok(Generation {
        text,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl TextGenerator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn generate(&self, context: &PromptContext) -> Result<Generation, GenerationError> {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let messages = context.messages();
        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| GenerationError::InvalidResponse(format!("failed to encode request: {}", e)))?;

        debug!(
            request_id = %request_id,
            model = %self.model,
            prompt_chars,
            "Follow-up generation request"
        );

        let response_body = self.post_with_retry(&request_id, body).await?;
        let generation = parse_response(&response_body, prompt_chars)?;

        info!(
            request_id = %request_id,
            model = %self.model,
            prompt_tokens = generation.input_tokens,
            completion_tokens = generation.output_tokens,
            duration_ms = start.elapsed().as_millis() as u64,
            "Follow-up generation complete"
        );
        Ok(generation)
    }
}
