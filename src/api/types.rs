// src/api/types.rs
// Request and response bodies for the interview endpoints

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

use super::error::{ApiError, ApiResult};
use crate::session::{FieldValue, Persona};

/// Body of POST /api/interview/start. An empty body starts an undeclared session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub seed_data: Option<BTreeMap<String, FieldValue>>,
}

impl StartRequest {
    /// Parse the declared persona; unknown names are a client error
    pub fn persona(&self) -> ApiResult<Option<Persona>> {
        match self.persona.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<Persona>()
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("unknown persona '{}'", raw))),
        }
    }
}

/// Body of POST /api/interview/answer. Fields are checked by the orchestrator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
    pub timestamp: String,
}

/// Decode a JSON body. Blank bodies decode to the default value so that
/// missing fields surface as validation errors, not parse errors.
pub fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}
