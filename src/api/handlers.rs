// src/api/handlers.rs
// Interview endpoint handlers: parse, delegate to the orchestrator, serialize

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiResult;
use super::types::{AnswerRequest, CompleteRequest, HealthResponse, StartRequest, parse_body};
use crate::budget::BudgetSummary;
use crate::orchestrator::{AnswerOutcome, CompletionOutcome, SessionStatus, StartOutcome};
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.orchestrator.store().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn start_interview(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<StartOutcome>> {
    let request: StartRequest = parse_body(&body)?;
    let persona = request.persona()?;
    let outcome = state
        .orchestrator
        .start(persona, request.seed_data.unwrap_or_default())?;
    Ok(Json(outcome))
}

pub async fn answer_question(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<AnswerOutcome>> {
    let request: AnswerRequest = parse_body(&body)?;
    let session_id = request.session_id.unwrap_or_default();
    debug!(session_id = %session_id, question_id = ?request.question_id, "Answer received");

    let outcome = state
        .orchestrator
        .answer(
            &session_id,
            request.question_id.as_deref().unwrap_or_default(),
            request.answer.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn complete_interview(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<CompletionOutcome>> {
    let request: CompleteRequest = parse_body(&body)?;
    let outcome = state
        .orchestrator
        .complete(request.session_id.as_deref().unwrap_or_default())?;
    Ok(Json(outcome))
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStatus>> {
    Ok(Json(state.orchestrator.status(&session_id)?))
}

pub async fn budget_summary(State(state): State<Arc<AppState>>) -> Json<BudgetSummary> {
    Json(state.orchestrator.budget())
}
