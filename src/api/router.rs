// src/api/router.rs
// Route table for the interview API

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let interview = Router::new()
        .route("/start", post(handlers::start_interview))
        .route("/answer", post(handlers::answer_question))
        .route("/complete", post(handlers::complete_interview))
        .route("/{id}/status", get(handlers::session_status));

    let api = Router::new()
        .nest("/interview", interview)
        .route("/budget", get(handlers::budget_summary));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
