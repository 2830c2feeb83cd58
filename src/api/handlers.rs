//! HTTP request handlers

use super::types::{
    AnswerRequest, AnswerResponse, ErrorResponse, ModelsResponse, ReplayRequest, ReplayResponse,
};
use super::AppState;
use crate::oracle::LlmOracle;
use crate::runtime::{answer_question, AgentError, AgentErrorKind};
use crate::state_machine::{replay, ReplayError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/answer", post(answer))
        .route("/api/replay", post(replay_transcript))
        .route("/api/models", get(list_models))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Question answering
// ============================================================

async fn answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(AppError::BadRequest("Question is empty".to_string()));
    }

    let llm = match &req.model {
        Some(id) => state
            .llm_registry
            .get(id)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown model: {id}")))?,
        None => state.llm_registry.default().ok_or_else(|| {
            AppError::Unavailable(
                "No oracle model configured. Set GOOGLE_API_KEY, ANTHROPIC_API_KEY or LLM_GATEWAY."
                    .to_string(),
            )
        })?,
    };
    let model = llm.model_id().to_string();

    let answer = answer_question(
        &state.agent,
        LlmOracle::new(llm),
        &req.db_uri,
        &req.question,
        state.shutdown.child_token(),
    )
    .await?;

    Ok(Json(AnswerResponse {
        answer: answer.text,
        iterations: answer.iterations,
        model,
        transcript: req.include_transcript.then_some(answer.transcript),
    }))
}

// ============================================================
// Transcript replay
// ============================================================

async fn replay_transcript(
    State(state): State<AppState>,
    Json(req): Json<ReplayRequest>,
) -> Result<Json<ReplayResponse>, AppError> {
    // The dialect only shapes oracle requests, which replay never sends
    let context = state.agent.graph_context("SQL");
    let answer = replay(&context, &req.transcript)?;
    tracing::debug!(turns = req.transcript.len(), "Transcript replayed");
    Ok(Json(ReplayResponse {
        answer,
        turns: req.transcript.len(),
    }))
}

// ============================================================
// Model info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("sqlgraph ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Unavailable(String),
    Agent(AgentError),
    Replay(ReplayError),
}

impl From<AgentError> for AppError {
    fn from(e: AgentError) -> Self {
        AppError::Agent(e)
    }
}

impl From<ReplayError> for AppError {
    fn from(e: ReplayError) -> Self {
        AppError::Replay(e)
    }
}

fn agent_status(kind: &AgentErrorKind) -> StatusCode {
    match kind {
        AgentErrorKind::EmptyQuestion | AgentErrorKind::Connection(_) => StatusCode::BAD_REQUEST,
        AgentErrorKind::OracleUnavailable { .. }
        | AgentErrorKind::OracleProtocolViolation { .. } => StatusCode::BAD_GATEWAY,
        AgentErrorKind::IncompleteRun(_) | AgentErrorKind::IterationLimit(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AgentErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::new(msg))
            }
            AppError::Agent(e) => {
                let mut body = ErrorResponse::new(e.to_string());
                if let Some(stage) = e.stage {
                    body = body.at(stage.as_str());
                }
                (agent_status(&e.kind), body)
            }
            AppError::Replay(e) => {
                let mut body = ErrorResponse::new(e.to_string());
                if let Some(stage) = e.stage() {
                    body = body.at(stage.as_str());
                }
                (StatusCode::UNPROCESSABLE_ENTITY, body)
            }
        };

        (status, Json(body)).into_response()
    }
}
