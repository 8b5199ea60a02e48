use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use moodscope_core::AnalysisError;
use moodscope_model::RunnerHealth;
use moodscope_schema::{AnalyzeRequest, AnalyzeResponse};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .route("/warmup", get(warmup))
}

/// Error body returned to callers. Internal detail (model identifiers,
/// backend messages) stays in the logs.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_index: Option<usize>,
}

fn error_response(err: AnalysisError) -> (StatusCode, Json<ErrorBody>) {
    match err {
        AnalysisError::Validation {
            reason,
            message_index,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: reason,
                stage: None,
                message_index,
            }),
        ),
        AnalysisError::ModelUnavailable { message } => {
            tracing::error!("model unavailable: {message}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: "analysis models are not available".to_string(),
                    stage: None,
                    message_index: None,
                }),
            )
        }
        AnalysisError::Inference { stage, message } => {
            tracing::error!("inference failure during {stage}: {message}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "inference failed".to_string(),
                    stage: Some(stage),
                    message_index: None,
                }),
            )
        }
        AnalysisError::Timeout { elapsed_ms } => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorBody {
                error: format!("analysis timed out after {elapsed_ms} ms"),
                stage: None,
                message_index: None,
            }),
        ),
    }
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, Json<ErrorBody>)> {
    state
        .analyzer
        .analyze(&request)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub accelerator: RunnerHealth,
}

/// Never fails: reports process status and accelerator placement even while
/// weights are missing.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        accelerator: state.analyzer.health(),
    })
}

#[derive(Debug, Serialize)]
pub struct WarmupResponse {
    pub status: &'static str,
    pub models_ready: bool,
}

/// Idempotent: loads weights on first call, verifies readiness on every
/// call.
async fn warmup(
    State(state): State<AppState>,
) -> Result<Json<WarmupResponse>, (StatusCode, Json<ErrorBody>)> {
    state
        .analyzer
        .warm_up()
        .await
        .map(|_| {
            Json(WarmupResponse {
                status: "warmed_up",
                models_ready: true,
            })
        })
        .map_err(error_response)
}
