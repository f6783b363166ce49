//! HTTP routes and handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use modelcheck_core::{ValidationRequest, ValidationResult};
use serde_json::json;
use tracing::{info, warn};

use crate::queue::QueueError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/v1/models/validate", post(validate_model))
        .fallback(fallback)
        .with_state(state)
}

/// Healthy while the worker runs and the scratch root is writable
async fn health_check(State(state): State<AppState>) -> Result<&'static str, AppError> {
    if !state.queue.is_running() {
        return Err(AppError::Unavailable(QueueError::Stopped.to_string()));
    }

    state.scratch.probe().await.map_err(|e| {
        warn!("Health probe failed: {}", e);
        AppError::Unavailable(format!("scratch storage is unusable: {}", e))
    })?;

    Ok("OK")
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// Validate one model artifact
///
/// Every decodable request gets a `200` with the verdict, including requests
/// whose artifact could not be fetched or unpacked.
async fn validate_model(
    State(state): State<AppState>,
    payload: Result<Json<ValidationRequest>, JsonRejection>,
) -> Result<Json<ValidationResult>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    info!(
        "Received validation request for {} ({}, {} bytes)",
        request.url, request.model_family, request.declared_size_bytes
    );
    metrics::counter!("modelcheck_requests_total").increment(1);

    let result = state.queue.submit(request).await?;
    Ok(Json(result))
}

async fn fallback() -> AppError {
    AppError::NotFound
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    InvalidRequest(String),
    Unavailable(String),
    NotFound,
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request_error", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", "Not found".to_string()),
        };

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
