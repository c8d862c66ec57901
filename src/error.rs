//! # error
//!
//! Centralised error types.
//!
//! [`EngineError`] is the component-level taxonomy: every variant maps to a
//! propagation policy (fatal to start, skip-cycle, surfaced execution
//! failure, fail-fast configuration). Worker loops branch on these as
//! ordinary values — they are never allowed to unwind a worker.
//!
//! [`AppError`] wraps engine errors at the HTTP boundary. Axum's
//! `IntoResponse` impl converts them into structured JSON error bodies so
//! callers always get a machine-readable response even on failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ─── EngineError ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Gateway connect/login failure or a broken gateway call.
    /// Fatal to `start()`; no background retry beyond the bounded attempts
    /// made inside the gateway itself.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Order submit/close failed after the gateway exhausted its bounded
    /// retries. Surfaced as a failed execution, never as a panic.
    #[error("execution error: {0}")]
    Execution(String),

    /// A tick or symbol metadata was missing for this cycle. The worker
    /// skips the cycle; no retry, no position action.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Invalid risk/trading parameters. Fails fast at initialization,
    /// before any worker is spawned.
    #[error("configuration error: {0}")]
    Config(String),
}

// ─── AppError ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested resource (e.g. an unknown symbol) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Engine(err) => {
                let status = match err {
                    EngineError::Gateway(_) | EngineError::Execution(_) => StatusCode::BAD_GATEWAY,
                    EngineError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, err.to_string())
            }
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
