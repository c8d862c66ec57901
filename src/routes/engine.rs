//! # routes::engine
//!
//! Control handlers — the operations the coordinator exposes upward.
//!
//! | Method | Path                          | Description                      |
//! |--------|-------------------------------|----------------------------------|
//! | POST   | `/api/engine/start`           | Connect + spawn workers          |
//! | POST   | `/api/engine/stop`            | Cooperative shutdown, close all  |
//! | POST   | `/api/engine/symbols`         | Add an instrument                |
//! | DELETE | `/api/engine/symbols/:symbol` | Remove an instrument             |
//! | POST   | `/api/engine/close-all`       | Force-close every position       |

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::state::SharedState;

// ─── POST /api/engine/start ───────────────────────────────────────────────────

pub async fn start_engine(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let started = state.coordinator.start().await?;
    Ok(Json(json!({
        "ok":      true,
        "started": started,
        "running": true,
    })))
}

// ─── POST /api/engine/stop ────────────────────────────────────────────────────

pub async fn stop_engine(State(state): State<SharedState>) -> impl IntoResponse {
    state.coordinator.stop().await;
    Json(json!({
        "ok":      true,
        "running": false,
    }))
}

// ─── POST /api/engine/symbols ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddSymbolRequest {
    pub symbol: String,
}

pub async fn add_symbol(
    State(state): State<SharedState>,
    Json(request): Json<AddSymbolRequest>,
) -> Result<impl IntoResponse, AppError> {
    let symbol = request.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(AppError::BadRequest("symbol must not be empty".into()));
    }

    let added = state.coordinator.add_instrument(&symbol).await?;
    Ok(Json(json!({
        "ok":     true,
        "symbol": symbol,
        "added":  added,
    })))
}

// ─── DELETE /api/engine/symbols/{symbol} ──────────────────────────────────────

pub async fn remove_symbol(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let removed = state.coordinator.remove_instrument(&symbol).await?;
    if !removed {
        return Err(AppError::NotFound(format!("unknown symbol {symbol}")));
    }
    Ok(Json(json!({
        "ok":     true,
        "symbol": symbol,
    })))
}

// ─── POST /api/engine/close-all ───────────────────────────────────────────────

pub async fn close_all(State(state): State<SharedState>) -> impl IntoResponse {
    let all_closed = state.coordinator.close_all_positions().await;
    Json(json!({
        "ok":         all_closed,
        "all_closed": all_closed,
    }))
}
