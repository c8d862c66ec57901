//! # routes::monitor
//!
//! Read-only endpoints plus the WebSocket event stream.
//!
//! | Method    | Path                     | Description                       |
//! |-----------|--------------------------|-----------------------------------|
//! | GET (WS)  | `/ws/monitor`            | Real-time event stream            |
//! | GET       | `/api/monitor/positions` | Supervised positions snapshot     |
//! | GET       | `/api/monitor/account`   | Broker account info               |
//! | GET       | `/api/monitor/equity`    | Equity curve (optional `?n=`)     |
//! | GET       | `/api/monitor/stats`     | tick/trade counters, risk status  |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::error::AppError;
use crate::state::SharedState;

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket, then forward every broadcast event as a JSON
/// text frame.
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.coordinator.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // Current snapshot first, so a client never starts blind.
    let snapshot = {
        let positions = state.coordinator.open_positions().await;
        let running = state.coordinator.is_running().await;
        json!({
            "event":     "SNAPSHOT",
            "running":   running,
            "positions": positions,
            "symbols":   state.coordinator.symbols().await,
        })
        .to_string()
    };

    if sender.send(Message::Text(snapshot.into())).await.is_err() {
        return; // client closed before the snapshot went out
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── REST Monitoring Endpoints ────────────────────────────────────────────────

pub async fn get_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let positions = state.coordinator.open_positions().await;
    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "positions": positions,
    }))
}

pub async fn get_account(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.coordinator.account_info().await?;
    Ok(Json(json!({
        "ok":      true,
        "account": account,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EquityQuery {
    pub n: Option<usize>,
}

pub async fn get_equity(
    State(state): State<SharedState>,
    Query(query): Query<EquityQuery>,
) -> impl IntoResponse {
    let points = state.coordinator.equity_history(query.n).await;
    Json(json!({
        "ok":     true,
        "count":  points.len(),
        "points": points,
    }))
}

pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    Json(json!({
        "ok":             true,
        "running":        coordinator.is_running().await,
        "symbols":        coordinator.symbols().await,
        "tick_count":     coordinator.tick_count.load(Ordering::Relaxed),
        "trade_count":    coordinator.trade_count.load(Ordering::Relaxed),
        "open_positions": coordinator.open_positions().await.len(),
        "risk":           coordinator.risk_status().await,
    }))
}

// ─── GET /health ──────────────────────────────────────────────────────────────

pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":      true,
        "running": state.coordinator.is_running().await,
    }))
}
