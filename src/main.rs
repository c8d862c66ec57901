//! # Tickdrive — Real-Time Tick-to-Order Decision Engine
//!
//! ```text
//!  ┌─────────────┐  GET /tick/{symbol}        ┌──────────────────────────────┐
//!  │  Broker     │ ◀───────────────────────── │ StrategyCoordinator          │
//!  │  Bridge     │  POST /order/send          │ ├─ TickBuffer per symbol     │
//!  └─────────────┘ ◀───────────────────────── │ ├─ FeatureExtractor          │
//!                                              │ ├─ SignalGenerator           │
//!  ┌─────────────┐  ws://host/ws/monitor       │ ├─ RiskManager      🛡️       │
//!  │  Dashboard  │ ◀────────────────────────── │ ├─ ExecutionEngine           │
//!  └─────────────┘  GET  /api/monitor/*        │ │   (virtual SL/TP)          │
//!                   POST /api/engine/*         │ └─ equity sampler            │
//!                                              └──────────────────────────────┘
//! ```
//!
//! The coordinator is constructed once here and handed to the HTTP layer by
//! reference — no global instance.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod config;
mod engine;
mod error;
mod events;
mod gateway;
mod models;
mod routes;
mod state;

use auth::require_api_key;
use config::Settings;
use engine::coordinator::StrategyCoordinator;
use gateway::HttpGateway;
use routes::{
    engine::{add_symbol, close_all, remove_symbol, start_engine, stop_engine},
    monitor::{get_account, get_equity, get_positions, get_stats, health_check, ws_monitor},
};
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("tickdrive=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║          TICKDRIVE — Decision Engine                  ║
  ║  Tick · Feature · Signal · Risk · Virtual Stops       ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Settings (fail fast on bad parameters) ─────────────────────────────
    let settings = Settings::from_env();
    settings.validate()?;

    // ── 4. Gateway + Coordinator ──────────────────────────────────────────────
    let gateway = Arc::new(HttpGateway::new(
        settings.gateway_base_url.clone(),
        Duration::from_millis(settings.gateway_timeout_ms),
        settings.gateway_max_retries,
        Duration::from_millis(settings.gateway_retry_delay_ms),
    ));

    let bind_addr = settings.bind_addr.clone();
    let coordinator = Arc::new(StrategyCoordinator::new(settings, gateway));

    if std::env::var("AUTO_START").map(|v| v == "1" || v == "true").unwrap_or(false) {
        coordinator.start().await?;
    }

    let state = build_state(coordinator.clone());

    // ── 5. CORS ───────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ── 6. Router ─────────────────────────────────────────────────────────────
    let app = Router::new()
        // ── Control ───────────────────────────────────────────────────────────
        .route("/api/engine/start",     post(start_engine))
        .route("/api/engine/stop",      post(stop_engine))
        .route("/api/engine/symbols",   post(add_symbol))
        .route("/api/engine/symbols/:symbol", delete(remove_symbol))
        .route("/api/engine/close-all", post(close_all))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/ws/monitor",           get(ws_monitor))
        .route("/api/monitor/positions", get(get_positions))
        .route("/api/monitor/account",  get(get_account))
        .route("/api/monitor/equity",   get(get_equity))
        .route("/api/monitor/stats",    get(get_stats))
        .route("/health",               get(health_check))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(axum::middleware::from_fn(require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    let addr: SocketAddr = bind_addr.parse()?;
    info!(?addr, "🚀 tickdrive server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 8. Drain: workers down, positions closed, gateway disconnected ────────
    coordinator.stop().await;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("⏹ shutdown signal received");
}
