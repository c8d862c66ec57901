//! # gateway
//!
//! **Market Gateway** — the broker boundary.
//!
//! The engine consumes the [`MarketGateway`] trait only; [`HttpGateway`] is
//! the production implementation, talking to an EA-style HTTP bridge next to
//! the broker terminal.
//!
//! ## Bridge API contract
//! The bridge must expose:
//! ```text
//! POST /connect            → { "ok": true }
//! POST /disconnect         → { "ok": true }
//! GET  /account            → AccountInfo JSON
//! GET  /positions          → [BrokerPosition, ...]
//! GET  /symbol/{symbol}    → SymbolInfo JSON
//! GET  /tick/{symbol}      → Tick JSON
//! POST /order/send         → { "retcode": 10009, "order": 123456, "comment": "..." }
//! POST /order/close        → { "retcode": 10009, ... }
//! ```
//! retcode 10009 = `TRADE_RETCODE_DONE` (the only success code).
//!
//! Submit/close retry a bounded number of times with a fixed delay; the
//! `client_id` on each order makes a duplicate delivery rejectable on the
//! bridge side. The rest of the engine never retries on top of this.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Direction, Tick};

/// The only bridge return code treated as success.
pub const RETCODE_DONE: u32 = 10009;

// ─── Gateway Data Types ───────────────────────────────────────────────────────

/// Account snapshot as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub profit: f64,
}

/// A broker-side open position, as reported by the bridge.
///
/// Used by the risk manager for exposure checks; the engine's own
/// [`crate::models::Position`] map is the authority for virtual stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub volume: f64,
    /// Unrealized profit in account currency.
    pub profit: f64,
}

/// Per-symbol trading metadata.
///
/// `point` and `tick_value` are optional because not every bridge supplies
/// them; consumers fall back to naming-convention defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub point: Option<f64>,
    #[serde(default)]
    pub tick_value: Option<f64>,
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
}

impl SymbolInfo {
    /// Point size, falling back to the quote-currency convention:
    /// JPY-quoted pairs use 0.01, everything else 0.0001.
    pub fn point_or_default(&self, symbol: &str) -> f64 {
        self.point
            .unwrap_or_else(|| fallback_point(symbol))
    }
}

/// Point size for a symbol when the gateway supplies no metadata.
pub fn fallback_point(symbol: &str) -> f64 {
    if symbol.to_ascii_uppercase().ends_with("JPY") {
        0.01
    } else {
        0.0001
    }
}

/// Broker lot bounds used when symbol metadata is unavailable.
pub fn fallback_symbol_info(bid: f64, ask: f64) -> SymbolInfo {
    SymbolInfo {
        bid,
        ask,
        point: None,
        tick_value: None,
        min_lot: 0.01,
        max_lot: 100.0,
        lot_step: 0.01,
    }
}

/// Payload sent to the bridge order endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: Direction,
    pub volume: f64,
    pub price: f64,
    /// Broker-side stop-loss. Always `None` here — stops are virtual.
    pub stop_loss: Option<f64>,
    /// Broker-side take-profit. Always `None` here — stops are virtual.
    pub take_profit: Option<f64>,
    /// Idempotency key: the bridge rejects a duplicate `client_id` so a
    /// retried delivery cannot double-fill.
    pub client_id: Uuid,
}

/// Response from the bridge order endpoints.
#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub retcode: u32,
    /// Broker ticket (present when retcode = 10009 on submit).
    pub order: Option<u64>,
    pub comment: Option<String>,
}

// ─── MarketGateway Trait ──────────────────────────────────────────────────────

/// Broker connectivity contract consumed by the engine.
///
/// Implementations must be safe for concurrent calls from multiple workers
/// (or serialize internally).
#[async_trait]
pub trait MarketGateway: Send + Sync {
    async fn connect(&self) -> Result<(), EngineError>;
    async fn disconnect(&self);
    async fn account_info(&self) -> Result<AccountInfo, EngineError>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>, EngineError>;
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError>;
    async fn last_tick(&self, symbol: &str) -> Result<Tick, EngineError>;
    /// Submit a market order. Returns the broker ticket.
    async fn submit_order(&self, request: &OrderRequest) -> Result<u64, EngineError>;
    async fn close_position(&self, ticket: u64) -> Result<(), EngineError>;
}

// ─── HttpGateway ──────────────────────────────────────────────────────────────

/// HTTP implementation of [`MarketGateway`] against an EA-style bridge.
///
/// `base_url == "mock"` switches every call to a local simulation — useful
/// for development without a broker terminal (tickets come from a process
/// counter, quotes are flat).
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    mock_ticket: AtomicU64,
}

impl HttpGateway {
    pub fn new(
        base_url: String,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
            max_retries,
            retry_delay,
            mock_ticket: AtomicU64::new(1),
        }
    }

    #[inline]
    fn is_mock(&self) -> bool {
        self.base_url == "mock"
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("bridge unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::Gateway(format!("bridge HTTP {status} on {path}")));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("bridge response parse error: {e}")))
    }

    /// POST an order payload with bounded retry and fixed backoff.
    ///
    /// Retries cover transport failures and non-DONE retcodes alike; the
    /// payload (with its `client_id`) is identical on every attempt.
    async fn post_order<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<BridgeResponse, EngineError> {
        let url = format!("{}{path}", self.base_url);
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            let sent = self
                .client
                .post(&url)
                .json(body)
                .timeout(self.timeout)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    let parsed: Result<BridgeResponse, _> = response.json().await;
                    match parsed {
                        Ok(resp) if resp.retcode == RETCODE_DONE => return Ok(resp),
                        Ok(resp) => {
                            last_error = format!(
                                "bridge rejected: retcode={} comment={}",
                                resp.retcode,
                                resp.comment.as_deref().unwrap_or("unknown")
                            );
                            warn!(attempt, max = self.max_retries, "{last_error}");
                        }
                        Err(e) => {
                            last_error = format!("bridge response parse error: {e}");
                            error!(attempt, "{last_error}");
                        }
                    }
                }
                Ok(response) => {
                    last_error = format!("bridge HTTP {} on {path}", response.status());
                    warn!(attempt, "{last_error}");
                }
                Err(e) => {
                    last_error = format!("bridge unreachable: {e}");
                    warn!(attempt, "{last_error}");
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(EngineError::Execution(format!(
            "{path} failed after {} attempts: {last_error}",
            self.max_retries
        )))
    }

    fn mock_account(&self) -> AccountInfo {
        AccountInfo {
            balance: 10_000.0,
            equity: 10_000.0,
            margin: 0.0,
            free_margin: 10_000.0,
            profit: 0.0,
        }
    }
}

#[async_trait]
impl MarketGateway for HttpGateway {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.is_mock() {
            info!("🎭 gateway running in MOCK mode — no broker attached");
            return Ok(());
        }

        let url = format!("{}/connect", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("bridge unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Gateway(format!(
                "bridge connect failed: HTTP {}",
                response.status()
            )));
        }

        info!(base_url = %self.base_url, "gateway connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.is_mock() {
            return;
        }
        // Best effort — shutdown must not hang on a dead bridge.
        let url = format!("{}/disconnect", self.base_url);
        if let Err(e) = self.client.post(&url).timeout(self.timeout).send().await {
            warn!(error = %e, "bridge disconnect failed");
        }
    }

    async fn account_info(&self) -> Result<AccountInfo, EngineError> {
        if self.is_mock() {
            return Ok(self.mock_account());
        }
        self.get_json("/account").await
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, EngineError> {
        if self.is_mock() {
            return Ok(Vec::new());
        }
        self.get_json("/positions").await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError> {
        if self.is_mock() {
            let mut info = fallback_symbol_info(1.1000, 1.1001);
            info.point = Some(fallback_point(symbol));
            info.tick_value = Some(10.0);
            return Ok(info);
        }
        self.get_json(&format!("/symbol/{symbol}")).await
    }

    async fn last_tick(&self, symbol: &str) -> Result<Tick, EngineError> {
        if self.is_mock() {
            return Ok(Tick {
                bid: 1.1000,
                ask: 1.1001,
                volume: 1.0,
                time: Utc::now(),
            });
        }
        self.get_json(&format!("/tick/{symbol}"))
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("no tick for {symbol}: {e}")))
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<u64, EngineError> {
        if self.is_mock() {
            let ticket = self.mock_ticket.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol = %request.symbol,
                action = ?request.action,
                volume = request.volume,
                ticket,
                "🎭 mock order accepted"
            );
            return Ok(ticket);
        }

        let response = self.post_order("/order/send", request).await?;
        let ticket = response
            .order
            .ok_or_else(|| EngineError::Execution("bridge accepted order without ticket".into()))?;

        info!(
            symbol = %request.symbol,
            action = ?request.action,
            volume = request.volume,
            price  = request.price,
            ticket,
            "✅ bridge accepted order"
        );
        Ok(ticket)
    }

    async fn close_position(&self, ticket: u64) -> Result<(), EngineError> {
        if self.is_mock() {
            info!(ticket, "🎭 mock position closed");
            return Ok(());
        }

        self.post_order("/order/close", &serde_json::json!({ "ticket": ticket }))
            .await?;
        info!(ticket, "position closed at bridge");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────


// ─── Test Support ─────────────────────────────────────────────────────────────
