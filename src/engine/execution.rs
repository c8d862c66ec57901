//! # engine::execution
//!
//! **Execution Engine** — submits orders and supervises open positions
//! against their virtual stop-loss/take-profit levels.
//!
//! ## Lock discipline
//! The position map sits behind a single lock. The monitor path is
//! snapshot-then-act-then-commit: clone the map under the lock, release it,
//! talk to the gateway, then re-take the lock only to remove confirmed
//! closes. The lock is never held across a gateway call.
//!
//! Virtual stops avoid resting orders at the broker — which puts the whole
//! correctness burden on `monitor()` being called frequently. A stalled
//! monitor loop directly causes stop slippage.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::gateway::{MarketGateway, OrderRequest};
use crate::models::{CloseReason, Direction, Position, Signal};

pub struct ExecutionEngine {
    gateway: Arc<dyn MarketGateway>,
    positions: RwLock<HashMap<u64, Position>>,
    last_check_time: RwLock<Option<DateTime<Utc>>>,
    /// Minimum spacing between position polls.
    check_interval: Duration,
}

impl ExecutionEngine {
    pub fn new(gateway: Arc<dyn MarketGateway>, check_interval: Duration) -> Self {
        Self {
            gateway,
            positions: RwLock::new(HashMap::new()),
            last_check_time: RwLock::new(None),
            check_interval,
        }
    }

    // ─── Execute ──────────────────────────────────────────────────────────────

    /// Submit an order for `signal` and start supervising it.
    ///
    /// No retry here — the gateway owns bounded, idempotent retry. A gateway
    /// failure is logged and surfaced as a failed execution.
    pub async fn execute(
        &self,
        signal: &Signal,
        lots: f64,
        sl_points: f64,
        tp_points: f64,
    ) -> Result<Position, EngineError> {
        let tick = self.gateway.last_tick(&signal.symbol).await?;

        let point = match self.gateway.symbol_info(&signal.symbol).await {
            Ok(info) => info.point_or_default(&signal.symbol),
            Err(_) => crate::gateway::fallback_point(&signal.symbol),
        };

        // BUY pays the ask, SELL receives the bid.
        let (price, virtual_sl, virtual_tp) = match signal.direction {
            Direction::Buy => (
                tick.ask,
                tick.ask - point * sl_points,
                tick.ask + point * tp_points,
            ),
            Direction::Sell => (
                tick.bid,
                tick.bid + point * sl_points,
                tick.bid - point * tp_points,
            ),
            Direction::NoTrade => {
                return Err(EngineError::Execution(
                    "cannot execute a neutral signal".into(),
                ))
            }
        };

        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            action: signal.direction,
            volume: lots,
            price,
            // Stops are virtual — the broker never sees them.
            stop_loss: None,
            take_profit: None,
            client_id: uuid::Uuid::new_v4(),
        };

        let ticket = match self.gateway.submit_order(&request).await {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(symbol = %signal.symbol, error = %e, "order submission failed");
                return Err(e);
            }
        };

        let position = Position {
            ticket,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            volume: lots,
            entry_price: price,
            virtual_sl,
            virtual_tp,
            opened_at: Utc::now(),
        };

        self.positions.write().await.insert(ticket, position.clone());

        info!(
            ticket,
            symbol = %position.symbol,
            direction = ?position.direction,
            volume = lots,
            entry = price,
            sl = virtual_sl,
            tp = virtual_tp,
            "🚀 position opened with virtual stops"
        );

        Ok(position)
    }

    // ─── Monitor ──────────────────────────────────────────────────────────────

    /// Poll open positions against their virtual stops, closing breaches.
    ///
    /// Rate-limited internally, so calling once per worker iteration is
    /// cheap. Returns the positions closed this cycle. Positions that fail
    /// to close stay tracked and are re-evaluated next cycle.
    pub async fn monitor(&self) -> Vec<(Position, CloseReason)> {
        let now = Utc::now();
        {
            let last = self.last_check_time.read().await;
            if let Some(last) = *last {
                if now.signed_duration_since(last) < self.check_interval {
                    return Vec::new();
                }
            }
        }

        let snapshot: Vec<Position> = {
            let positions = self.positions.read().await;
            positions.values().cloned().collect()
        };

        let mut closed = Vec::new();
        for position in snapshot {
            let tick = match self.gateway.last_tick(&position.symbol).await {
                Ok(tick) => tick,
                Err(e) => {
                    debug!(ticket = position.ticket, error = %e, "no quote — skipping position");
                    continue;
                }
            };

            let Some(reason) = position.breach(tick.bid, tick.ask) else {
                continue;
            };

            match self.gateway.close_position(position.ticket).await {
                Ok(()) => {
                    self.positions.write().await.remove(&position.ticket);
                    info!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        reason = ?reason,
                        "position closed on virtual stop"
                    );
                    closed.push((position, reason));
                }
                Err(e) => {
                    // Still tracked — re-evaluated next cycle, never dropped.
                    warn!(ticket = position.ticket, error = %e, "close failed, keeping position tracked");
                }
            }
        }

        *self.last_check_time.write().await = Some(now);
        closed
    }

    // ─── Close All / Close Symbol ─────────────────────────────────────────────

    /// Request closure of every tracked position. Idempotent: positions that
    /// fail to close remain tracked for a subsequent call.
    pub async fn close_all(&self) -> bool {
        self.close_where(|_| true).await
    }

    /// Close every tracked position on one symbol (instrument removal).
    pub async fn close_symbol(&self, symbol: &str) -> bool {
        self.close_where(|p| p.symbol == symbol).await
    }

    async fn close_where(&self, keep: impl Fn(&Position) -> bool) -> bool {
        let snapshot: Vec<Position> = {
            let positions = self.positions.read().await;
            positions.values().filter(|p| keep(p)).cloned().collect()
        };

        let mut all_closed = true;
        for position in snapshot {
            match self.gateway.close_position(position.ticket).await {
                Ok(()) => {
                    self.positions.write().await.remove(&position.ticket);
                    info!(ticket = position.ticket, symbol = %position.symbol, "position closed");
                }
                Err(e) => {
                    warn!(ticket = position.ticket, error = %e, "failed to close position");
                    all_closed = false;
                }
            }
        }
        all_closed
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Snapshot of the supervised positions.
    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn open_count(&self) -> usize {
        self.positions.read().await.len()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
