//! # engine::risk
//!
//! **Risk Manager** — the last gate before an order is sized and fired.
//!
//! ## Gate layers (`can_open`, all fail-closed)
//! 1. **Rate limit**     — at most one accepted check per `min_check_interval`
//! 2. **Position caps**  — per-symbol and total open-position counts
//! 3. **Drawdown**       — equity decline from the baseline captured at init
//! 4. **Margin safety**  — free-margin/used-margin ratio
//! 5. **Total exposure** — aggregate unrealized risk against equity
//!
//! Any gateway failure during a check rejects the trade rather than erroring:
//! when the account state is unknown, the answer is no.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::gateway::{fallback_symbol_info, MarketGateway};

/// Maps the volatility feature (a return std-dev, ~1e-4 scale) onto stop
/// distance in points before clamping. Tunable policy, not a contract.
const VOL_TO_POINTS: f64 = 2.0e6;

/// Take-profit distance as a multiple of the stop distance.
const TP_FACTOR: f64 = 1.5;

/// Point value per standard lot used when the gateway supplies no
/// tick-value metadata. Deliberately high: it over-estimates the money at
/// risk per point, so fallback sizing errs small.
const FALLBACK_POINT_VALUE: f64 = 10.0;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Fraction of equity put at risk by a full-strength trade.
    pub max_risk_per_trade: f64,
    /// Maximum aggregate unrealized risk as a fraction of equity.
    pub max_total_risk: f64,
    /// Total open-position cap across all symbols.
    pub max_positions: usize,
    /// Open-position cap per symbol.
    pub max_positions_per_symbol: usize,
    /// Maximum proportional equity decline from the initial baseline.
    pub max_drawdown: f64,
    /// Minimum spacing between accepted risk checks.
    pub min_check_interval: Duration,
    /// Minimum free-margin/used-margin ratio when margin is in use.
    pub min_margin_ratio: f64,
    /// Stop distance bounds, in points.
    pub sl_points_min: f64,
    pub sl_points_max: f64,
    /// Take-profit distance bounds, in points.
    pub tp_points_min: f64,
    pub tp_points_max: f64,
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RiskState {
    initial_equity: f64,
    last_check_time: Option<DateTime<Utc>>,
}

/// Snapshot for the monitor surface.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub initial_equity: f64,
    pub last_check_time: Option<DateTime<Utc>>,
    pub max_drawdown: f64,
    pub max_positions: usize,
}

/// Order sizing produced by [`RiskManager::size`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedOrder {
    /// Volume in lots, step-rounded and clamped to broker bounds.
    pub lots: f64,
    /// Virtual stop-loss distance, in points.
    pub sl_points: f64,
    /// Virtual take-profit distance, in points.
    pub tp_points: f64,
}

// ─── Risk Manager ─────────────────────────────────────────────────────────────

pub struct RiskManager {
    gateway: Arc<dyn MarketGateway>,
    config: RiskConfig,
    state: RwLock<RiskState>,
}

impl RiskManager {
    pub fn new(gateway: Arc<dyn MarketGateway>, config: RiskConfig) -> Self {
        Self {
            gateway,
            config,
            state: RwLock::new(RiskState {
                initial_equity: 0.0,
                last_check_time: None,
            }),
        }
    }

    /// Capture the baseline equity. A hard precondition for starting the
    /// coordinator — no account info, no trading.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let account = self.gateway.account_info().await?;
        let mut state = self.state.write().await;
        state.initial_equity = account.equity;
        state.last_check_time = None;
        info!(initial_equity = account.equity, "risk manager initialized");
        Ok(())
    }

    // ─── Pre-Trade Gate ───────────────────────────────────────────────────────

    /// Whether a new position may be opened on `symbol` right now.
    pub async fn can_open(&self, symbol: &str) -> bool {
        let now = Utc::now();

        // [1] Rate limit — fail closed, not an error.
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_check_time {
                if now.signed_duration_since(last) < self.config.min_check_interval {
                    return false;
                }
            }
        }

        // [2] Position caps.
        let positions = match self.gateway.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "risk check failed to read positions");
                return false;
            }
        };

        let on_symbol = positions.iter().filter(|p| p.symbol == symbol).count();
        if on_symbol >= self.config.max_positions_per_symbol {
            debug!(symbol, on_symbol, "per-symbol position cap reached");
            return false;
        }
        if positions.len() >= self.config.max_positions {
            debug!(total = positions.len(), "total position cap reached");
            return false;
        }

        let account = match self.gateway.account_info().await {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "risk check failed to read account");
                return false;
            }
        };

        // [3] Drawdown against the initial baseline.
        let initial = self.state.read().await.initial_equity;
        if initial > 0.0 {
            let drawdown = 1.0 - account.equity / initial;
            if drawdown > self.config.max_drawdown {
                warn!(
                    drawdown,
                    max = self.config.max_drawdown,
                    "⛔ maximum drawdown exceeded"
                );
                return false;
            }
        }

        // [4] Margin safety.
        if account.margin > 0.0 {
            let ratio = account.free_margin / account.margin;
            if ratio < self.config.min_margin_ratio {
                warn!(ratio, min = self.config.min_margin_ratio, "margin safety too low");
                return false;
            }
        } else if account.free_margin <= 0.0 {
            warn!(free_margin = account.free_margin, "no free margin");
            return false;
        }

        // [5] Aggregate unrealized risk.
        if account.equity > 0.0 {
            let exposure: f64 =
                positions.iter().map(|p| p.profit.abs()).sum::<f64>() / account.equity;
            if exposure > self.config.max_total_risk {
                warn!(exposure, max = self.config.max_total_risk, "total risk too high");
                return false;
            }
        }

        self.state.write().await.last_check_time = Some(now);
        true
    }

    // ─── Position Sizing ──────────────────────────────────────────────────────

    /// Size a new position from the risk budget and the current volatility.
    ///
    /// Weak signals trade near the broker minimum lot; a full-strength
    /// signal trades the whole risk-derived size. When the gateway cannot
    /// supply symbol metadata, naming-convention fallbacks are used rather
    /// than failing the cycle.
    pub async fn size(
        &self,
        symbol: &str,
        signal_strength: f64,
        volatility: f64,
    ) -> Result<SizedOrder, EngineError> {
        let account = self.gateway.account_info().await?;

        let info = match self.gateway.symbol_info(symbol).await {
            Ok(info) => info,
            Err(e) => {
                debug!(symbol, error = %e, "symbol metadata unavailable — using fallbacks");
                fallback_symbol_info(0.0, 0.0)
            }
        };

        let sl_points = (volatility * VOL_TO_POINTS)
            .clamp(self.config.sl_points_min, self.config.sl_points_max);
        let tp_points =
            (sl_points * TP_FACTOR).clamp(self.config.tp_points_min, self.config.tp_points_max);

        let budget = account.equity * self.config.max_risk_per_trade * signal_strength;
        let point_value = info.tick_value.unwrap_or(FALLBACK_POINT_VALUE);
        let raw_lots = if sl_points * point_value > 0.0 {
            budget / (sl_points * point_value)
        } else {
            0.0
        };

        // Interpolate from the broker minimum toward the risk-derived size
        // by signal strength, then snap to the lot step.
        let bounded = raw_lots.clamp(info.min_lot, info.max_lot);
        let mut lots = info.min_lot + (bounded - info.min_lot) * signal_strength;
        if info.lot_step > 0.0 {
            lots = (lots / info.lot_step).round() * info.lot_step;
        }
        let lots = lots.clamp(info.min_lot, info.max_lot);

        debug!(
            symbol,
            lots,
            sl_points,
            tp_points,
            budget,
            point = info.point_or_default(symbol),
            "position sized"
        );

        Ok(SizedOrder { lots, sl_points, tp_points })
    }

    // ─── Status ───────────────────────────────────────────────────────────────

    pub async fn status(&self) -> RiskStatus {
        let state = self.state.read().await;
        RiskStatus {
            initial_equity: state.initial_equity,
            last_check_time: state.last_check_time,
            max_drawdown: self.config.max_drawdown,
            max_positions: self.config.max_positions,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testkit::MockGateway;
    use crate::gateway::AccountInfo;

    fn config() -> RiskConfig {
        RiskConfig {
            max_risk_per_trade: 0.01,
            max_total_risk: 0.06,
            max_positions: 5,
            max_positions_per_symbol: 2,
            max_drawdown: 0.2,
            min_check_interval: Duration::milliseconds(0),
            min_margin_ratio: 1.5,
            sl_points_min: 50.0,
            sl_points_max: 200.0,
            tp_points_min: 75.0,
            tp_points_max: 300.0,
        }
    }

    fn account(equity: f64) -> AccountInfo {
        AccountInfo {
            balance: equity,
            equity,
            margin: 0.0,
            free_margin: equity,
            profit: 0.0,
        }
    }

    #[tokio::test]
    async fn rejects_once_drawdown_exceeded() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(1000.0)).await;

        let risk = RiskManager::new(gateway.clone(), config());
        risk.initialize().await.unwrap();

        // 10% drawdown — inside the 20% limit.
        gateway.set_account(account(900.0)).await;
        assert!(risk.can_open("EURUSD").await);

        // 25% drawdown — rejected.
        gateway.set_account(account(750.0)).await;
        assert!(!risk.can_open("EURUSD").await);
    }

    #[tokio::test]
    async fn rate_limit_fails_closed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(1000.0)).await;

        let mut cfg = config();
        cfg.min_check_interval = Duration::seconds(60);
        let risk = RiskManager::new(gateway, cfg);
        risk.initialize().await.unwrap();

        assert!(risk.can_open("EURUSD").await);
        // Second check inside the interval — rejected without any gateway call.
        assert!(!risk.can_open("EURUSD").await);
    }

    #[tokio::test]
    async fn rejects_on_position_caps() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(1000.0)).await;
        let risk = RiskManager::new(gateway.clone(), config());
        risk.initialize().await.unwrap();

        gateway.set_broker_positions(vec![("EURUSD", 0.0), ("EURUSD", 0.0)]).await;
        assert!(!risk.can_open("EURUSD").await, "per-symbol cap");
        assert!(risk.can_open("GBPUSD").await, "other symbols unaffected");

        gateway
            .set_broker_positions(vec![
                ("EURUSD", 0.0),
                ("GBPUSD", 0.0),
                ("USDJPY", 0.0),
                ("AUDUSD", 0.0),
                ("USDCHF", 0.0),
            ])
            .await;
        assert!(!risk.can_open("NZDUSD").await, "total cap");
    }

    #[tokio::test]
    async fn rejects_on_aggregate_exposure() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(1000.0)).await;
        let risk = RiskManager::new(gateway.clone(), config());
        risk.initialize().await.unwrap();

        // |−40| + |35| = 75 against 1000 equity → 7.5% > 6% cap.
        gateway.set_broker_positions(vec![("EURUSD", -40.0), ("GBPUSD", 35.0)]).await;
        assert!(!risk.can_open("USDJPY").await);
    }

    #[tokio::test]
    async fn rejects_on_margin_safety() {
        let gateway = Arc::new(MockGateway::new());
        gateway
            .set_account(AccountInfo {
                balance: 1000.0,
                equity: 1000.0,
                margin: 400.0,
                free_margin: 500.0, // ratio 1.25 < 1.5
                profit: 0.0,
            })
            .await;
        let risk = RiskManager::new(gateway, config());
        risk.initialize().await.unwrap();
        assert!(!risk.can_open("EURUSD").await);
    }

    #[tokio::test]
    async fn gateway_failure_fails_closed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(1000.0)).await;
        let risk = RiskManager::new(gateway.clone(), config());
        risk.initialize().await.unwrap();

        gateway.fail_account_info(true).await;
        assert!(!risk.can_open("EURUSD").await);
    }

    #[tokio::test]
    async fn sizing_clamps_stop_distance_and_lots() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(account(10_000.0)).await;
        let risk = RiskManager::new(gateway, config());
        risk.initialize().await.unwrap();

        // Tiny volatility → stop clamps to the floor.
        let calm = risk.size("EURUSD", 1.0, 1e-6).await.unwrap();
        assert_eq!(calm.sl_points, 50.0);
        assert_eq!(calm.tp_points, 75.0);

        // Huge volatility → stop clamps to the ceiling.
        let wild = risk.size("EURUSD", 1.0, 1.0).await.unwrap();
        assert_eq!(wild.sl_points, 200.0);
        assert_eq!(wild.tp_points, 300.0);

        // Full strength, 10k equity, 1% risk, 50-point stop at $10/point:
        // 100 / 500 = 0.2 lots.
        assert!((calm.lots - 0.2).abs() < 1e-9);

        // Weak signal interpolates toward the broker minimum.
        let weak = risk.size("EURUSD", 0.1, 1e-6).await.unwrap();
        assert!(weak.lots < calm.lots);
        assert!(weak.lots >= 0.01);
    }

    #[tokio::test]
    async fn initialize_requires_account_info() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_account_info(true).await;
        let risk = RiskManager::new(gateway, config());
        assert!(risk.initialize().await.is_err());
    }
}
