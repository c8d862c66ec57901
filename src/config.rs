//! # config
//!
//! Runtime settings, read from environment variables (plus `.env` via
//! dotenvy in `main`). `validate()` fails fast — a bad risk parameter must
//! never reach a spawned worker.

use std::time::Duration;

use crate::engine::risk::RiskConfig;
use crate::engine::signal::SignalConfig;
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Settings {
    // ── Trading ───────────────────────────────────────────────────────────────
    pub symbols: Vec<String>,
    pub tick_buffer_size: usize,
    pub feature_window: usize,
    pub base_threshold: f64,
    pub min_signal_interval_ms: u64,

    // ── Risk ──────────────────────────────────────────────────────────────────
    pub max_risk_per_trade: f64,
    pub max_total_risk: f64,
    pub max_positions: usize,
    pub max_positions_per_symbol: usize,
    pub max_drawdown: f64,
    pub risk_check_interval_ms: u64,
    pub min_margin_ratio: f64,
    pub sl_points_min: f64,
    pub sl_points_max: f64,
    pub tp_points_min: f64,
    pub tp_points_max: f64,

    // ── Scheduling ────────────────────────────────────────────────────────────
    pub poll_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub equity_sample_interval_ms: u64,
    pub equity_history_size: usize,
    pub stop_join_timeout_ms: u64,

    // ── Gateway / Server ──────────────────────────────────────────────────────
    pub bind_addr: String,
    pub gateway_base_url: String,
    pub gateway_timeout_ms: u64,
    pub gateway_max_retries: u32,
    pub gateway_retry_delay_ms: u64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            symbols: env_str("SYMBOLS", "EURUSD,USDJPY,GBPUSD")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            tick_buffer_size: env_usize("TICK_BUFFER_SIZE", 1000),
            feature_window: env_usize("FEATURE_WINDOW", 20),
            base_threshold: env_f64("SIGNAL_THRESHOLD", 0.3),
            min_signal_interval_ms: env_u64("MIN_SIGNAL_INTERVAL_MS", 500),

            max_risk_per_trade: env_f64("MAX_RISK_PER_TRADE", 0.01),
            max_total_risk: env_f64("MAX_TOTAL_RISK", 0.06),
            max_positions: env_usize("MAX_POSITIONS", 5),
            max_positions_per_symbol: env_usize("MAX_POSITIONS_PER_SYMBOL", 2),
            max_drawdown: env_f64("MAX_DRAWDOWN", 0.2),
            risk_check_interval_ms: env_u64("RISK_CHECK_INTERVAL_MS", 50),
            min_margin_ratio: env_f64("MIN_MARGIN_RATIO", 1.5),
            sl_points_min: env_f64("SL_POINTS_MIN", 50.0),
            sl_points_max: env_f64("SL_POINTS_MAX", 200.0),
            tp_points_min: env_f64("TP_POINTS_MIN", 75.0),
            tp_points_max: env_f64("TP_POINTS_MAX", 300.0),

            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 50),
            monitor_interval_ms: env_u64("MONITOR_INTERVAL_MS", 10),
            equity_sample_interval_ms: env_u64("EQUITY_SAMPLE_INTERVAL_MS", 1000),
            equity_history_size: env_usize("EQUITY_HISTORY_SIZE", 1000),
            stop_join_timeout_ms: env_u64("STOP_JOIN_TIMEOUT_MS", 5000),

            bind_addr: env_str("BIND_ADDR", "0.0.0.0:3000"),
            gateway_base_url: env_str("GATEWAY_BASE_URL", "mock"),
            gateway_timeout_ms: env_u64("GATEWAY_TIMEOUT_MS", 5000),
            gateway_max_retries: env_u64("GATEWAY_MAX_RETRIES", 3) as u32,
            gateway_retry_delay_ms: env_u64("GATEWAY_RETRY_DELAY_MS", 100),
        }
    }

    /// Reject invalid parameters before any worker is spawned.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::Config("no trading symbols configured".into()));
        }
        if !(0.0..1.0).contains(&self.max_drawdown) || self.max_drawdown == 0.0 {
            return Err(EngineError::Config(format!(
                "max_drawdown must be in (0, 1), got {}",
                self.max_drawdown
            )));
        }
        if !(0.0..=0.1).contains(&self.max_risk_per_trade) || self.max_risk_per_trade == 0.0 {
            return Err(EngineError::Config(format!(
                "max_risk_per_trade must be in (0, 0.1], got {}",
                self.max_risk_per_trade
            )));
        }
        if self.max_total_risk <= 0.0 || self.max_total_risk >= 1.0 {
            return Err(EngineError::Config(format!(
                "max_total_risk must be in (0, 1), got {}",
                self.max_total_risk
            )));
        }
        if self.feature_window < 2 {
            return Err(EngineError::Config("feature_window must be at least 2".into()));
        }
        if self.tick_buffer_size < self.feature_window * 2 {
            return Err(EngineError::Config(format!(
                "tick_buffer_size {} too small for feature_window {}",
                self.tick_buffer_size, self.feature_window
            )));
        }
        if self.max_positions == 0 || self.max_positions_per_symbol == 0 {
            return Err(EngineError::Config("position caps must be positive".into()));
        }
        if self.sl_points_min <= 0.0 || self.sl_points_max < self.sl_points_min {
            return Err(EngineError::Config("invalid stop-loss point bounds".into()));
        }
        if self.tp_points_min <= 0.0 || self.tp_points_max < self.tp_points_min {
            return Err(EngineError::Config("invalid take-profit point bounds".into()));
        }
        Ok(())
    }

    // ── Component config builders ─────────────────────────────────────────────

    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            base_threshold: self.base_threshold,
            min_signal_interval: chrono::Duration::milliseconds(
                self.min_signal_interval_ms as i64,
            ),
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_risk_per_trade: self.max_risk_per_trade,
            max_total_risk: self.max_total_risk,
            max_positions: self.max_positions,
            max_positions_per_symbol: self.max_positions_per_symbol,
            max_drawdown: self.max_drawdown,
            min_check_interval: chrono::Duration::milliseconds(self.risk_check_interval_ms as i64),
            min_margin_ratio: self.min_margin_ratio,
            sl_points_min: self.sl_points_min,
            sl_points_max: self.sl_points_max,
            tp_points_min: self.tp_points_min,
            tp_points_max: self.tp_points_max,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn equity_sample_interval(&self) -> Duration {
        Duration::from_millis(self.equity_sample_interval_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

// ─── Env Helpers ──────────────────────────────────────────────────────────────

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            symbols: vec!["EURUSD".into()],
            tick_buffer_size: 1000,
            feature_window: 20,
            base_threshold: 0.3,
            min_signal_interval_ms: 500,
            max_risk_per_trade: 0.01,
            max_total_risk: 0.06,
            max_positions: 5,
            max_positions_per_symbol: 2,
            max_drawdown: 0.2,
            risk_check_interval_ms: 50,
            min_margin_ratio: 1.5,
            sl_points_min: 50.0,
            sl_points_max: 200.0,
            tp_points_min: 75.0,
            tp_points_max: 300.0,
            poll_interval_ms: 50,
            monitor_interval_ms: 10,
            equity_sample_interval_ms: 1000,
            equity_history_size: 1000,
            stop_join_timeout_ms: 5000,
            bind_addr: "127.0.0.1:0".into(),
            gateway_base_url: "mock".into(),
            gateway_timeout_ms: 5000,
            gateway_max_retries: 3,
            gateway_retry_delay_ms: 100,
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn drawdown_outside_unit_interval_rejected() {
        let mut settings = base();
        settings.max_drawdown = 1.5;
        assert!(settings.validate().is_err());

        settings.max_drawdown = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn risk_per_trade_bounds_enforced() {
        let mut settings = base();
        settings.max_risk_per_trade = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_symbols_rejected() {
        let mut settings = base();
        settings.symbols.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn buffer_must_cover_double_window() {
        let mut settings = base();
        settings.tick_buffer_size = 30; // < 2 × 20
        assert!(settings.validate().is_err());
    }
}
