//! # engine::signal
//!
//! **Signal Generator** — maps a feature vector to a directional, debounced
//! signal.
//!
//! ## Pipeline (per call)
//! ```text
//! features
//!     │
//!     ├─ empty, or within min interval → neutral (features preserved)
//!     │
//!     ├─ price          ×0.60 ┐
//!     ├─ volume         ×0.20 ├─ combined strength
//!     ├─ momentum       ×0.15 │
//!     ├─ microstructure ×0.05 ┘
//!     │
//!     └─ |combined| > base × clamp(0.8 − volatility, 0.2, 1.0) → signal
//! ```
//! Every component is tanh-scaled and clipped to [-1, 1]; the component
//! weights sum to 1. A higher volatility feature lowers the effective
//! threshold (more sensitivity in active markets); the clamp keeps degenerate
//! volatility readings from running the threshold to zero or past base.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::{Direction, FeatureVector, Signal};

// ─── Component weights (must sum to 1) ────────────────────────────────────────

const WEIGHT_PRICE: f64 = 0.60;
const WEIGHT_VOLUME: f64 = 0.20;
const WEIGHT_MOMENTUM: f64 = 0.15;
const WEIGHT_MICROSTRUCTURE: f64 = 0.05;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Base strength threshold before the volatility adjustment.
    pub base_threshold: f64,
    /// Minimum time between two non-neutral signals per symbol.
    pub min_signal_interval: Duration,
}

// ─── Generator ────────────────────────────────────────────────────────────────

/// Single shared instance across all instrument workers; the per-symbol
/// debounce clock lives behind its own lock.
pub struct SignalGenerator {
    config: SignalConfig,
    last_signal_time: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            last_signal_time: RwLock::new(HashMap::new()),
        }
    }

    pub async fn generate(
        &self,
        symbol: &str,
        features: FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> Signal {
        // ── 1. Guards: insufficient data / debounce ───────────────────────────
        if features.is_empty() {
            return Signal::neutral(symbol, features, timestamp);
        }

        {
            let last = self.last_signal_time.read().await;
            if let Some(previous) = last.get(symbol) {
                if timestamp.signed_duration_since(*previous) < self.config.min_signal_interval {
                    return Signal::neutral(symbol, features, timestamp);
                }
            }
        }

        // ── 2. Weighted components ────────────────────────────────────────────
        let combined = combined_strength(&features);

        // ── 3. Volatility-adjusted threshold ──────────────────────────────────
        let mut threshold = self.config.base_threshold;
        if let Some(volatility) = features.get("volatility") {
            threshold *= (0.8 - volatility).clamp(0.2, 1.0);
        }

        // ── 4. Emit or stay neutral ───────────────────────────────────────────
        if combined.abs() > threshold {
            let direction = Direction::from_sign(combined);
            let strength = combined.abs().min(1.0);

            self.last_signal_time
                .write()
                .await
                .insert(symbol.to_string(), timestamp);

            info!(
                symbol,
                direction = ?direction,
                strength,
                threshold,
                "signal generated"
            );

            return Signal {
                symbol: symbol.to_string(),
                direction,
                strength,
                features,
                timestamp,
            };
        }

        Signal::neutral(symbol, features, timestamp)
    }
}

// ─── Component Math ───────────────────────────────────────────────────────────

/// Weighted sum of the four component signals.
pub(crate) fn combined_strength(features: &FeatureVector) -> f64 {
    price_component(features) * WEIGHT_PRICE
        + volume_component(features) * WEIGHT_VOLUME
        + momentum_component(features) * WEIGHT_MOMENTUM
        + microstructure_component(features) * WEIGHT_MICROSTRUCTURE
}

/// Price push attenuated by spread width, plus book imbalance.
fn price_component(features: &FeatureVector) -> f64 {
    let Some(price_change) = features.get("price_change") else {
        return 0.0;
    };

    let mut signal = (price_change * 30.0).tanh();

    // Tight spreads let the price push through; wide spreads mute it.
    if let Some(spread) = features.get("spread") {
        signal *= 1.0 - (spread / 2.0e-5).min(1.0);
    }

    if let (Some(bid), Some(ask)) = (features.get("bid_strength"), features.get("ask_strength")) {
        signal += ((bid - ask) * 15.0).tanh();
    }

    (signal / 2.0).clamp(-1.0, 1.0)
}

/// Volume spike push signed by price direction, plus trend and VWAP drift.
fn volume_component(features: &FeatureVector) -> f64 {
    let Some(intensity) = features.get("volume_intensity") else {
        return 0.0;
    };

    let mut signal = 0.0;

    if *intensity > 1.2 {
        if let Some(price_change) = features.get("price_change") {
            signal = price_change.signum() * (intensity * 1.5).ln_1p();
        }
    }

    if let Some(trend) = features.get("volume_trend") {
        signal += (trend * 8.0).tanh();
    }

    if let Some(vwap) = features.get("vwap_diff") {
        signal += (vwap * 15.0).tanh();
    }

    signal.clamp(-1.0, 1.0)
}

/// Momentum plus acceleration, minus a mean-reversion drag.
fn momentum_component(features: &FeatureVector) -> f64 {
    let mut signal = 0.0;

    if let Some(momentum) = features.get("price_momentum") {
        signal += (momentum * 8.0).tanh();
    }

    if let Some(deviation) = features.get("mean_deviation") {
        signal -= (deviation * 0.5).tanh();
    }

    if let Some(acceleration) = features.get("price_acceleration") {
        signal += (acceleration * 3.0).tanh();
    }

    signal.clamp(-1.0, 1.0)
}

/// Tick pattern, trade sign and quote arrival intensity.
fn microstructure_component(features: &FeatureVector) -> f64 {
    let mut signal = 0.0;

    if let Some(pattern) = features.get("tick_pattern") {
        signal += pattern * 0.9;
    }

    if let Some(sign) = features.get("trade_sign") {
        signal += sign * 0.8;
    }

    if let Some(intensity) = features.get("quote_intensity") {
        signal += ((intensity - 1.0) * 3.0).tanh() * 0.4;
    }

    signal.clamp(-1.0, 1.0)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bullish_features() -> FeatureVector {
        // A strong uptrend on tight spreads with rising volume.
        FeatureVector::from([
            ("price_change".to_string(), 0.002),
            ("spread".to_string(), 0.0),
            ("bid_strength".to_string(), 0.9),
            ("ask_strength".to_string(), 0.1),
            ("volatility".to_string(), 0.0001),
            ("price_momentum".to_string(), 0.01),
            ("mean_deviation".to_string(), 0.0),
            ("price_acceleration".to_string(), 0.05),
            ("volume_intensity".to_string(), 2.0),
            ("volume_trend".to_string(), 0.5),
            ("vwap_diff".to_string(), 0.001),
            ("tick_pattern".to_string(), 0.8),
            ("trade_sign".to_string(), 1.0),
            ("quote_intensity".to_string(), 1.0),
        ])
    }

    fn generator(threshold: f64, interval_ms: i64) -> SignalGenerator {
        SignalGenerator::new(SignalConfig {
            base_threshold: threshold,
            min_signal_interval: Duration::milliseconds(interval_ms),
        })
    }

    #[tokio::test]
    async fn empty_features_stay_neutral() {
        let generator = generator(0.1, 100);
        let signal = generator
            .generate("EURUSD", FeatureVector::new(), Utc::now())
            .await;
        assert_eq!(signal.direction, Direction::NoTrade);
        assert_eq!(signal.strength, 0.0);
    }

    #[tokio::test]
    async fn emits_above_threshold_with_clipped_strength() {
        let generator = generator(0.3, 100);
        let features = bullish_features();
        let combined = combined_strength(&features);
        assert!(combined > 0.3, "fixture should clear the threshold");

        let signal = generator.generate("EURUSD", features, Utc::now()).await;
        assert_eq!(signal.direction, Direction::Buy);
        assert!((signal.strength - combined.abs().min(1.0)).abs() < 1e-12);
        assert!(signal.strength <= 1.0);
    }

    #[tokio::test]
    async fn second_signal_within_interval_is_neutral() {
        let generator = generator(0.1, 500);
        let now = Utc::now();

        let first = generator.generate("EURUSD", bullish_features(), now).await;
        assert_eq!(first.direction, Direction::Buy);

        // Identical bullish features, 100ms later — debounced.
        let second = generator
            .generate("EURUSD", bullish_features(), now + Duration::milliseconds(100))
            .await;
        assert_eq!(second.direction, Direction::NoTrade);
        assert!(!second.features.is_empty(), "features preserved for observability");

        // Past the interval the generator fires again.
        let third = generator
            .generate("EURUSD", bullish_features(), now + Duration::milliseconds(600))
            .await;
        assert_eq!(third.direction, Direction::Buy);
    }

    #[tokio::test]
    async fn debounce_is_per_symbol() {
        let generator = generator(0.1, 500);
        let now = Utc::now();

        let first = generator.generate("EURUSD", bullish_features(), now).await;
        assert_eq!(first.direction, Direction::Buy);

        let other = generator.generate("GBPUSD", bullish_features(), now).await;
        assert_eq!(other.direction, Direction::Buy);
    }

    #[tokio::test]
    async fn bearish_features_sell() {
        let generator = generator(0.1, 100);
        let mut features = bullish_features();
        features.insert("price_change".to_string(), -0.002);
        features.insert("bid_strength".to_string(), 0.1);
        features.insert("ask_strength".to_string(), 0.9);
        features.insert("price_momentum".to_string(), -0.01);
        features.insert("price_acceleration".to_string(), -0.05);
        features.insert("volume_trend".to_string(), -0.5);
        features.insert("vwap_diff".to_string(), -0.001);
        features.insert("tick_pattern".to_string(), -0.8);
        features.insert("trade_sign".to_string(), -1.0);

        let signal = generator.generate("EURUSD", features, Utc::now()).await;
        assert_eq!(signal.direction, Direction::Sell);
        assert!(signal.strength > 0.0);
    }

    #[tokio::test]
    async fn high_volatility_lowers_threshold() {
        let mut features = bullish_features();
        // Weak trend that only clears the threshold once volatility
        // compresses it.
        features.insert("price_change".to_string(), 0.0002);
        features.insert("bid_strength".to_string(), 0.55);
        features.insert("ask_strength".to_string(), 0.45);
        features.insert("volume_intensity".to_string(), 1.0);
        features.insert("volume_trend".to_string(), 0.05);
        features.insert("vwap_diff".to_string(), 0.0001);
        features.insert("price_momentum".to_string(), 0.001);
        features.insert("price_acceleration".to_string(), 0.01);
        features.insert("tick_pattern".to_string(), 0.2);
        features.insert("trade_sign".to_string(), 0.5);

        let combined = combined_strength(&features);
        let base = combined.abs() / 0.5; // threshold the calm market misses

        let calm = generator(base, 0);
        let calm_signal = calm.generate("EURUSD", features.clone(), Utc::now()).await;
        assert_eq!(calm_signal.direction, Direction::NoTrade);

        // Volatility 0.6 → clamp(0.8 − 0.6, 0.2, 1.0) = 0.2 → threshold × 0.2.
        features.insert("volatility".to_string(), 0.6);
        let active = generator(base, 0);
        let active_signal = active.generate("EURUSD", features, Utc::now()).await;
        assert_eq!(active_signal.direction, Direction::Buy);
    }
}
