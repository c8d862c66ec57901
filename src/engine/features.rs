//! # engine::features
//!
//! **Feature Extractor** — fixed feature vector from a tick window.
//!
//! All statistics are exponentially weighted with `exp(linspace(-1, 0, n))`
//! so the most recent tick carries the highest weight: responsiveness over a
//! short horizon beats smoothness here.
//!
//! Every divide-by-zero case yields a neutral default (0.0, or 1.0 for
//! ratio features) — feature extraction is total once the insufficiency
//! guard has passed.

use crate::engine::buffer::TickBuffer;
use crate::models::{FeatureVector, Tick};

/// Sub-window lengths for the short-horizon features. The full window is
/// used for volatility, momentum and volume trend.
const RETURN_WINDOW: usize = 5;
const MEAN_WINDOW: usize = 7;
const ACCEL_WINDOW: usize = 3;
const PATTERN_WINDOW: usize = 7;

pub struct FeatureExtractor {
    window_size: usize,
}

impl FeatureExtractor {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    /// Compute the feature vector from the buffer's recent window.
    ///
    /// Returns an **empty** vector when fewer than `window_size` ticks are
    /// available — partial windows never fabricate features.
    pub fn calculate(&self, buffer: &TickBuffer) -> FeatureVector {
        let ticks = buffer.recent(self.window_size * 2);
        if ticks.len() < self.window_size {
            return FeatureVector::new();
        }

        let mids: Vec<f64> = ticks.iter().map(Tick::mid).collect();
        let bids: Vec<f64> = ticks.iter().map(|t| t.bid).collect();
        let asks: Vec<f64> = ticks.iter().map(|t| t.ask).collect();
        let volumes: Vec<f64> = ticks.iter().map(|t| t.volume).collect();

        let mut features = FeatureVector::new();

        // ── Price dynamics ────────────────────────────────────────────────────
        features.insert("price_change".into(), price_change(tail(&mids, RETURN_WINDOW)));
        features.insert("volatility".into(), volatility(&mids));
        features.insert("price_momentum".into(), self.momentum(&mids));
        features.insert("mean_deviation".into(), mean_deviation(tail(&mids, MEAN_WINDOW)));
        features.insert(
            "price_acceleration".into(),
            acceleration(tail(&mids, ACCEL_WINDOW)),
        );

        // ── Volume ────────────────────────────────────────────────────────────
        features.insert(
            "volume_intensity".into(),
            volume_intensity(tail(&volumes, RETURN_WINDOW)),
        );
        features.insert("volume_trend".into(), self.volume_trend(&volumes));
        features.insert("vwap_diff".into(), vwap_diff(tail(&ticks, RETURN_WINDOW)));

        // ── Spread and liquidity ──────────────────────────────────────────────
        features.insert("spread".into(), ticks[ticks.len() - 1].spread());
        features.insert("bid_strength".into(), side_strength(tail(&bids, RETURN_WINDOW)));
        features.insert("ask_strength".into(), side_strength(tail(&asks, RETURN_WINDOW)));

        // ── Microstructure ────────────────────────────────────────────────────
        features.insert("tick_pattern".into(), tick_pattern(tail(&mids, PATTERN_WINDOW)));
        features.insert("trade_sign".into(), trade_sign(tail(&ticks, 2)));
        features.insert(
            "quote_intensity".into(),
            quote_intensity(tail(&ticks, RETURN_WINDOW)),
        );

        features
    }

    /// Exponentially weighted sum of returns over the full window.
    fn momentum(&self, prices: &[f64]) -> f64 {
        if prices.len() < self.window_size {
            return 0.0;
        }
        let weights = exp_weights(prices.len());
        returns(prices)
            .iter()
            .enumerate()
            .map(|(i, r)| r * weights[i + 1])
            .sum()
    }

    /// Weighted linear-regression slope of volume over index, tanh-bounded.
    fn volume_trend(&self, volumes: &[f64]) -> f64 {
        if volumes.len() < self.window_size {
            return 0.0;
        }
        let weights = exp_weights(volumes.len());
        (weighted_slope(volumes, &weights) * 5.0).tanh()
    }
}

// ─── Weighting Helpers ────────────────────────────────────────────────────────

/// `exp(linspace(-1, 0, n))` — most recent index weighted highest.
fn exp_weights(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| (-1.0 + i as f64 / (n - 1) as f64).exp())
            .collect(),
    }
}

fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total
}

/// Simple returns `(p[i+1] − p[i]) / p[i]`, zero where the base is zero.
fn returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|pair| {
            if pair[0] == 0.0 {
                0.0
            } else {
                (pair[1] - pair[0]) / pair[0]
            }
        })
        .collect()
}

/// Weighted least-squares slope of `values` against their index.
fn weighted_slope(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = weighted_mean(&xs, weights);
    let y_mean = weighted_mean(values, weights);

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for ((x, y), w) in xs.iter().zip(values).zip(weights) {
        numerator += w * (x - x_mean) * (y - y_mean);
        denominator += w * (x - x_mean) * (x - x_mean);
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn tail<T>(slice: &[T], n: usize) -> &[T] {
    &slice[slice.len().saturating_sub(n)..]
}

// ─── Feature Functions ────────────────────────────────────────────────────────

/// `(last − first) / first` over the short return window.
fn price_change(prices: &[f64]) -> f64 {
    if prices.len() < 2 || prices[0] == 0.0 {
        return 0.0;
    }
    (prices[prices.len() - 1] - prices[0]) / prices[0]
}

/// Exponentially weighted standard deviation of mid-price returns.
fn volatility(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0001;
    }
    let rets = returns(prices);
    let weights = exp_weights(rets.len());
    let squared: Vec<f64> = rets.iter().map(|r| r * r).collect();
    let mean = weighted_mean(&rets, &weights);
    let variance = weighted_mean(&squared, &weights) - mean * mean;
    variance.max(0.0).sqrt()
}

/// `(last − weighted mean) / weighted mean` over the short mean window.
fn mean_deviation(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let weights = exp_weights(prices.len());
    let mean = weighted_mean(prices, &weights);
    if mean == 0.0 {
        return 0.0;
    }
    (prices[prices.len() - 1] - mean) / mean
}

/// Difference between the last and first return in the window, scaled.
fn acceleration(prices: &[f64]) -> f64 {
    if prices.len() < 3 {
        return 0.0;
    }
    let rets = returns(prices);
    if rets.len() < 2 {
        return 0.0;
    }
    (rets[rets.len() - 1] - rets[0]) * 100.0
}

/// Last volume relative to the mean of the preceding volumes.
fn volume_intensity(volumes: &[f64]) -> f64 {
    if volumes.len() < 2 {
        return 1.0;
    }
    let prior = &volumes[..volumes.len() - 1];
    let mean = prior.iter().sum::<f64>() / prior.len() as f64;
    if mean == 0.0 {
        return 1.0;
    }
    volumes[volumes.len() - 1] / mean
}

/// `(last mid − weighted VWAP) / weighted VWAP` over the short window.
fn vwap_diff(ticks: &[Tick]) -> f64 {
    if ticks.len() < 2 {
        return 0.0;
    }
    if ticks.iter().map(|t| t.volume).sum::<f64>() == 0.0 {
        return 0.0;
    }
    let weights = exp_weights(ticks.len());
    let denominator: f64 = ticks.iter().zip(&weights).map(|(t, w)| t.volume * w).sum();
    if denominator == 0.0 {
        return 0.0;
    }
    let vwap: f64 = ticks
        .iter()
        .zip(&weights)
        .map(|(t, w)| t.mid() * t.volume * w)
        .sum::<f64>()
        / denominator;
    if vwap == 0.0 {
        return 0.0;
    }
    let last = ticks[ticks.len() - 1].mid();
    (last - vwap) / vwap
}

/// Weighted fraction of positive deltas on one side of the book.
fn side_strength(quotes: &[f64]) -> f64 {
    if quotes.len() < 2 {
        return 0.5;
    }
    let deltas: Vec<f64> = quotes.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let weights = exp_weights(deltas.len());
    let total: f64 = weights.iter().sum();
    let positive: f64 = deltas
        .iter()
        .zip(&weights)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, w)| w)
        .sum();
    positive / total
}

/// Weighted `(up-ticks − down-ticks) / total weight` on mid deltas.
fn tick_pattern(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let deltas: Vec<f64> = prices.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let weights = exp_weights(deltas.len());
    let total: f64 = weights.iter().sum();
    let mut ups = 0.0;
    let mut downs = 0.0;
    for (delta, weight) in deltas.iter().zip(&weights) {
        if *delta > 0.0 {
            ups += weight;
        } else if *delta < 0.0 {
            downs += weight;
        }
    }
    (ups - downs) / total
}

/// Tick rule on the last two mids; ties broken by spread compression.
fn trade_sign(ticks: &[Tick]) -> f64 {
    if ticks.len() < 2 {
        return 0.0;
    }
    let prev = &ticks[ticks.len() - 2];
    let last = &ticks[ticks.len() - 1];
    if last.mid() > prev.mid() {
        1.0
    } else if last.mid() < prev.mid() {
        -1.0
    } else if last.spread() < prev.spread() {
        0.5
    } else if last.spread() > prev.spread() {
        -0.5
    } else {
        0.0
    }
}

/// Weighted fraction of ticks where bid or ask changed.
fn quote_intensity(ticks: &[Tick]) -> f64 {
    if ticks.len() < 2 {
        return 1.0;
    }
    let weights = exp_weights(ticks.len() - 1);
    let total: f64 = weights.iter().sum();
    let changed: f64 = ticks
        .windows(2)
        .zip(&weights)
        .filter(|(pair, _)| pair[1].bid != pair[0].bid || pair[1].ask != pair[0].ask)
        .map(|(_, w)| w)
        .sum();
    changed / total
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_buffer(mids: &[f64]) -> TickBuffer {
        let mut buffer = TickBuffer::new(64);
        for &mid in mids {
            buffer.add(Tick {
                bid: mid - 0.0001,
                ask: mid + 0.0001,
                volume: 1.0,
                time: Utc::now(),
            });
        }
        buffer
    }

    #[test]
    fn empty_iff_insufficient_window() {
        let extractor = FeatureExtractor::new(5);

        let short = make_buffer(&[1.1, 1.1001, 1.1002, 1.1003]);
        assert!(extractor.calculate(&short).is_empty());

        let enough = make_buffer(&[1.1, 1.1001, 1.1002, 1.1003, 1.1004]);
        let features = extractor.calculate(&enough);
        assert!(!features.is_empty());
        for key in [
            "price_change",
            "volatility",
            "price_momentum",
            "mean_deviation",
            "price_acceleration",
            "volume_intensity",
            "volume_trend",
            "vwap_diff",
            "spread",
            "bid_strength",
            "ask_strength",
            "tick_pattern",
            "trade_sign",
            "quote_intensity",
        ] {
            assert!(features.contains_key(key), "missing feature {key}");
        }
    }

    #[test]
    fn uptrend_produces_positive_directional_features() {
        let extractor = FeatureExtractor::new(5);
        let mids: Vec<f64> = (0..10).map(|i| 1.1000 + i as f64 * 0.0005).collect();
        let features = extractor.calculate(&make_buffer(&mids));

        assert!(features["price_change"] > 0.0);
        assert!(features["price_momentum"] > 0.0);
        assert!(features["tick_pattern"] > 0.99);
        assert_eq!(features["trade_sign"], 1.0);
        assert_eq!(features["bid_strength"], 1.0);
        assert_eq!(features["quote_intensity"], 1.0);
    }

    #[test]
    fn flat_prices_yield_neutral_features() {
        let extractor = FeatureExtractor::new(5);
        let features = extractor.calculate(&make_buffer(&[1.1; 10]));

        assert_eq!(features["price_change"], 0.0);
        assert_eq!(features["volatility"], 0.0);
        assert_eq!(features["tick_pattern"], 0.0);
        assert_eq!(features["trade_sign"], 0.0);
        // No quote ever changed.
        assert_eq!(features["quote_intensity"], 0.0);
    }

    #[test]
    fn zero_volume_falls_back_to_ratio_defaults() {
        let extractor = FeatureExtractor::new(5);
        let mut buffer = TickBuffer::new(32);
        for i in 0..8 {
            buffer.add(Tick {
                bid: 1.1 + i as f64 * 0.0001,
                ask: 1.1002 + i as f64 * 0.0001,
                volume: 0.0,
                time: Utc::now(),
            });
        }
        let features = extractor.calculate(&buffer);
        assert_eq!(features["volume_intensity"], 1.0);
        assert_eq!(features["vwap_diff"], 0.0);
    }

    #[test]
    fn trade_sign_breaks_ties_on_spread() {
        // Same mid, tighter spread on the last tick → mildly bullish.
        let mut buffer = TickBuffer::new(8);
        let time = Utc::now();
        for (bid, ask) in [(1.0998, 1.1002), (1.0999, 1.1001)] {
            buffer.add(Tick { bid, ask, volume: 1.0, time });
        }
        let ticks = buffer.recent_all();
        assert_eq!(trade_sign(&ticks), 0.5);
    }

    #[test]
    fn exp_weights_favor_recent() {
        let weights = exp_weights(5);
        assert_eq!(weights.len(), 5);
        assert!(weights.windows(2).all(|w| w[1] > w[0]));
        assert!((weights[4] - 1.0).abs() < 1e-12);
        assert!((weights[0] - (-1.0f64).exp()).abs() < 1e-12);
    }
}
