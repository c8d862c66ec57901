//! # models::signal
//!
//! Defines [`Signal`] — the output of one pipeline cycle — and the
//! [`FeatureVector`] it is derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::Direction;

/// Named feature values computed from a tick window.
///
/// An **empty** map is the canonical "insufficient data" value — the signal
/// generator treats it as an instruction to stay neutral.
pub type FeatureVector = HashMap<String, f64>;

/// A directional, debounced trading signal for one instrument.
///
/// `direction == Direction::NoTrade` is the canonical no-action value; the
/// features that produced the decision are carried along for observability
/// even when the signal is neutral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Signal strength, always clipped to `[0, 1]`.
    pub strength: f64,
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// A neutral signal preserving the features it was derived from.
    pub fn neutral(symbol: &str, features: FeatureVector, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: Direction::NoTrade,
            strength: 0.0,
            features,
            timestamp,
        }
    }
}
