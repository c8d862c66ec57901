//! # models::tick
//!
//! Defines [`Tick`], the raw market pulse the gateway delivers on every
//! price-update event.
//!
//! Keeping this struct minimal and `Copy`-able is intentional: the per-symbol
//! workers must process thousands of ticks per second without heap allocation
//! overhead beyond the buffer itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single price tick for one instrument.
///
/// Mirrors the quote structure brokers publish: a bid/ask pair, the tick
/// volume and the broker-side timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// The current **bid** price (price at which market makers buy from us).
    pub bid: f64,

    /// The current **ask** price (price at which market makers sell to us).
    pub ask: f64,

    /// Volume traded at this tick (may be 0 for Forex quotes).
    #[serde(default)]
    pub volume: f64,

    /// UTC timestamp when the broker recorded this tick.
    pub time: DateTime<Utc>,
}

impl Tick {
    /// Mid price, `(bid + ask) / 2`.
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Quoted spread, `ask − bid`.
    #[inline]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}
