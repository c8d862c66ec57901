//! # models::position
//!
//! Defines structs for tracking **live positions** supervised by the engine.
//!
//! ## Why virtual stop levels?
//! `Position` carries its stop-loss/take-profit as engine-side fields rather
//! than broker-resident orders. The broker never sees them; the execution
//! engine polls quotes and closes breached positions itself. The levels are
//! fixed at creation and never adjusted in place — a position is only ever
//! removed (closed), never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Direction ────────────────────────────────────────────────────────────────

/// Directional bias of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
    /// Neutral — no edge; the pipeline must not open trades.
    NoTrade,
}

impl Direction {
    /// Build from a signed strength value.
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Direction::Buy
        } else if value < 0.0 {
            Direction::Sell
        } else {
            Direction::NoTrade
        }
    }

    #[inline]
    pub fn is_actionable(&self) -> bool {
        *self != Direction::NoTrade
    }
}

// ─── CloseReason ──────────────────────────────────────────────────────────────

/// Why a supervised position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Virtual stop-loss level breached.
    StopLoss,
    /// Virtual take-profit level breached.
    TakeProfit,
    /// Closed by `close_all` / shutdown / instrument removal.
    Manual,
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// A position currently open at the broker and supervised by the engine.
///
/// Owned exclusively by the execution engine's position map; the `ticket` is
/// the broker-assigned identifier used for closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Broker ticket / order id.
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    /// Volume in lots.
    pub volume: f64,
    pub entry_price: f64,
    /// Engine-side stop-loss price level. Fixed at creation.
    pub virtual_sl: f64,
    /// Engine-side take-profit price level. Fixed at creation.
    pub virtual_tp: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Evaluate the virtual stop levels against a fresh quote.
    ///
    /// Longs exit on the **bid** (the price we sell back at), shorts on the
    /// **ask** (the price we buy back at).
    pub fn breach(&self, bid: f64, ask: f64) -> Option<CloseReason> {
        match self.direction {
            Direction::Buy => {
                if bid <= self.virtual_sl {
                    Some(CloseReason::StopLoss)
                } else if bid >= self.virtual_tp {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
            Direction::Sell => {
                if ask >= self.virtual_sl {
                    Some(CloseReason::StopLoss)
                } else if ask <= self.virtual_tp {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
            Direction::NoTrade => None,
        }
    }
}
