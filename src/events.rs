//! # events
//!
//! Defines [`WsEvent`] — every event the engine broadcasts to WebSocket
//! monitor clients.
//!
//! Events travel the broadcast channel as pre-serialized JSON `String`s to
//! avoid clone constraints on the payload types.

use serde::Serialize;

use crate::models::{CloseReason, EquityPoint, Position, Signal};

/// Real-time event stream payloads for the monitor surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    /// The coordinator spawned its workers and is live.
    EngineStarted { symbols: Vec<String> },

    /// The coordinator stopped; all positions were asked to close.
    EngineStopped,

    /// A non-neutral signal cleared the dynamic threshold.
    SignalFired { signal: Box<Signal> },

    /// An order was accepted and is now supervised.
    PositionOpened { position: Box<Position> },

    /// A supervised position was closed (virtual stop or manual).
    PositionClosed {
        ticket: u64,
        symbol: String,
        reason: CloseReason,
    },

    /// Periodic equity sample.
    EquitySampled { point: EquityPoint },

    /// Instrument membership changed at runtime.
    InstrumentAdded { symbol: String },
    InstrumentRemoved { symbol: String },
}

impl WsEvent {
    /// JSON string form for the broadcast channel.
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}
