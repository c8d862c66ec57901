//! Core data types shared across the engine.

pub mod equity;
pub mod position;
pub mod signal;
pub mod tick;

pub use equity::{EquityHistory, EquityPoint};
pub use position::{CloseReason, Direction, Position};
pub use signal::{FeatureVector, Signal};
pub use tick::Tick;
