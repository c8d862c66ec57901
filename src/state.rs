//! # state
//!
//! Shared state injected into every Axum handler. The coordinator is
//! constructed explicitly by the process entry point and handed in here —
//! there is no implicit global instance anywhere.

use std::sync::Arc;

use crate::engine::coordinator::StrategyCoordinator;

pub struct AppState {
    pub coordinator: Arc<StrategyCoordinator>,
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;

pub fn build_state(coordinator: Arc<StrategyCoordinator>) -> SharedState {
    Arc::new(AppState { coordinator })
}
