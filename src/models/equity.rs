//! # models::equity
//!
//! [`EquityPoint`] samples and the bounded [`EquityHistory`] the sampler
//! appends to. Single writer (the sampler task); all readers get a snapshot
//! copy so the write path never contends with a slow consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Single point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub profit: f64,
}

/// Bounded, ordered history of equity samples.
pub struct EquityHistory {
    max_points: usize,
    points: RwLock<VecDeque<EquityPoint>>,
}

impl EquityHistory {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points,
            points: RwLock::new(VecDeque::with_capacity(max_points + 1)),
        }
    }

    /// Append a sample, evicting the oldest once the bound is reached.
    pub async fn add(&self, point: EquityPoint) {
        let mut points = self.points.write().await;
        if points.len() >= self.max_points {
            points.pop_front();
        }
        points.push_back(point);
    }

    /// The `n` most recent samples, oldest → newest. `None` returns all.
    pub async fn recent(&self, n: Option<usize>) -> Vec<EquityPoint> {
        let points = self.points.read().await;
        match n {
            Some(n) if n < points.len() => points.iter().skip(points.len() - n).copied().collect(),
            _ => points.iter().copied().collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }
}
