//! # engine::buffer
//!
//! Bounded per-instrument tick history.
//!
//! One logical writer per buffer (the instrument's worker); readers always
//! receive a snapshot `Vec`, never a live view, so a concurrent reader can
//! iterate while the writer keeps appending behind the lock that wraps the
//! buffer.

use std::collections::VecDeque;

use crate::models::Tick;

/// Fixed-capacity ring of recent ticks, oldest evicted first.
#[derive(Debug)]
pub struct TickBuffer {
    capacity: usize,
    ticks: VecDeque<Tick>,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ticks: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Append a tick, overwriting the oldest slot when full. O(1), total.
    pub fn add(&mut self, tick: Tick) {
        if self.ticks.len() >= self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    /// The `n` most recent ticks in arrival order (oldest → newest), as a
    /// snapshot copy. Returns everything available when fewer than `n`
    /// ticks are buffered.
    pub fn recent(&self, n: usize) -> Vec<Tick> {
        let skip = self.ticks.len().saturating_sub(n);
        self.ticks.iter().skip(skip).copied().collect()
    }

    /// Snapshot of the full buffered history.
    pub fn recent_all(&self) -> Vec<Tick> {
        self.ticks.iter().copied().collect()
    }

    /// Most recent tick, if any.
    pub fn latest(&self) -> Option<Tick> {
        self.ticks.back().copied()
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick(bid: f64) -> Tick {
        Tick {
            bid,
            ask: bid + 0.0002,
            volume: 1.0,
            time: Utc::now(),
        }
    }

    #[test]
    fn overwrites_oldest_at_capacity() {
        let mut buffer = TickBuffer::new(3);
        for bid in [1.0, 2.0, 3.0, 4.0] {
            buffer.add(tick(bid));
        }
        let recent = buffer.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].bid, 2.0);
        assert_eq!(recent[1].bid, 3.0);
        assert_eq!(recent[2].bid, 4.0);
    }

    #[test]
    fn long_sequence_keeps_exactly_last_capacity() {
        let capacity = 5;
        let mut buffer = TickBuffer::new(capacity);
        for i in 0..100 {
            buffer.add(tick(i as f64));
        }
        assert_eq!(buffer.len(), capacity);
        let recent = buffer.recent(capacity);
        let bids: Vec<f64> = recent.iter().map(|t| t.bid).collect();
        assert_eq!(bids, vec![95.0, 96.0, 97.0, 98.0, 99.0]);
    }

    #[test]
    fn recent_returns_all_when_underfilled() {
        let mut buffer = TickBuffer::new(10);
        buffer.add(tick(1.0));
        buffer.add(tick(2.0));
        assert_eq!(buffer.recent(5).len(), 2);
        assert_eq!(buffer.recent_all().len(), 2);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut buffer = TickBuffer::new(4);
        buffer.add(tick(1.0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert!(buffer.recent(4).is_empty());
    }
}
