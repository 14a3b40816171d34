//! Frame latency tracking
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use log::debug;
use std::collections::VecDeque;

/// Sliding window size for the latency history.
const HISTORY_CAPACITY: usize = 30;

/// Average latencies (ms) below which one / two queued frames suffice.
const SINGLE_FRAME_LATENCY_MS: f64 = 60.0;
const DOUBLE_FRAME_LATENCY_MS: f64 = 100.0;

/// Bounded history of frame-arrival-to-now latencies. The rolling average is
/// recomputed on every append and drives the frame queue's target depth.
#[derive(Debug)]
pub struct LatencyTracker {
    history: VecDeque<f64>,
    average_ms: f64,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            average_ms: 0.0,
        }
    }

    /// Records one frame latency in milliseconds, evicting the oldest sample
    /// once the window is full.
    pub fn record(&mut self, latency_ms: f64) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(latency_ms);

        let sum: f64 = self.history.iter().sum();
        self.average_ms = sum / self.history.len() as f64;
        debug!(
            "latency sample {:.1}ms, rolling average {:.1}ms over {} samples",
            latency_ms,
            self.average_ms,
            self.history.len()
        );
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    /// Target queue depth for the current latency regime. Higher latency asks
    /// for a deeper queue to absorb jitter; the queue clamps this further by
    /// the configured buffering strategy.
    pub fn recommended_queue_depth(&self) -> usize {
        if self.history.is_empty() || self.average_ms <= SINGLE_FRAME_LATENCY_MS {
            1
        } else if self.average_ms <= DOUBLE_FRAME_LATENCY_MS {
            2
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_bounded_and_average_follows() {
        let mut tracker = LatencyTracker::new();
        for _ in 0..HISTORY_CAPACITY {
            tracker.record(100.0);
        }
        assert!((tracker.average_ms() - 100.0).abs() < 1e-9);

        // A full window of 10ms samples must fully displace the old ones.
        for _ in 0..HISTORY_CAPACITY {
            tracker.record(10.0);
        }
        assert!((tracker.average_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn queue_depth_recommendation_scales_with_latency() {
        let mut tracker = LatencyTracker::new();
        assert_eq!(tracker.recommended_queue_depth(), 1);

        tracker.record(40.0);
        assert_eq!(tracker.recommended_queue_depth(), 1);

        let mut tracker = LatencyTracker::new();
        for _ in 0..5 {
            tracker.record(80.0);
        }
        assert_eq!(tracker.recommended_queue_depth(), 2);

        for _ in 0..HISTORY_CAPACITY {
            tracker.record(300.0);
        }
        assert_eq!(tracker.recommended_queue_depth(), 3);
    }
}
