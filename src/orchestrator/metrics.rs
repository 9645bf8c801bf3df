//! Rolling execution-duration metrics (spec §4.4, §5): a bounded sample
//! window feeding avg/p95/p99, plus the plan-level queued/dispatched/
//! completed/failed/retried counters.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub samples: usize,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Rolling window capped at `capacity` samples (spec §5 resource cap: ≤
/// 1000), with oldest-first eviction.
pub struct MetricsWindow {
    durations: VecDeque<u64>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        MetricsWindow {
            durations: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, duration_ms: u64) {
        self.durations.push_back(duration_ms);
        while self.durations.len() > self.capacity {
            self.durations.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if self.durations.is_empty() {
            return MetricsSnapshot::default();
        }
        let mut sorted: Vec<u64> = self.durations.iter().copied().collect();
        sorted.sort_unstable();
        let samples = sorted.len();
        let avg = sorted.iter().sum::<u64>() as f64 / samples as f64;
        MetricsSnapshot {
            samples,
            avg,
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64) * p).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index] as f64
}

/// Plan-scoped counters for `queued`/`dispatched`/`completed`/`failed`/
/// `retried`, surfaced alongside the rolling duration metrics (spec §4.4).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanCounters {
    pub queued: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
}
