//! Time-bounded result window and its summary statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::health::{classify, HealthStatus};
use crate::registry::{Endpoint, ProbeResult};

/// Results of one target within the trailing window, oldest first.
#[derive(Debug, Clone)]
pub struct ResultWindow {
    endpoint: Endpoint,
    results: VecDeque<ProbeResult>,
}

impl ResultWindow {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            results: VecDeque::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Insert keeping timestamp order; probes of one tick may complete in any order.
    pub fn insert(&mut self, result: ProbeResult) {
        match self.results.back() {
            Some(last) if last.timestamp > result.timestamp => {
                let pos = self
                    .results
                    .partition_point(|r| r.timestamp <= result.timestamp);
                self.results.insert(pos, result);
            }
            _ => self.results.push_back(result),
        }
    }

    /// Drop results older than `cutoff`. Returns how many were dropped.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.results.len();
        while self.results.front().is_some_and(|r| r.timestamp < cutoff) {
            self.results.pop_front();
        }
        before - self.results.len()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Clear and rebind to a new endpoint.
    pub fn reset(&mut self, endpoint: Endpoint) {
        self.results.clear();
        self.endpoint = endpoint;
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn summary(&self) -> WindowSummary {
        if self.results.is_empty() {
            return WindowSummary::empty();
        }

        let total = self.results.len();
        let mut latencies: Vec<f64> = self
            .results
            .iter()
            .filter(|r| r.ok)
            .map(|r| r.latency_ms)
            .collect();
        latencies.sort_by(f64::total_cmp);

        let success_rate = Some(latencies.len() as f64 / total as f64);
        let average = mean(&latencies);
        let p90 = percentile(&latencies, 0.90);

        WindowSummary {
            success_rate,
            average,
            p90,
            last_result: self.results.back().cloned(),
            samples: total,
            health: classify(success_rate, average, p90),
        }
    }
}

/// Summary statistics of a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    /// `None` when the window is empty, distinct from `Some(0.0)`.
    pub success_rate: Option<f64>,
    /// Mean latency of successful results.
    pub average: Option<f64>,
    /// Linearly interpolated 90th percentile latency of successful results.
    pub p90: Option<f64>,
    pub last_result: Option<ProbeResult>,
    pub samples: usize,
    pub health: HealthStatus,
}

impl WindowSummary {
    pub fn empty() -> Self {
        Self {
            success_rate: None,
            average: None,
            p90: None,
            last_result: None,
            samples: 0,
            health: HealthStatus::Unknown,
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile of ascending-sorted values, interpolating between the
/// neighbours of position `(n - 1) * q`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = last as f64 * q.clamp(0.0, 1.0);
    let lower = pos.floor() as usize;
    let upper = (pos.ceil() as usize).min(last);
    let frac = pos - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}
