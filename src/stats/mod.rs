//! Rolling statistics: per-target result windows and health classification.

mod health;
mod window;

pub use health::*;
pub use window::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::registry::{FailureKind, ProbeResult, Target};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Summary of one target, as listed for all targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSummary {
    pub target_id: String,
    pub name: String,
    #[serde(flatten)]
    pub summary: WindowSummary,
}

/// What a target list change did to the windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Targets whose endpoint changed; their windows were cleared.
    pub reset: Vec<String>,
    /// Targets no longer present; their windows were discarded.
    pub removed: Vec<String>,
}

/// Per-target result windows behind one lock.
#[derive(Debug)]
pub struct WindowAggregator {
    window: chrono::Duration,
    windows: Mutex<HashMap<String, ResultWindow>>,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl WindowAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(300)),
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ResultWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a result. Returns `false` if it was rejected as expired, as
    /// belonging to a different endpoint than the target's window, or as a
    /// configuration failure (unsupported probe type, missing port) that says
    /// nothing about reachability.
    pub fn record(&self, result: ProbeResult) -> bool {
        self.record_at(result, Utc::now())
    }

    pub fn record_at(&self, result: ProbeResult, now: DateTime<Utc>) -> bool {
        if result.error_kind.is_some_and(FailureKind::is_configuration) {
            tracing::debug!(
                "Not recording {:?} result for {}",
                result.error_kind,
                result.target_id
            );
            return false;
        }

        let cutoff = now - self.window;
        if result.timestamp < cutoff {
            return false;
        }

        let mut windows = self.lock();
        let window = windows
            .entry(result.target_id.clone())
            .or_insert_with(|| ResultWindow::new(result.endpoint.clone()));

        if *window.endpoint() != result.endpoint {
            tracing::debug!(
                "Dropping stale result for {} ({} != {})",
                result.target_id,
                result.endpoint,
                window.endpoint()
            );
            return false;
        }

        window.insert(result);
        window.prune(cutoff);
        true
    }

    /// Statistics over the target's window. Unknown ids summarize as empty.
    pub fn summarize(&self, target_id: &str) -> WindowSummary {
        self.summarize_at(target_id, Utc::now())
    }

    pub fn summarize_at(&self, target_id: &str, now: DateTime<Utc>) -> WindowSummary {
        let cutoff = now - self.window;
        let mut windows = self.lock();
        match windows.get_mut(target_id) {
            Some(window) => {
                window.prune(cutoff);
                window.summary()
            }
            None => WindowSummary::empty(),
        }
    }

    /// Summaries in the order of `targets`.
    pub fn summarize_all(&self, targets: &[Target]) -> Vec<TargetSummary> {
        let now = Utc::now();
        targets
            .iter()
            .map(|t| TargetSummary {
                target_id: t.id.clone(),
                name: t.name.clone(),
                summary: self.summarize_at(&t.id, now),
            })
            .collect()
    }

    /// Clear one target's window. Returns whether it had one.
    pub fn reset(&self, target_id: &str) -> bool {
        match self.lock().get_mut(target_id) {
            Some(window) => {
                window.clear();
                true
            }
            None => false,
        }
    }

    /// Clear every window. Returns how many there were.
    pub fn reset_all(&self) -> usize {
        let mut windows = self.lock();
        windows.values_mut().for_each(ResultWindow::clear);
        windows.len()
    }

    pub fn remove(&self, target_id: &str) -> bool {
        self.lock().remove(target_id).is_some()
    }

    /// Bring windows in line with a new target list.
    pub fn sync(&self, targets: &[Target]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut windows = self.lock();

        let wanted: HashSet<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        windows.retain(|id, _| {
            let keep = wanted.contains(id.as_str());
            if !keep {
                report.removed.push(id.clone());
            }
            keep
        });

        for target in targets {
            let endpoint = target.endpoint();
            match windows.get_mut(&target.id) {
                Some(window) if *window.endpoint() != endpoint => {
                    window.reset(endpoint);
                    report.reset.push(target.id.clone());
                }
                Some(_) => {}
                None => {
                    windows.insert(target.id.clone(), ResultWindow::new(endpoint));
                }
            }
        }

        report.removed.sort();
        report
    }

    /// Number of results currently held for a target.
    pub fn len(&self, target_id: &str) -> usize {
        self.lock().get(target_id).map_or(0, ResultWindow::len)
    }
}
