//! Health classification from window statistics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete health category of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Optimal,
    Great,
    Good,
    Warn,
    Bad,
    Down,
    Unknown,
}

impl HealthStatus {
    /// Position in `down < bad < warn < good < great < optimal`. `None` for unknown.
    pub fn rank(self) -> Option<u8> {
        match self {
            HealthStatus::Down => Some(0),
            HealthStatus::Bad => Some(1),
            HealthStatus::Warn => Some(2),
            HealthStatus::Good => Some(3),
            HealthStatus::Great => Some(4),
            HealthStatus::Optimal => Some(5),
            HealthStatus::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Optimal => "optimal",
            HealthStatus::Great => "great",
            HealthStatus::Good => "good",
            HealthStatus::Warn => "warn",
            HealthStatus::Bad => "bad",
            HealthStatus::Down => "down",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a target. First matching tier wins.
///
/// `optimal` and `great` need latency data within bounds; `good` also accepts
/// missing latency data.
pub fn classify(success_rate: Option<f64>, average: Option<f64>, p90: Option<f64>) -> HealthStatus {
    let Some(rate) = success_rate else {
        return HealthStatus::Unknown;
    };

    let within = |value: Option<f64>, bound: f64| value.is_some_and(|v| v <= bound);
    let within_or_missing = |value: Option<f64>, bound: f64| value.map_or(true, |v| v <= bound);

    if rate >= 0.995 && within(average, 15.0) && within(p90, 30.0) {
        HealthStatus::Optimal
    } else if rate >= 0.99 && within(average, 30.0) && within(p90, 80.0) {
        HealthStatus::Great
    } else if rate >= 0.98 && within_or_missing(average, 80.0) && within_or_missing(p90, 200.0) {
        HealthStatus::Good
    } else if rate >= 0.95 {
        HealthStatus::Warn
    } else if rate >= 0.70 {
        HealthStatus::Bad
    } else {
        HealthStatus::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_is_unknown() {
        assert_eq!(classify(None, None, None), HealthStatus::Unknown);
        assert_eq!(classify(None, Some(1.0), Some(1.0)), HealthStatus::Unknown);
    }

    #[test]
    fn test_tiers() {
        assert_eq!(classify(Some(1.0), Some(10.0), Some(25.0)), HealthStatus::Optimal);
        assert_eq!(classify(Some(1.0), Some(13.1), Some(46.3)), HealthStatus::Great);
        assert_eq!(classify(Some(0.99), Some(30.0), Some(80.0)), HealthStatus::Great);
        assert_eq!(classify(Some(0.985), Some(50.0), Some(150.0)), HealthStatus::Good);
        assert_eq!(classify(Some(0.95), Some(5.0), Some(5.0)), HealthStatus::Warn);
        assert_eq!(classify(Some(0.98), Some(81.0), Some(100.0)), HealthStatus::Warn);
        assert_eq!(classify(Some(0.70), None, None), HealthStatus::Bad);
        assert_eq!(classify(Some(0.6999), Some(1.0), Some(1.0)), HealthStatus::Down);
        assert_eq!(classify(Some(0.0), None, None), HealthStatus::Down);
    }

    #[test]
    fn test_missing_latency_only_passes_good_tier() {
        // No latency data can never be optimal or great, but may be good
        assert_eq!(classify(Some(1.0), None, None), HealthStatus::Good);
        assert_eq!(classify(Some(1.0), Some(10.0), None), HealthStatus::Good);
        assert_eq!(classify(Some(0.97), None, None), HealthStatus::Warn);
    }

    #[test]
    fn test_classification_is_total_and_ordered() {
        let rates = [None, Some(0.0), Some(0.5), Some(0.7), Some(0.9), Some(0.95), Some(0.98), Some(0.99), Some(0.995), Some(1.0)];
        let latencies = [None, Some(0.0), Some(10.0), Some(15.0), Some(29.0), Some(79.0), Some(150.0), Some(500.0)];

        for &rate in &rates {
            for &avg in &latencies {
                for &p90 in &latencies {
                    let status = classify(rate, avg, p90);
                    assert_eq!(status == HealthStatus::Unknown, rate.is_none());

                    // Better success rate never gives a worse category
                    if let Some(r) = rate {
                        let better = classify(Some((r + 0.05).min(1.0)), avg, p90);
                        assert!(better.rank() >= status.rank(), "{:?} {:?} {:?}", rate, avg, p90);
                    }
                }
            }
        }
    }

    #[test]
    fn test_rank_and_display() {
        assert!(HealthStatus::Optimal.rank() > HealthStatus::Great.rank());
        assert!(HealthStatus::Bad.rank() > HealthStatus::Down.rank());
        assert_eq!(HealthStatus::Unknown.rank(), None);
        assert_eq!(HealthStatus::Warn.to_string(), "warn");
        assert_eq!(serde_json::to_value(HealthStatus::Optimal).unwrap(), "optimal");
    }
}
