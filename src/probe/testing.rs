//! Scripted prober for scheduler and monitor tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Capabilities, IcmpCapability, Prober};
use crate::registry::{FailureKind, ProbeResult, Target};

/// Succeeds with a fixed latency unless told otherwise per host.
#[derive(Debug, Default)]
pub(crate) struct FakeProber {
    latency_ms: f64,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    unsupported: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, host: &str, delay: Duration) -> Self {
        self.delays.insert(host.to_string(), delay);
        self
    }

    pub fn failing(mut self, host: &str) -> Self {
        self.failing.insert(host.to_string());
        self
    }

    pub fn panicking(mut self, host: &str) -> Self {
        self.panicking.insert(host.to_string());
        self
    }

    pub fn unsupported(mut self, host: &str) -> Self {
        self.unsupported.insert(host.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, target: &Target) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now();

        if let Some(delay) = self.delays.get(&target.host) {
            tokio::time::sleep(*delay).await;
        }
        if self.panicking.contains(&target.host) {
            panic!("scripted panic for {}", target.host);
        }
        if self.unsupported.contains(&target.host) {
            return ProbeResult::failure(target, FailureKind::Unsupported, "ICMP is not permitted", 0.0, timestamp);
        }
        if self.failing.contains(&target.host) {
            return ProbeResult::failure(target, FailureKind::Refused, "connection refused", 0.2, timestamp);
        }

        ProbeResult::success(target, self.latency_ms, timestamp)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tcp: true,
            icmp: IcmpCapability::Unavailable,
        }
    }
}
