//! Probe module for network monitoring.
//!
//! Supports TCP connect and ICMP echo (ping) probes.

mod ping;
mod tcp;
#[cfg(test)]
pub(crate) mod testing;

pub use ping::*;
pub use tcp::*;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::registry::{FailureKind, ProbeResult, ProbeType, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused")]
    Refused,
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::Timeout(_) => FailureKind::Timeout,
            ProbeError::Refused => FailureKind::Refused,
            ProbeError::Dns(_) => FailureKind::Dns,
            ProbeError::Unreachable(_) => FailureKind::Unreachable,
            ProbeError::Network(_) => FailureKind::Network,
            ProbeError::Config(_) => FailureKind::Config,
            ProbeError::Unsupported(_) => FailureKind::Unsupported,
            ProbeError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// What the prober can do in this environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub tcp: bool,
    pub icmp: IcmpCapability,
}

/// A single bounded-time connectivity check.
///
/// Implementations never fail: every outcome, including timeouts, is a
/// `ProbeResult` with `ok = false`.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, target: &Target) -> ProbeResult;

    fn capabilities(&self) -> Capabilities;
}

/// Prober that talks to the real network.
#[derive(Debug, Clone)]
pub struct NetworkProber {
    timeout: Duration,
    jitter: Duration,
}

impl NetworkProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            jitter: Duration::from_millis(100),
        }
    }

    /// Upper bound of the random delay before each probe.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, target: &Target) -> ProbeResult {
        // Spread a tick's probes out a little to avoid a thundering herd
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let delay = rand::random::<u64>() % jitter_ms;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match target.probe_type {
            ProbeType::Tcp => run_tcp_probe(&target.host, target.port, self.timeout).await,
            ProbeType::Icmp => run_ping_probe(&target.host, self.timeout).await,
        };

        // Enforce timeout check
        let outcome = match outcome {
            Ok(latency) if latency >= duration_ms(self.timeout) => {
                Err(ProbeError::Timeout(self.timeout))
            }
            other => other,
        };

        match outcome {
            Ok(latency) => ProbeResult::success(target, latency, timestamp),
            Err(e) => {
                tracing::debug!("Probe of {} ({}) failed: {}", target.name, target.endpoint(), e);
                ProbeResult::failure(target, e.kind(), e.to_string(), duration_ms(start.elapsed()), timestamp)
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tcp: true,
            icmp: icmp_capability(),
        }
    }
}

/// Milliseconds with sub-millisecond precision.
pub(crate) fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
