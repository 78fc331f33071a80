//! Target and probe result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProbeType {
    #[default]
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "ping", alias = "icmp")]
    Icmp,
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeType::Tcp => f.write_str("tcp"),
            ProbeType::Icmp => f.write_str("ping"),
        }
    }
}

/// A monitoring target configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub host: String,
    /// 0 when the probe type has no port.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub probe_type: ProbeType,
}

impl Target {
    pub fn tcp(id: &str, host: &str, port: u16) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            host: host.to_string(),
            port,
            probe_type: ProbeType::Tcp,
        }
    }

    pub fn icmp(id: &str, host: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            host: host.to_string(),
            port: 0,
            probe_type: ProbeType::Icmp,
        }
    }

    /// The connection-identifying part of the target.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            probe_type: self.probe_type,
        }
    }
}

/// `host:port:probe_type` of a target. Statistics are only valid for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub probe_type: ProbeType,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.probe_type {
            ProbeType::Tcp => write!(f, "tcp://{}:{}", self.host, self.port),
            ProbeType::Icmp => write!(f, "ping://{}", self.host),
        }
    }
}

/// Machine-readable reason attached to a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Refused,
    Dns,
    Unreachable,
    Network,
    /// The target cannot be probed as configured (e.g. TCP without a port).
    Config,
    /// The probe type cannot run in this environment.
    Unsupported,
    /// The probe never ran to completion (task panic or cancellation).
    Internal,
}

impl FailureKind {
    /// The target could not be probed at all, so the result says nothing
    /// about its reachability.
    pub fn is_configuration(self) -> bool {
        matches!(self, FailureKind::Config | FailureKind::Unsupported)
    }
}

/// Outcome of one probe of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target_id: String,
    pub endpoint: Endpoint,
    pub ok: bool,
    /// Round trip in milliseconds. Only meaningful when `ok`.
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(target: &Target, latency_ms: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_id: target.id.clone(),
            endpoint: target.endpoint(),
            ok: true,
            latency_ms: latency_ms.max(0.0),
            error: None,
            error_kind: None,
            timestamp,
        }
    }

    pub fn failure(
        target: &Target,
        kind: FailureKind,
        error: impl Into<String>,
        elapsed_ms: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id: target.id.clone(),
            endpoint: target.endpoint(),
            ok: false,
            latency_ms: elapsed_ms.max(0.0),
            error: Some(error.into()),
            error_kind: Some(kind),
            timestamp,
        }
    }
}
