//! Configuration module for PulseWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::monitor::MonitorConfig;
use crate::stream::DEFAULT_STREAM_CAPACITY;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the JSON target list (default: "targets.json")
    pub targets_path: PathBuf,
    /// Time between probe ticks (default: 5s)
    pub probe_interval: Duration,
    /// Per-probe timeout (default: 2000ms)
    pub probe_timeout: Duration,
    /// Length of the statistics window (default: 300s)
    pub window: Duration,
    /// Tick gap treated as a resume from suspension (default: 30s)
    pub resume_gap: Duration,
    /// Results buffered per stream subscriber (default: 1024)
    pub stream_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            targets_path: PathBuf::from("targets.json"),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(2000),
            window: Duration::from_secs(300),
            resume_gap: Duration::from_secs(30),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PULSEWATCH_TARGETS_PATH`: Target list file (default: "targets.json")
    /// - `PULSEWATCH_PROBE_INTERVAL_SECS`: Tick interval (default: 5)
    /// - `PULSEWATCH_PROBE_TIMEOUT_MS`: Probe timeout (default: 2000)
    /// - `PULSEWATCH_WINDOW_SECS`: Statistics window (default: 300)
    /// - `PULSEWATCH_RESUME_GAP_SECS`: Resume detection gap (default: 30)
    /// - `PULSEWATCH_STREAM_CAPACITY`: Stream buffer size (default: 1024)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// Unparseable and zero values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "PULSEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(path) = lookup("PULSEWATCH_TARGETS_PATH").filter(|p| !p.trim().is_empty()) {
            cfg.targets_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var(&lookup, "PULSEWATCH_PROBE_INTERVAL_SECS") {
            cfg.probe_interval = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_var(&lookup, "PULSEWATCH_PROBE_TIMEOUT_MS") {
            cfg.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var(&lookup, "PULSEWATCH_WINDOW_SECS") {
            cfg.window = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var(&lookup, "PULSEWATCH_RESUME_GAP_SECS") {
            cfg.resume_gap = Duration::from_secs(secs);
        }

        if let Some(capacity) = parse_var(&lookup, "PULSEWATCH_STREAM_CAPACITY") {
            cfg.stream_capacity = capacity;
        }

        cfg
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            probe_interval: self.probe_interval,
            probe_timeout: self.probe_timeout,
            window: self.window,
            resume_gap: self.resume_gap,
            stream_capacity: self.stream_capacity,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Some(value),
        _ => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}
