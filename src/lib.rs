//! PulseWatch - reachability monitoring core.
//!
//! Probes a list of targets over TCP or ICMP on a fixed cadence, keeps a
//! rolling window of results per target and classifies each target's health.

pub mod config;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod stream;
pub mod web;
