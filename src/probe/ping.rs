//! Ping probe implementation with native ICMP and command fallback.
//!
//! Native probes use blocking sockets in spawn_blocking for sub-millisecond
//! timing precision. When neither an ICMP socket nor a `ping` binary is
//! available the capability is reported as unavailable and probes fail fast
//! with [`ProbeError::Unsupported`].

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{duration_ms, ProbeError};

/// ICMP capability of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IcmpCapability {
    /// ICMP sockets can be opened directly
    Native,
    /// Only the system `ping` command is available
    Command,
    /// The environment forbids ICMP entirely
    Unavailable,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

/// Detected once per process.
pub fn icmp_capability() -> IcmpCapability {
    *ICMP_CAPABILITY.get_or_init(detect_icmp_capability)
}

fn detect_icmp_capability() -> IcmpCapability {
    if open_icmp_socket(Domain::IPV4, Protocol::ICMPV4).is_ok() {
        tracing::info!("Ping probe: using native ICMP sockets");
        return IcmpCapability::Native;
    }

    if which::which("ping").is_ok() {
        tracing::info!("Ping probe: native ICMP unavailable, using ping command");
        return IcmpCapability::Command;
    }

    tracing::warn!("Ping probe: ICMP is not available in this environment");
    IcmpCapability::Unavailable
}

/// Generate a unique identifier for each ping request.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Open an ICMP socket, RAW first (privileged) then DGRAM (unprivileged).
///
/// Returns the socket and whether it is a datagram socket.
fn open_icmp_socket(domain: Domain, protocol: Protocol) -> io::Result<(Socket, bool)> {
    match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => Ok((socket, false)),
        Err(_) => Socket::new(domain, Type::DGRAM, Some(protocol)).map(|s| (s, true)),
    }
}

/// Run a ping probe against the given host.
///
/// Returns the round trip in milliseconds.
pub async fn run_ping_probe(host: &str, timeout: Duration) -> Result<f64, ProbeError> {
    run_ping_probe_with(icmp_capability(), host, timeout).await
}

/// Run a ping probe using the given capability instead of the detected one.
pub async fn run_ping_probe_with(
    capability: IcmpCapability,
    host: &str,
    timeout: Duration,
) -> Result<f64, ProbeError> {
    match capability {
        IcmpCapability::Unavailable => Err(ProbeError::Unsupported(
            "ICMP is not permitted in this environment".to_string(),
        )),
        IcmpCapability::Command => run_ping_command(host, timeout).await,
        IcmpCapability::Native => {
            let started = Instant::now();
            let ip = resolve_within(host, timeout).await?;

            // Resolution spends part of the probe's time budget
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout(timeout));
            }

            let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, remaining))
                .await
                .map_err(|e| ProbeError::Internal(format!("spawn_blocking failed: {}", e)))?;

            match result {
                Err(ProbeError::Unsupported(reason)) => {
                    tracing::warn!("Native ping to {} not permitted ({}), trying ping command", host, reason);
                    run_ping_command(host, remaining).await
                }
                other => other,
            }
        }
    }
}

/// Resolve `host`, giving up after `timeout`.
async fn resolve_within(host: &str, timeout: Duration) -> Result<IpAddr, ProbeError> {
    match tokio::time::timeout(timeout, resolve_address(host)).await {
        Ok(resolved) => resolved,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Resolve hostname to IP address.
async fn resolve_address(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Dns(e.to_string()))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Dns(format!("no addresses found for {}", host)))
}

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };

    let (socket, is_dgram) = open_icmp_socket(domain, protocol).map_err(socket_error)?;
    socket.set_write_timeout(Some(timeout)).map_err(socket_error)?;

    let dest = SocketAddr::new(ip, 0);
    socket.connect(&dest.into()).map_err(socket_error)?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(request_type, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(socket_error)?;

    let mut buf = [0u8; 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket.set_read_timeout(Some(remaining)).map_err(socket_error)?;

        let len = match (&socket).read(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(ProbeError::Timeout(timeout))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(socket_error(e)),
        };
        let elapsed = start.elapsed();

        if is_echo_reply(&buf[..len], ip, reply_type, identifier, sequence, is_dgram) {
            return Ok(duration_ms(elapsed));
        }
        // Someone else's ICMP traffic, keep waiting
    }
}

fn socket_error(e: io::Error) -> ProbeError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ProbeError::Unsupported(e.to_string()),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Network(e.to_string()),
        _ => ProbeError::Unreachable(e.to_string()),
    }
}

/// Match a received packet against our outstanding request.
///
/// RAW IPv4 sockets deliver the IP header too. Datagram sockets have their
/// identifier rewritten by the kernel, so only the sequence is compared there.
fn is_echo_reply(
    packet: &[u8],
    ip: IpAddr,
    reply_type: u8,
    identifier: u16,
    sequence: u16,
    is_dgram: bool,
) -> bool {
    let offset = match ip {
        IpAddr::V4(_) if !packet.is_empty() && packet[0] >> 4 == 4 => usize::from(packet[0] & 0x0F) * 4,
        _ => 0,
    };

    let Some(icmp) = packet.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == reply_type && reply_seq == sequence && (is_dgram || reply_id == identifier)
}

/// Build an ICMP or ICMPv6 Echo Request packet (code 0, 56 byte payload).
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = request_type;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum (it covers a pseudo-header)
    if request_type == ECHO_REQUEST_V4 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Arguments for a single echo with the given timeout on this OS.
fn ping_command_args(host: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1).to_string();
    if cfg!(target_os = "windows") {
        let ms = timeout.as_millis().max(1).to_string();
        vec!["-n".into(), "1".into(), "-w".into(), ms, host.into()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-t".into(), secs, host.into()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs, host.into()]
    }
}

/// Run ping via command execution (fallback).
async fn run_ping_command(host: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let start = Instant::now();

    let child = Command::new("ping")
        .args(ping_command_args(host, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // ping only takes whole seconds, give it a little headroom
    let deadline = timeout.max(Duration::from_secs(1)) + Duration::from_millis(500);
    let output = match tokio::time::timeout(deadline, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ProbeError::Unsupported("ping command not found".to_string()))
        }
        Ok(Err(e)) => return Err(ProbeError::Network(format!("failed to execute ping: {}", e))),
        Err(_) => return Err(ProbeError::Timeout(timeout)),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(classify_ping_failure(&stdout, &stderr, timeout));
    }

    // Some platforms omit a per-packet time for very fast replies
    Ok(parse_ping_output(&stdout).unwrap_or_else(|| duration_ms(start.elapsed())))
}

fn classify_ping_failure(stdout: &str, stderr: &str, timeout: Duration) -> ProbeError {
    let combined = format!("{}\n{}", stdout, stderr).to_lowercase();

    if combined.contains("unknown host")
        || combined.contains("cannot resolve")
        || combined.contains("name or service not known")
        || combined.contains("could not find host")
    {
        return ProbeError::Dns(stderr.trim().to_string());
    }
    if combined.contains("operation not permitted") || combined.contains("permission denied") {
        return ProbeError::Unsupported(stderr.trim().to_string());
    }
    if combined.contains("unreachable") {
        return ProbeError::Unreachable(stdout.trim().to_string());
    }
    if combined.contains("timeout")
        || combined.contains("timed out")
        || combined.contains("100% packet loss")
        || combined.contains("100.0% packet loss")
    {
        return ProbeError::Timeout(timeout);
    }

    ProbeError::Network(format!("ping failed: {}", stderr.trim()))
}

/// Parse ping command output for latency in milliseconds.
fn parse_ping_output(output: &str) -> Option<f64> {
    // Per-packet response "time=X.XXX ms" or "time<1ms" (Linux, macOS, Windows)
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"(?i)time[=<]\s*(?P<val>[0-9.]+)\s*ms").expect("static regex"));

    if let Some(ms) = per_packet
        .captures(output)
        .and_then(|caps| caps.name("val")?.as_str().parse::<f64>().ok())
    {
        return Some(ms);
    }

    // Summary line "round-trip min/avg/max/stddev = ..." (macOS) or "rtt min/avg/max/mdev = ..." (Linux)
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .expect("static regex")
    });

    summary
        .captures(output)
        .and_then(|caps| caps.get(2)?.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn test_unavailable_icmp_fails_fast_as_unsupported() {
        let start = Instant::now();
        let err = run_ping_probe_with(IcmpCapability::Unavailable, "192.0.2.1", Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ProbeError::Unsupported(_)));
        assert_eq!(err.kind(), crate::registry::FailureKind::Unsupported);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_resolution_is_bounded_by_timeout() {
        let ip = resolve_within("192.0.2.7", Duration::from_millis(10)).await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            resolve_within("pulsewatch-test.invalid", Duration::from_millis(50)),
        )
        .await
        .expect("resolution outlived its timeout");

        assert!(matches!(outcome, Err(ProbeError::Timeout(_)) | Err(ProbeError::Dns(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_echo_request(ECHO_REQUEST_V4, 0x1234, 0x0001);
        // A packet with its checksum filled in sums to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0xFF]), 0x00FF);
    }

    #[test]
    fn test_build_icmp_packet() {
        let packet = build_echo_request(ECHO_REQUEST_V4, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_echo_request(ECHO_REQUEST_V6, 1, 2);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_echo_reply_matching_raw_v4() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut packet = vec![0u8; 28];
        packet[0] = 0x45; // IPv4, 20 byte header
        packet[20] = ECHO_REPLY_V4;
        packet[24..26].copy_from_slice(&7u16.to_be_bytes());
        packet[26..28].copy_from_slice(&9u16.to_be_bytes());

        assert!(is_echo_reply(&packet, ip, ECHO_REPLY_V4, 7, 9, false));
        assert!(!is_echo_reply(&packet, ip, ECHO_REPLY_V4, 8, 9, false));
        assert!(!is_echo_reply(&packet, ip, ECHO_REPLY_V4, 7, 10, false));
    }

    #[test]
    fn test_echo_reply_matching_dgram_ignores_identifier() {
        let ip = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let mut packet = vec![0u8; 8];
        packet[0] = ECHO_REPLY_V6;
        packet[4..6].copy_from_slice(&999u16.to_be_bytes());
        packet[6..8].copy_from_slice(&3u16.to_be_bytes());

        assert!(is_echo_reply(&packet, ip, ECHO_REPLY_V6, 1, 3, true));
        assert!(!is_echo_reply(&packet[..6], ip, ECHO_REPLY_V6, 1, 3, true));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!((latency - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_windows_sub_millisecond() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_output(output), Some(1.0));

        let output = "Reply from 1.1.1.1: bytes=32 time=14ms TTL=57";
        assert_eq!(parse_ping_output(output), Some(14.0));
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let latency = parse_ping_output(output).unwrap();
        assert!((latency - 17.906).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_linux_summary_prefers_per_packet() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 12.300/12.300/12.300/0.000 ms"#;
        assert_eq!(parse_ping_output(output), Some(12.3));
        assert_eq!(parse_ping_output("no timing here"), None);
    }

    #[test]
    fn test_classify_ping_failure() {
        let timeout = Duration::from_secs(2);
        assert!(matches!(
            classify_ping_failure("", "ping: unknown host nowhere", timeout),
            ProbeError::Dns(_)
        ));
        assert!(matches!(
            classify_ping_failure("1 packets transmitted, 0 received, 100% packet loss", "", timeout),
            ProbeError::Timeout(_)
        ));
        assert!(matches!(
            classify_ping_failure("", "ping: socket: Operation not permitted", timeout),
            ProbeError::Unsupported(_)
        ));
        assert!(matches!(
            classify_ping_failure("From 10.0.0.1 icmp_seq=1 Destination Host Unreachable", "", timeout),
            ProbeError::Unreachable(_)
        ));
    }

    #[test]
    fn test_ping_command_args_single_echo() {
        let args = ping_command_args("example.com", Duration::from_millis(2000));
        assert_eq!(args.last().map(String::as_str), Some("example.com"));
        assert!(args.iter().any(|a| a == "1"));
    }
}
