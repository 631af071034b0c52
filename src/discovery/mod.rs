//! Worker auto-discovery over UDP broadcast (spec §4.5).
//!
//! The coordinator side ([`probe_cycle`]) broadcasts the magic bytes once
//! and collects unicast replies for a fixed window. The worker side
//! ([`listen`]) binds the same port and replies to every probe it sees.
//! Neither side retries a bind failure; per spec §4.5 that's fatal for the
//! worker and a logged-and-skipped cycle for the coordinator.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{self, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;

use crate::error::FarmError;

pub const DISCOVERY_MAGIC: &[u8] = b"BLENDER_DISCOVER";
const REPLY_PREFIX: &str = "CLIENT";
const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub hostname: String,
    pub ip: std::net::IpAddr,
    pub job_port: u16,
    pub source: SocketAddr,
}

/// Parses `CLIENT|<hostname>|<ip>|<job_port>`.
pub fn parse_reply(buf: &[u8], source: SocketAddr) -> Option<DiscoveryReply> {
    let text = std::str::from_utf8(buf).ok()?;
    let mut parts = text.split('|');
    if parts.next()? != REPLY_PREFIX {
        return None;
    }
    let hostname = parts.next()?.to_string();
    let ip: std::net::IpAddr = parts.next()?.parse().ok()?;
    let job_port: u16 = parts.next()?.parse().ok()?;
    Some(DiscoveryReply { hostname, ip, job_port, source })
}

/// One coordinator-side discovery cycle: broadcast the probe, then collect
/// replies for `collect_window`. A broadcast failure is logged and yields
/// an empty result rather than propagating, per spec §4.5 retry policy.
pub async fn probe_cycle(
    udp_port: u16,
    collect_window: Duration,
) -> Result<Vec<DiscoveryReply>, FarmError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;

    let target: SocketAddr = ([255, 255, 255, 255], udp_port).into();
    if let Err(err) = socket.send_to(DISCOVERY_MAGIC, target).await {
        tracing::warn!(%err, "discovery broadcast failed, retrying next cycle");
        return Ok(Vec::new());
    }

    let mut replies = Vec::new();
    let deadline = TokioInstant::now() + collect_window;
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let remaining = deadline.saturating_duration_since(TokioInstant::now());
        if remaining.is_zero() {
            break;
        }
        match time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, source))) => {
                if let Some(reply) = parse_reply(&buf[..n], source) {
                    replies.push(reply);
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "discovery recv error");
            }
            Err(_) => break, // collection window elapsed
        }
    }

    Ok(replies)
}

/// Runs coordinator-side discovery until `cancel` fires, invoking `on_cycle`
/// with each cycle's replies. Pauses `period` between cycles.
pub async fn run_probe_loop(
    udp_port: u16,
    period: Duration,
    collect_window: Duration,
    cancel: CancellationToken,
    mut on_cycle: impl FnMut(Vec<DiscoveryReply>) + Send,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = probe_cycle(udp_port, collect_window) => {
                match result {
                    Ok(replies) => on_cycle(replies),
                    Err(err) => tracing::warn!(%err, "discovery cycle failed"),
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(period) => {}
        }
    }
}

/// Worker-side discovery listener: binds `udp_port` and replies to every
/// probe with `CLIENT|<hostname>|<ip>|<job_port>`. Bind failure is fatal
/// for the worker (spec §4.5) and returned, not retried.
pub async fn listen(
    udp_port: u16,
    job_port: u16,
    advertised_ip: std::net::IpAddr,
    cancel: CancellationToken,
) -> Result<(), FarmError> {
    let socket = UdpSocket::bind(("0.0.0.0", udp_port))
        .await
        .map_err(|e| FarmError::NetworkError(format!("discovery bind failed: {e}")))?;

    let hostname = hostname().unwrap_or_else(|| "worker".to_string());
    let reply = format!("{REPLY_PREFIX}|{hostname}|{advertised_ip}|{job_port}");
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let recv = socket.recv_from(&mut buf);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = recv => {
                match result {
                    Ok((n, source)) if &buf[..n] == DISCOVERY_MAGIC => {
                        if let Err(err) = socket.send_to(reply.as_bytes(), source).await {
                            tracing::warn!(%err, "discovery reply send failed");
                        }
                    }
                    Ok(_) => {} // not a recognized probe, ignore
                    Err(err) => tracing::warn!(%err, "discovery listener recv error"),
                }
            }
        }
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        let output = std::process::Command::new("hostname").output().ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        let source: SocketAddr = "10.0.0.5:54321".parse().unwrap();
        let reply = parse_reply(b"CLIENT|worker-a|10.0.0.5|50010", source).unwrap();
        assert_eq!(reply.hostname, "worker-a");
        assert_eq!(reply.ip, "10.0.0.5".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(reply.job_port, 50010);
        assert_eq!(reply.source, source);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let source: SocketAddr = "10.0.0.5:1".parse().unwrap();
        assert!(parse_reply(b"SERVER|x|10.0.0.5|1", source).is_none());
    }

    #[test]
    fn rejects_malformed_fields() {
        let source: SocketAddr = "10.0.0.5:1".parse().unwrap();
        assert!(parse_reply(b"CLIENT|worker-a|not-an-ip|50010", source).is_none());
        assert!(parse_reply(b"CLIENT|worker-a|10.0.0.5|not-a-port", source).is_none());
        assert!(parse_reply(b"CLIENT|worker-a", source).is_none());
    }
}
