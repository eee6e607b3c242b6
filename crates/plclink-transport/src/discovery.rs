//! Network discovery helpers.
//!
//! These never open a registered channel; they only probe.

use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::error::Result;

/// Outcome of probing a single host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub host: Ipv4Addr,
    pub port: u16,
    pub reachable: bool,
    /// Connect latency in milliseconds, when reachable.
    pub latency_ms: Option<f64>,
}

/// A reply collected during broadcast discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub addr: SocketAddr,
    pub payload: Bytes,
}

/// Probe `base.<suffix>:port` for every suffix in `suffixes`.
///
/// Probes run in batches of `config.batch_size`; each batch completes before
/// the next starts. Results come back sorted by host.
pub async fn scan_hosts(
    base: Ipv4Addr,
    suffixes: RangeInclusive<u8>,
    port: u16,
    config: &ScanConfig,
) -> Vec<ProbeResult> {
    let [a, b, c, _] = base.octets();
    let hosts: Vec<Ipv4Addr> = suffixes.map(|d| Ipv4Addr::new(a, b, c, d)).collect();
    info!(
        network = %format_args!("{a}.{b}.{c}.0"),
        port,
        hosts = hosts.len(),
        "scanning"
    );

    let mut results = Vec::with_capacity(hosts.len());
    for batch in hosts.chunks(config.batch_size.max(1)) {
        let mut probes = JoinSet::new();
        for &host in batch {
            probes.spawn(probe(host, port, config.probe_timeout));
        }
        while let Some(joined) = probes.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
        }
    }

    results.sort_by_key(|result| result.host);
    results
}

async fn probe(host: Ipv4Addr, port: u16, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let reachable = matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    );
    let latency_ms = reachable.then(|| started.elapsed().as_secs_f64() * 1000.0);
    if reachable {
        debug!(%host, port, ?latency_ms, "probe reachable");
    }
    ProbeResult {
        host,
        port,
        reachable,
        latency_ms,
    }
}

/// Broadcast `message` to `255.255.255.255:port` once and collect replies
/// until `duration` elapses.
pub async fn discover_broadcast(
    port: u16,
    message: &[u8],
    duration: Duration,
) -> Result<Vec<DiscoveryReply>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(message, (Ipv4Addr::BROADCAST, port)).await?;
    collect_replies(&socket, duration).await
}

async fn collect_replies(socket: &UdpSocket, duration: Duration) -> Result<Vec<DiscoveryReply>> {
    let deadline = tokio::time::Instant::now() + duration;
    let mut replies = Vec::new();
    let mut buf = vec![0u8; 2048];

    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                debug!(%addr, bytes = n, "discovery reply");
                replies.push(DiscoveryReply {
                    addr,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                });
            }
            Ok(Err(err)) => {
                debug!(error = %err, "discovery receive failed");
                break;
            }
            Err(_) => break,
        }
    }
    info!(replies = replies.len(), "discovery window closed");
    Ok(replies)
}
