// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network discovery: probe an IPv4 range for hosts answering on the two
//! device ports, identify responders by their MRAD banner.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::{GatewayError, Result};
use crate::model::DiscoveredDevice;
use crate::protocol::{BEL, WAKE_UP};

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const IDENTIFY_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);

/// Banner substrings that mark a responder as the device we control.
const VENDOR_TOKENS: &[&str] = &["NuVo", "Autonomic"];

/// Widest prefix the scanner accepts; anything wider is a caller mistake.
const MIN_PREFIX: u32 = 16;

/// Bounded-concurrency scanner over an address range.
pub struct DiscoveryScanner {
    mrad_port: u16,
    mcs_port: u16,
    concurrency: usize,
}

impl DiscoveryScanner {
    pub fn new(mrad_port: u16, mcs_port: u16, concurrency: usize) -> Self {
        Self { mrad_port, mcs_port, concurrency: concurrency.max(1) }
    }

    /// Probe every host in `network` (CIDR notation). Hosts with either
    /// port open are reported; those whose banner carries a vendor token
    /// come back with identification attached.
    pub async fn scan(&self, network: &str) -> Result<Vec<DiscoveredDevice>> {
        let hosts = expand_cidr(network)?;
        tracing::info!(network, hosts = hosts.len(), "starting discovery scan");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = tokio::task::JoinSet::new();
        for ip in hosts {
            let semaphore = Arc::clone(&semaphore);
            let (mrad_port, mcs_port) = (self.mrad_port, self.mcs_port);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                scan_host(ip, mrad_port, mcs_port).await
            });
        }

        let mut devices = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(device)) = joined {
                devices.push(device);
            }
        }
        devices.sort_by_key(|d| d.ip.parse::<Ipv4Addr>().map(u32::from).unwrap_or(u32::MAX));
        tracing::info!(found = devices.len(), "discovery scan finished");
        Ok(devices)
    }
}

async fn scan_host(ip: Ipv4Addr, mrad_port: u16, mcs_port: u16) -> Option<DiscoveredDevice> {
    let mrad_open = probe_port(ip, mrad_port).await;
    let mcs_open = probe_port(ip, mcs_port).await;
    if !(mrad_open || mcs_open) {
        return None;
    }

    let banner = if mrad_open { identify(ip, mrad_port).await } else { None };
    let hostname = banner.as_deref().and_then(device_name_from_banner);
    Some(DiscoveredDevice { ip: ip.to_string(), hostname, mrad_open, mcs_open, banner })
}

async fn probe_port(ip: Ipv4Addr, port: u16) -> bool {
    matches!(timeout(PORT_PROBE_TIMEOUT, TcpStream::connect((ip, port))).await, Ok(Ok(_)))
}

/// Wake the zone-control port and read the banner. Only a banner carrying
/// a vendor token counts as identification.
async fn identify(ip: Ipv4Addr, port: u16) -> Option<String> {
    let stream =
        timeout(IDENTIFY_CONNECT_TIMEOUT, TcpStream::connect((ip, port))).await.ok()?.ok()?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(WAKE_UP).await.ok()?;

    let mut reader = BufReader::new(read_half);
    let mut banner = Vec::new();
    let _ = timeout(BANNER_TIMEOUT, reader.read_until(BEL, &mut banner)).await;
    if banner.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(&banner);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{7}');
    if VENDOR_TOKENS.iter().any(|token| text.contains(token)) {
        Some(text.to_owned())
    } else {
        None
    }
}

/// The device prints its model as `NV-<model>` somewhere in the banner.
fn device_name_from_banner(banner: &str) -> Option<String> {
    banner
        .split_whitespace()
        .find(|word| word.starts_with("NV-"))
        .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-').to_owned())
}

/// Expand an IPv4 CIDR into probe targets. Host bits in the base address
/// are masked off. Prefixes of /31 and /32 probe every address; wider
/// prefixes skip the network and broadcast addresses.
pub fn expand_cidr(network: &str) -> Result<Vec<Ipv4Addr>> {
    let (addr_text, prefix_text) = network
        .trim()
        .split_once('/')
        .ok_or_else(|| GatewayError::invalid_argument(format!("{network:?}: expected a.b.c.d/prefix")))?;

    let addr: Ipv4Addr = addr_text
        .parse()
        .map_err(|_| GatewayError::invalid_argument(format!("{addr_text:?} is not an IPv4 address")))?;
    let prefix: u32 = prefix_text
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| GatewayError::invalid_argument(format!("{prefix_text:?} is not a prefix length")))?;
    if prefix < MIN_PREFIX {
        return Err(GatewayError::invalid_argument(format!(
            "refusing to scan networks wider than /{MIN_PREFIX}"
        )));
    }

    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(addr) & mask;
    let size: u64 = 1u64 << (32 - prefix);

    let range: Box<dyn Iterator<Item = u64>> =
        if prefix >= 31 { Box::new(0..size) } else { Box::new(1..size - 1) };
    Ok(range.map(|offset| Ipv4Addr::from(base + offset as u32)).collect())
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
