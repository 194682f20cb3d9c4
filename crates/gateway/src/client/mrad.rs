// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent session to the zone-control (MRAD) port.
//!
//! One client instance owns exactly one connection. A background reader
//! routes every incoming line: unsolicited `StateChanged` events go to the
//! event bus, lines arriving while a command awaits its reply go to the
//! response queue, everything else is discarded. Command execution is
//! serialized by a session mutex: the protocol has no request IDs, so the
//! mutex is held from before the first write until the final reply line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::client::{connect_tcp, RECONNECT_WAIT};
use crate::error::{GatewayError, Result};
use crate::model::{epoch_seconds, SystemStatus, Zone};
use crate::protocol::{self, xml, ReplyCollector, BEL, WAKE_UP};

/// Upper volume bound; writes outside `0..=MAX_VOLUME` never reach the wire.
pub const MAX_VOLUME: i32 = 79;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BANNER_TIMEOUT: Duration = Duration::from_secs(3);
const INIT_DRAIN_IDLE: Duration = Duration::from_millis(200);
const QUIET_TIMEOUT: Duration = Duration::from_millis(500);
const BROWSE_TIMEOUT: Duration = Duration::from_secs(10);
const XML_RETRIES: u32 = 3;
const XML_RETRY_DELAY: Duration = Duration::from_millis(500);
const CONTROL_SETTLE: Duration = Duration::from_millis(100);

struct MradConn {
    writer: OwnedWriteHalf,
    reader_cancel: CancellationToken,
}

/// Client for the zone-control session.
pub struct MradClient {
    host: String,
    port: u16,
    command_timeout: Duration,
    bus: Arc<EventBus>,
    /// One in-flight command per session; held until the reply is complete.
    command_lock: Mutex<()>,
    /// At most one reconnect attempt at a time.
    reconnect_lock: Mutex<()>,
    conn: Mutex<Option<MradConn>>,
    connected: Arc<AtomicBool>,
    initialized: AtomicBool,
    awaiting: Arc<AtomicBool>,
    resp_tx: mpsc::UnboundedSender<String>,
    resp_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MradClient {
    pub fn new(host: String, port: u16, command_timeout: Duration, bus: Arc<EventBus>) -> Self {
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        Self {
            host,
            port,
            command_timeout,
            bus,
            command_lock: Mutex::new(()),
            reconnect_lock: Mutex::new(()),
            conn: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            awaiting: Arc::new(AtomicBool::new(false)),
            resp_tx,
            resp_rx: Mutex::new(resp_rx),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Connect (or reconnect) and run the init handshake. Idempotent:
    /// concurrent callers coalesce on the reconnect lock, and whoever
    /// arrives after a successful attempt returns immediately.
    pub async fn connect(&self) -> Result<()> {
        let _guard = timeout(RECONNECT_WAIT, self.reconnect_lock.lock())
            .await
            .map_err(|_| GatewayError::conflict("MRAD reconnect already in progress"))?;
        if self.is_connected() {
            return Ok(());
        }
        self.connect_locked().await
    }

    /// Explicitly close the session.
    pub async fn close(&self) {
        self.teardown().await;
    }

    async fn connect_locked(&self) -> Result<()> {
        self.teardown().await;

        let stream = connect_tcp(&self.host, self.port, CONNECT_TIMEOUT).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer
            .write_all(WAKE_UP)
            .await
            .map_err(|e| GatewayError::unavailable(format!("wake-up write failed: {e}")))?;

        // Banner ends in BEL; some firmware revisions skip it entirely.
        let mut banner = Vec::new();
        match timeout(BANNER_TIMEOUT, reader.read_until(BEL, &mut banner)).await {
            Ok(Ok(_)) => {
                let text = String::from_utf8_lossy(&banner);
                let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{7}');
                if !text.is_empty() {
                    tracing::debug!(banner = %text, "device banner");
                }
            }
            Ok(Err(e)) => {
                return Err(GatewayError::unavailable(format!("banner read failed: {e}")))
            }
            Err(_) => tracing::debug!("no banner before timeout"),
        }
        drain_lines(&mut reader, Duration::from_millis(100), 32).await;

        writer
            .write_all(b"SetXMLMode Lists\rSubscribeEvents smart\r")
            .await
            .map_err(|e| GatewayError::unavailable(format!("init write failed: {e}")))?;
        drain_lines(&mut reader, INIT_DRAIN_IDLE, 32).await;

        let reader_cancel = CancellationToken::new();
        tokio::spawn(read_loop(
            reader,
            self.resp_tx.clone(),
            Arc::clone(&self.awaiting),
            Arc::clone(&self.bus),
            Arc::clone(&self.connected),
            reader_cancel.clone(),
        ));

        *self.conn.lock().await = Some(MradConn { writer, reader_cancel });
        self.connected.store(true, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(host = %self.host, port = self.port, "MRAD session ready");
        Ok(())
    }

    async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().await.take() {
            conn.reader_cancel.cancel();
        }
    }

    /// Single reconnect attempt when the session is down.
    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        tracing::info!("MRAD session down, attempting reconnect");
        self.connect().await
    }

    // -- Command execution ----------------------------------------------------

    /// Run a raw command and return its reply lines. Useful for protocol
    /// exploration; the typed operations below are built on the same path.
    pub async fn execute(&self, command: &str, deadline: Duration) -> Result<Vec<String>> {
        let _guard = self.command_lock.lock().await;
        self.execute_locked(command, deadline).await
    }

    async fn execute_locked(&self, command: &str, deadline: Duration) -> Result<Vec<String>> {
        self.ensure_connected().await?;
        self.drain_stale().await;
        self.awaiting.store(true, Ordering::SeqCst);
        let result = self.write_and_collect(command, deadline).await;
        self.awaiting.store(false, Ordering::SeqCst);
        result
    }

    async fn write_and_collect(&self, command: &str, deadline: Duration) -> Result<Vec<String>> {
        self.write_frame(command).await?;

        let started = Instant::now();
        let mut collector = ReplyCollector::new();
        let mut rx = self.resp_rx.lock().await;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                if collector.lines().is_empty() {
                    return Err(GatewayError::timeout(format!(
                        "no reply to {command:?} within {deadline:?}"
                    )));
                }
                return Ok(collector.into_lines());
            }

            let wait = QUIET_TIMEOUT.min(deadline - elapsed);
            match timeout(wait, rx.recv()).await {
                Ok(Some(line)) => {
                    if collector.push(&line) {
                        return Ok(collector.into_lines());
                    }
                }
                Ok(None) => return Err(GatewayError::unavailable("MRAD reader stopped")),
                Err(_) => {
                    // Quiet timeout: a reply that went silent is complete.
                    if !collector.lines().is_empty() {
                        return Ok(collector.into_lines());
                    }
                    if !self.is_connected() {
                        return Err(GatewayError::unavailable("connection lost mid-command"));
                    }
                }
            }
        }
    }

    async fn write_frame(&self, command: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(GatewayError::unavailable("no zone-control session"));
        };
        if let Err(e) = conn.writer.write_all(&protocol::encode_mrad(command)).await {
            drop(guard);
            self.teardown().await;
            return Err(GatewayError::unavailable(format!("write failed: {e}")));
        }
        Ok(())
    }

    /// Discard queued lines left over from a previous command that timed
    /// out before consuming its reply.
    async fn drain_stale(&self) {
        let mut rx = self.resp_rx.lock().await;
        let mut drained = 0u32;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(lines = drained, "discarded stale reply lines");
        }
    }

    /// Run an XML-returning command, retrying when the expected root is
    /// missing from the reply. Assumes the command lock is held.
    async fn execute_xml_locked(&self, command: &str, root: &str) -> Result<String> {
        for attempt in 1..=XML_RETRIES {
            let lines = self.execute_locked(command, BROWSE_TIMEOUT).await?;
            if let Some(block) = xml::extract_block(&lines, root) {
                return Ok(block);
            }
            tracing::warn!(command, root, attempt, "expected XML root missing from reply");
            if attempt < XML_RETRIES {
                sleep(XML_RETRY_DELAY).await;
            }
        }
        Err(GatewayError::framing(format!("no <{root}> element in reply to {command}")))
    }

    // -- Browse operations ----------------------------------------------------

    /// List zones, with volume/mute/power/party state folded in from
    /// `GetStatus`. Both commands run under one mutex acquisition.
    pub async fn browse_zones(&self) -> Result<Vec<Zone>> {
        let _guard = self.command_lock.lock().await;
        self.browse_zones_locked().await
    }

    async fn browse_zones_locked(&self) -> Result<Vec<Zone>> {
        let block = self.execute_xml_locked("BrowseZones", "Zones").await?;
        let mut zones = xml::parse_zones(&block)?;
        let status = self.execute_locked("GetStatus", self.command_timeout).await?;
        protocol::update_zones_from_status(&mut zones, &status);
        Ok(zones)
    }

    pub async fn browse_sources(&self) -> Result<Vec<crate::model::Source>> {
        let _guard = self.command_lock.lock().await;
        let block = self.execute_xml_locked("BrowseSources", "Sources").await?;
        xml::parse_sources(&block)
    }

    /// Full system view: zones, sources, and device-level flags.
    pub async fn get_status(&self) -> Result<SystemStatus> {
        let _guard = self.command_lock.lock().await;

        let zones_block = self.execute_xml_locked("BrowseZones", "Zones").await?;
        let mut zones = xml::parse_zones(&zones_block)?;
        let sources_block = self.execute_xml_locked("BrowseSources", "Sources").await?;
        let sources = xml::parse_sources(&sources_block)?;

        let status = self.execute_locked("GetStatus", self.command_timeout).await?;
        protocol::update_zones_from_status(&mut zones, &status);
        let props = protocol::parse_system_properties(&status);

        let prop =
            |key: &str| props.get(key).cloned().unwrap_or_else(|| "Unknown".to_owned());
        Ok(SystemStatus {
            device_type: prop("DeviceType"),
            firmware_version: prop("FirmwareVersion"),
            all_mute: props.get("AllMute").is_some_and(|v| protocol::wire_bool(v)),
            all_off: props.get("AllOff").is_some_and(|v| protocol::wire_bool(v)),
            active_zone: props.get("ActiveZone").cloned().unwrap_or_default(),
            active_source: props.get("ActiveSource").cloned().unwrap_or_default(),
            zones,
            sources,
        })
    }

    // -- Zone control ---------------------------------------------------------

    /// Acknowledged by absence of error: the command is written and the
    /// device given a short settle; any echoed text is discarded by the
    /// reader.
    async fn control(&self, command: &str) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        self.ensure_connected().await?;
        self.write_frame(command).await?;
        sleep(CONTROL_SETTLE).await;
        Ok(())
    }

    /// Set the active zone context for subsequent `setSource`.
    pub async fn set_zone(&self, zone_guid: &str) -> Result<()> {
        self.control(&format!("setZone {zone_guid}")).await
    }

    /// Set the source of the active zone.
    pub async fn set_source(&self, source_guid: &str) -> Result<()> {
        self.control(&format!("setSource {source_guid}")).await
    }

    pub async fn power_on(&self, zone_number: u32) -> Result<()> {
        self.control(&format!("Power On {zone_number}")).await
    }

    pub async fn power_off(&self, zone_number: u32) -> Result<()> {
        self.control(&format!("Power Off {zone_number}")).await
    }

    /// Set volume for a zone (or the active zone when `zone_number` is
    /// `None`). Out-of-range values fail locally without touching the wire.
    pub async fn set_volume(&self, volume: i32, zone_number: Option<u32>) -> Result<()> {
        if !(0..=MAX_VOLUME).contains(&volume) {
            return Err(GatewayError::invalid_argument(format!(
                "volume {volume} outside 0..={MAX_VOLUME}"
            )));
        }
        match zone_number {
            Some(n) => self.control(&format!("Volume {volume} {n}")).await,
            None => self.control(&format!("Volume {volume}")).await,
        }
    }

    pub async fn mute_toggle(&self, zone_number: Option<u32>) -> Result<()> {
        match zone_number {
            Some(n) => self.control(&format!("Mute Toggle {n}")).await,
            None => self.control("Mute Toggle").await,
        }
    }

    pub async fn party_mode_toggle(&self) -> Result<()> {
        self.control("PartyMode Toggle").await
    }

    pub async fn all_off(&self) -> Result<()> {
        self.control("AllOff").await
    }
}

// -- Background reader --------------------------------------------------------

/// Route every incoming line until cancellation, EOF, or a read error.
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    resp_tx: mpsc::UnboundedSender<String>,
    awaiting: Arc<AtomicBool>,
    bus: Arc<EventBus>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                tracing::info!("MRAD connection closed by device");
                break;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim();
                if line.is_empty() {
                    continue;
                }
                if line.starts_with("StateChanged") {
                    match protocol::parse_state_changed(line) {
                        Some(mut event) => {
                            event.timestamp = epoch_seconds();
                            bus.publish(event);
                        }
                        None => tracing::warn!(line, "unparsable event line"),
                    }
                } else if awaiting.load(Ordering::SeqCst) {
                    let _ = resp_tx.send(line.to_owned());
                } else {
                    tracing::trace!(line, "discarding unsolicited line");
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "MRAD read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Read and discard lines until the stream goes idle for `idle`, an error
/// occurs, or `max_lines` is hit. Used around the init handshake.
async fn drain_lines(reader: &mut BufReader<OwnedReadHalf>, idle: Duration, max_lines: usize) {
    let mut buf = Vec::new();
    for _ in 0..max_lines {
        buf.clear();
        match timeout(idle, reader.read_until(b'\n', &mut buf)).await {
            Ok(Ok(n)) if n > 0 => continue,
            _ => break,
        }
    }
}
