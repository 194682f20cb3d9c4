// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent session to the media-server (MCS) port.
//!
//! Unlike the zone-control session there is no background reader: the
//! device intermixes event chatter with command replies on this stream, and
//! a concurrent reader races the reply path. Instead each command flushes
//! stale bytes, writes, and reads its own reply synchronously under the
//! command mutex. Event subscription stays disabled on this port; anything
//! the device volunteers is consumed by the next command's pre-flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Instant};

use crate::client::{connect_tcp, RECONNECT_WAIT};
use crate::error::{GatewayError, Result};
use crate::model::{McsStatus, PickListItem};
use crate::protocol::{self, xml, ReplyCollector};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const INIT_DRAIN_IDLE: Duration = Duration::from_millis(200);
const INIT_DRAIN_LINES: usize = 20;
const PREFLUSH_POLL: Duration = Duration::from_millis(10);
const READ_SLICE: Duration = Duration::from_millis(500);
const MAX_REPLY_LINES: usize = 100;
const INSTANCE_REPLAY_SETTLE: Duration = Duration::from_secs(1);

struct McsConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client for the media-server session, controlling a selectable instance
/// (`Music_Server_A` .. `D`).
pub struct McsClient {
    host: String,
    port: u16,
    client_name: String,
    command_timeout: Duration,
    settle: Duration,
    stabilize: Duration,
    command_lock: Mutex<()>,
    reconnect_lock: Mutex<()>,
    conn: Mutex<Option<McsConn>>,
    connected: AtomicBool,
    initialized: AtomicBool,
    /// Last instance the device acknowledged, or `None`. Replayed before
    /// caller traffic resumes after a reconnect.
    current_instance: RwLock<Option<String>>,
}

impl McsClient {
    pub fn new(
        host: String,
        port: u16,
        client_name: String,
        command_timeout: Duration,
        settle: Duration,
        stabilize: Duration,
    ) -> Self {
        Self {
            host,
            port,
            client_name,
            command_timeout,
            settle,
            stabilize,
            command_lock: Mutex::new(()),
            reconnect_lock: Mutex::new(()),
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            current_instance: RwLock::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Instance cached from the last acknowledged `SetInstance`.
    pub async fn current_instance(&self) -> Option<String> {
        self.current_instance.read().await.clone()
    }

    /// Open the session and run the init sequence.
    pub async fn connect(&self) -> Result<()> {
        let _guard = timeout(RECONNECT_WAIT, self.reconnect_lock.lock())
            .await
            .map_err(|_| GatewayError::conflict("MCS reconnect already in progress"))?;
        if self.is_connected() {
            return Ok(());
        }
        self.connect_locked().await
    }

    /// Tear down and rebuild the session: close, settle, fresh connect and
    /// init, stabilize, then replay the cached instance selection. The two
    /// sleeps are required by the device and sized via configuration.
    pub async fn reconnect(&self) -> Result<()> {
        let _guard = timeout(RECONNECT_WAIT, self.reconnect_lock.lock())
            .await
            .map_err(|_| GatewayError::conflict("MCS reconnect already in progress"))?;
        if self.is_connected() {
            return Ok(());
        }
        self.reconnect_locked().await
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut conn) = self.conn.lock().await.take() {
            let _ = timeout(CLOSE_TIMEOUT, conn.writer.shutdown()).await;
        }
    }

    async fn connect_locked(&self) -> Result<()> {
        let stream = connect_tcp(&self.host, self.port, CONNECT_TIMEOUT).await?;
        let local_ip = stream
            .local_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "0.0.0.0".to_owned());
        let (read_half, writer) = stream.into_split();
        let mut conn = McsConn { reader: BufReader::new(read_half), writer };

        let init = [
            format!("SetHost {local_ip}"),
            "SetXMLMode Lists".to_owned(),
            format!("SetClientType \"{}\"", self.client_name),
            "SetEncoding 65001".to_owned(),
            "SetPickListCount 100".to_owned(),
        ];
        let mut drain_budget = INIT_DRAIN_LINES;
        for command in init {
            conn.writer
                .write_all(&protocol::encode_mcs(&command))
                .await
                .map_err(|e| GatewayError::unavailable(format!("init write failed: {e}")))?;
            drain_init(&mut conn.reader, &mut drain_budget).await;
        }

        *self.conn.lock().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(host = %self.host, port = self.port, "MCS session ready");
        Ok(())
    }

    async fn reconnect_locked(&self) -> Result<()> {
        self.close().await;

        tracing::info!(settle = ?self.settle, "waiting for device to settle before MCS reconnect");
        sleep(self.settle).await;

        self.connect_locked().await?;

        tracing::info!(stabilize = ?self.stabilize, "waiting for MCS connection to stabilize");
        sleep(self.stabilize).await;

        let cached = self.current_instance.read().await.clone();
        if let Some(instance) = cached {
            tracing::info!(instance = %instance, "restoring media-server instance");
            self.send_and_read(&format!("SetInstance {instance}")).await?;
            sleep(INSTANCE_REPLAY_SETTLE).await;
        }
        Ok(())
    }

    async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.conn.lock().await.take();
    }

    // -- Command execution ----------------------------------------------------

    /// Run a raw command and return its reply lines.
    pub async fn execute(&self, command: &str) -> Result<Vec<String>> {
        let _guard = self.command_lock.lock().await;
        self.execute_locked(command).await
    }

    /// Send with one automatic recovery: a connection-class failure (reset,
    /// broken pipe, socket error, read timeout) triggers reconnect and a
    /// single replay. A second failure propagates.
    async fn execute_locked(&self, command: &str) -> Result<Vec<String>> {
        if !self.is_connected() {
            self.reconnect().await?;
        }
        match self.send_and_read(command).await {
            Ok(lines) => Ok(lines),
            Err(e) if e.is_connection_class() => {
                tracing::warn!(command, err = %e, "MCS command failed, reconnecting for one retry");
                self.mark_disconnected().await;
                self.reconnect()
                    .await
                    .map_err(|re| re.context(format!("reconnect for {command} retry")))?;
                self.send_and_read(command).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_and_read(&self, command: &str) -> Result<Vec<String>> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(GatewayError::unavailable("no media-server session"));
        };

        preflush(&mut conn.reader).await;

        conn.writer
            .write_all(&protocol::encode_mcs(command))
            .await
            .map_err(|e| GatewayError::unavailable(format!("write failed: {e}")))?;

        self.read_reply(conn, command).await
    }

    async fn read_reply(&self, conn: &mut McsConn, command: &str) -> Result<Vec<String>> {
        let started = Instant::now();
        let mut collector = ReplyCollector::new();
        // Cleared only after a complete line: a timed-out read may leave a
        // partial line behind, and the next slice must finish it.
        let mut buf = Vec::new();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.command_timeout {
                if collector.lines().is_empty() {
                    return Err(GatewayError::timeout(format!(
                        "no reply to {command:?} within {:?}",
                        self.command_timeout
                    )));
                }
                return Ok(collector.into_lines());
            }

            let wait = READ_SLICE.min(self.command_timeout - elapsed);
            match timeout(wait, conn.reader.read_until(b'\n', &mut buf)).await {
                Ok(Ok(0)) => {
                    return Err(GatewayError::unavailable("connection closed by device"))
                }
                Ok(Ok(_)) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim().to_owned();
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    if collector.push(&line) || collector.lines().len() >= MAX_REPLY_LINES {
                        return Ok(collector.into_lines());
                    }
                }
                Ok(Err(e)) => {
                    return Err(GatewayError::unavailable(format!("read failed: {e}")))
                }
                Err(_) => {
                    // Quiet after at least one line: reply is complete.
                    if !collector.lines().is_empty() {
                        return Ok(collector.into_lines());
                    }
                }
            }
        }
    }

    async fn execute_xml(&self, command: &str, root: &str) -> Result<String> {
        let lines = self.execute(command).await?;
        xml::extract_block(&lines, root)
            .ok_or_else(|| GatewayError::framing(format!("no <{root}> element in reply to {command}")))
    }

    // -- Configuration --------------------------------------------------------

    /// Select which media-server instance subsequent commands address.
    /// The name is cached only after the device accepts it.
    pub async fn set_instance(&self, instance: &str) -> Result<()> {
        self.execute(&format!("SetInstance {instance}")).await?;
        *self.current_instance.write().await = Some(instance.to_owned());
        Ok(())
    }

    // -- Browsing -------------------------------------------------------------

    pub async fn browse_instances(&self) -> Result<Vec<String>> {
        let block = self.execute_xml("BrowseInstancesEX", "Instances").await?;
        xml::parse_instances(&block)
    }

    /// Browse the pick list of the selected instance. Returned indexes are
    /// only valid until the next browse on this session.
    pub async fn browse_radio_stations(&self) -> Result<Vec<PickListItem>> {
        let block = self.execute_xml("BrowseRadioStations", "RadioStations").await?;
        xml::parse_radio_stations(&block)
    }

    pub async fn browse_albums(&self) -> Result<Vec<PickListItem>> {
        let block = self.execute_xml("BrowseAlbums", "Albums").await?;
        xml::parse_albums(&block)
    }

    pub async fn browse_artists(&self) -> Result<Vec<PickListItem>> {
        let block = self.execute_xml("BrowseArtists", "Artists").await?;
        xml::parse_artists(&block)
    }

    pub async fn browse_album_titles(&self, album_guid: &str) -> Result<Vec<PickListItem>> {
        let block =
            self.execute_xml(&format!("BrowseAlbumTitles {album_guid}"), "Titles").await?;
        xml::parse_titles(&block)
    }

    /// Browse the current play queue.
    pub async fn browse_now_playing(&self) -> Result<Vec<PickListItem>> {
        let block = self.execute_xml("BrowseNowPlaying", "Titles").await?;
        xml::parse_titles(&block)
    }

    // -- Playback -------------------------------------------------------------

    pub async fn play_radio_station(&self, guid: &str) -> Result<()> {
        self.execute(&format!("PlayRadioStation {guid}")).await.map(|_| ())
    }

    pub async fn play_album(&self, guid: &str) -> Result<()> {
        self.execute(&format!("PlayAlbum {guid}")).await.map(|_| ())
    }

    pub async fn play_artist(&self, guid: &str) -> Result<()> {
        self.execute(&format!("PlayArtist {guid}")).await.map(|_| ())
    }

    pub async fn play_title(&self, guid: &str) -> Result<()> {
        self.execute(&format!("PlayTitle {guid}")).await.map(|_| ())
    }

    pub async fn play_all_music(&self) -> Result<()> {
        self.execute("PlayAllMusic").await.map(|_| ())
    }

    // -- Navigation -----------------------------------------------------------

    /// Select a pick-list entry by its index in the last returned listing.
    pub async fn ack_pick_item(&self, index: usize) -> Result<()> {
        self.execute(&format!("AckPickItem {index}")).await.map(|_| ())
    }

    /// Filter the station list. The device expects the text base64-encoded.
    pub async fn set_radio_filter(&self, filter_text: &str) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(filter_text);
        self.execute(&format!("SetRadioFilter {encoded}")).await.map(|_| ())
    }

    // -- Status ---------------------------------------------------------------

    pub async fn get_status(&self) -> Result<McsStatus> {
        let lines = self.execute("GetStatus").await?;
        let mut status = McsStatus { play_state: "Unknown".to_owned(), ..Default::default() };
        for line in &lines {
            let Some((key, value)) = protocol::parse_status_kv(line) else { continue };
            match key.as_str() {
                "Volume" => {
                    if let Ok(v) = value.parse() {
                        status.volume = v;
                    }
                }
                "Mute" => status.mute = value.eq_ignore_ascii_case("true"),
                "PlayState" => status.play_state = value,
                "TrackName" => status.now_playing.track = Some(value),
                "ArtistName" => status.now_playing.artist = Some(value),
                "MediaName" => status.now_playing.album = Some(value),
                "StationName" => status.now_playing.station = Some(value),
                _ => {}
            }
        }
        Ok(status)
    }
}

/// Drain init replies: up to `budget` lines, stopping at the first 200 ms
/// of silence.
async fn drain_init(reader: &mut BufReader<OwnedReadHalf>, budget: &mut usize) {
    let mut buf = Vec::new();
    while *budget > 0 {
        buf.clear();
        match timeout(INIT_DRAIN_IDLE, reader.read_until(b'\n', &mut buf)).await {
            Ok(Ok(n)) if n > 0 => *budget -= 1,
            _ => break,
        }
    }
}

/// Discard whatever is already buffered on the stream (late replies from a
/// timed-out command, or event chatter) before writing a new command.
async fn preflush(reader: &mut BufReader<OwnedReadHalf>) {
    let mut buf = Vec::new();
    let mut flushed = 0u32;
    loop {
        buf.clear();
        match timeout(PREFLUSH_POLL, reader.read_until(b'\n', &mut buf)).await {
            Ok(Ok(n)) if n > 0 => flushed += 1,
            _ => break,
        }
    }
    if flushed > 0 {
        tracing::debug!(lines = flushed, "flushed stale bytes before command");
    }
}
