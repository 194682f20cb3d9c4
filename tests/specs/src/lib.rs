// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end protocol tests: a scripted mock device
//! speaking the MRAD/MCS line protocols over real loopback sockets.
//!
//! Tests provide a responder closure mapping `(command, connection_number)`
//! to a [`MockReply`]; the harness records every observed command, supports
//! unsolicited event injection, and keeps accepting connections so
//! reconnect behavior can be exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout, Instant};

/// Which protocol dialect the mock speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Zone control: answers the `*` wake-up with a BEL-terminated banner.
    Mrad,
    /// Media control: no banner, CRLF-framed replies only.
    Mcs,
}

/// Scripted reply to one observed command.
pub enum MockReply {
    /// Write each line followed by CRLF.
    Lines(Vec<String>),
    /// Wait, then write the lines. For timeout scenarios.
    Delayed(Duration, Vec<String>),
    /// Write the lines, then drop the connection.
    LinesThenClose(Vec<String>),
    /// Drop the connection without replying.
    CloseConnection,
    /// No reply at all.
    Silence,
}

impl MockReply {
    pub fn lines<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self::Lines(lines.into_iter().map(Into::into).collect())
    }

    pub fn done() -> Self {
        Self::lines(["=Done"])
    }

    pub fn ok() -> Self {
        Self::lines(["Ok"])
    }
}

/// `(command, connection_number)` → reply. Connection numbers start at 1.
pub type Responder = Arc<dyn Fn(&str, usize) -> MockReply + Send + Sync>;

/// A scripted mock device bound to a loopback port.
pub struct MockDevice {
    port: u16,
    observed: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    event_tx: broadcast::Sender<String>,
}

impl MockDevice {
    /// Bind to an ephemeral loopback port and start accepting connections.
    pub async fn start(protocol: Protocol, responder: Responder) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (event_tx, _) = broadcast::channel(64);

        {
            let observed = Arc::clone(&observed);
            let accepted = Arc::clone(&accepted);
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else { break };
                    let conn_no = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                    let observed = Arc::clone(&observed);
                    let responder = Arc::clone(&responder);
                    let event_rx = event_tx.subscribe();
                    tokio::spawn(async move {
                        handle_conn(stream, protocol, conn_no, observed, responder, event_rx)
                            .await;
                    });
                }
            });
        }

        Ok(Self { port, observed, accepted, event_tx })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every command line the mock has received, in arrival order, across
    /// all connections.
    pub async fn observed(&self) -> Vec<String> {
        self.observed.lock().await.clone()
    }

    /// Observed commands with session-setup noise stripped.
    pub async fn observed_commands(&self) -> Vec<String> {
        self.observed.lock().await.iter().filter(|c| !is_init_command(c)).cloned().collect()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Push an unsolicited line (e.g. a `StateChanged` event) to every live
    /// connection.
    pub fn inject(&self, line: &str) {
        let _ = self.event_tx.send(line.to_owned());
    }

    /// Wait until some observed command satisfies `predicate`.
    pub async fn wait_observed(
        &self,
        predicate: impl Fn(&str) -> bool,
        deadline: Duration,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        loop {
            if self.observed.lock().await.iter().any(|c| predicate(c)) {
                return Ok(());
            }
            if started.elapsed() > deadline {
                anyhow::bail!("command never observed; saw {:?}", self.observed().await);
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

fn is_init_command(command: &str) -> bool {
    command == "*"
        || command == "SetXMLMode Lists"
        || command == "SubscribeEvents smart"
        || command.starts_with("SetHost ")
        || command.starts_with("SetClientType ")
        || command.starts_with("SetEncoding ")
        || command.starts_with("SetPickListCount ")
}

async fn handle_conn(
    stream: TcpStream,
    protocol: Protocol,
    conn_no: usize,
    observed: Arc<Mutex<Vec<String>>>,
    responder: Responder,
    mut event_rx: broadcast::Receiver<String>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    // Cleared only after a complete command: the event branch can win the
    // race mid-read, leaving a partial command to finish next iteration.
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                if let Ok(line) = event {
                    if write_half.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }

            read = reader.read_until(b'\r', &mut buf) => {
                match read {
                    Ok(0) => return,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        let command = text.trim().to_owned();
                        buf.clear();
                        if command.is_empty() {
                            continue;
                        }
                        observed.lock().await.push(command.clone());

                        if protocol == Protocol::Mrad && command == "*" {
                            let banner = "NuVo MusicPort NV-I8G control ready\u{7}";
                            if write_half.write_all(banner.as_bytes()).await.is_err() {
                                return;
                            }
                            continue;
                        }

                        match responder(&command, conn_no) {
                            MockReply::Lines(lines) => {
                                if write_lines(&mut write_half, &lines).await.is_err() {
                                    return;
                                }
                            }
                            MockReply::Delayed(delay, lines) => {
                                sleep_while_draining(delay, &mut reader, &observed).await;
                                if write_lines(&mut write_half, &lines).await.is_err() {
                                    return;
                                }
                            }
                            MockReply::LinesThenClose(lines) => {
                                let _ = write_lines(&mut write_half, &lines).await;
                                return;
                            }
                            MockReply::CloseConnection => return,
                            MockReply::Silence => {}
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

async fn write_lines(write_half: &mut OwnedWriteHalf, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        write_half.write_all(format!("{line}\r\n").as_bytes()).await?;
    }
    Ok(())
}

/// Keep reading (and recording) during a scripted delay so a slow reply
/// does not stall command intake.
async fn sleep_while_draining(
    delay: Duration,
    reader: &mut BufReader<OwnedReadHalf>,
    observed: &Arc<Mutex<Vec<String>>>,
) {
    let deadline = Instant::now() + delay;
    let mut buf = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        buf.clear();
        match timeout(remaining, reader.read_until(b'\r', &mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let text = String::from_utf8_lossy(&buf);
                let command = text.trim();
                if !command.is_empty() {
                    observed.lock().await.push(command.to_owned());
                }
            }
            Ok(_) => return,
            Err(_) => return,
        }
    }
}

// -- Canned device XML --------------------------------------------------------

/// The two-zone listing used across tests: `Zone_1` "Master Bedroom" (off)
/// and `Zone_3` "Living Room" (on).
pub fn zones_xml() -> String {
    concat!(
        r#"<Zones total="2">"#,
        "\n",
        r#"<Zone guid="zone-guid-1" id="Zone_1" name="Master Bedroom" isOn="False" sourceId="1" sourceName="Tuner" sGuid="src-tuner"/>"#,
        "\n",
        r#"<Zone guid="zone-guid-3" id="Zone_3" name="Living Room" isOn="True" sourceId="2" sourceName="Music Server A" sGuid="src-msa"/>"#,
        "\n",
        "</Zones>"
    )
    .to_owned()
}

pub fn sources_xml() -> String {
    concat!(
        r#"<Sources total="2">"#,
        "\n",
        r#"<Source guid="src-tuner" name="Tuner" sId="1" smart="0" nnet="0" znCount="1"/>"#,
        "\n",
        r#"<Source guid="src-msa" name="Music Server A" sId="2" smart="1" nnet="1" znCount="0"/>"#,
        "\n",
        "</Sources>"
    )
    .to_owned()
}
