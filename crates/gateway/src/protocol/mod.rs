// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line framing and reply classification for the two device protocols.
//!
//! Everything here is pure: parsers consume text the clients already read
//! off the socket and never perform I/O themselves.

pub mod xml;

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::{PartyRole, StateChangeEvent, Zone};

/// Terminates an MRAD connection banner.
pub const BEL: u8 = 0x07;

/// Wake-up bytes sent on MRAD connect before anything else.
pub const WAKE_UP: &[u8] = b"*\r";

/// Frame an MRAD command: UTF-8 text, single CR terminator, no LF.
pub fn encode_mrad(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 1);
    out.extend_from_slice(command.as_bytes());
    if !command.ends_with('\r') {
        out.push(b'\r');
    }
    out
}

/// Frame an MCS command: UTF-8 text, CRLF terminator.
pub fn encode_mcs(command: &str) -> Vec<u8> {
    format!("{command}\r\n").into_bytes()
}

/// A solicited `ReportState` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReport {
    pub target: String,
    pub property: String,
    pub value: String,
}

fn event_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Literal pattern, cannot fail to compile.
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"^(ReportState|StateChanged)\s+(\S+)\s+(\S+)=(.*)$").unwrap();
        re
    })
}

/// Parse an unsolicited `StateChanged <target> <property>=<value>` line.
///
/// The timestamp is left at zero; the read loop stamps arrival time.
pub fn parse_state_changed(line: &str) -> Option<StateChangeEvent> {
    let caps = event_regex().captures(line.trim())?;
    if &caps[1] != "StateChanged" {
        return None;
    }
    Some(StateChangeEvent {
        target: caps[2].to_owned(),
        property: caps[3].to_owned(),
        value: caps[4].trim().to_owned(),
        timestamp: 0.0,
    })
}

/// Parse a solicited `ReportState <target> <property>=<value>` line.
pub fn parse_report_state(line: &str) -> Option<StateReport> {
    let caps = event_regex().captures(line.trim())?;
    if &caps[1] != "ReportState" {
        return None;
    }
    Some(StateReport {
        target: caps[2].to_owned(),
        property: caps[3].to_owned(),
        value: caps[4].trim().to_owned(),
    })
}

/// Parse an MCS status line into a key/value pair.
///
/// `GetStatus` on the media-control session emits both
/// `ReportState <instance> <Key>=<Value>` and bare `<Key>=<Value>`; the two
/// forms parse to the same record.
pub fn parse_status_kv(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let kv = if line.starts_with("ReportState") {
        let mut parts = line.splitn(3, char::is_whitespace);
        parts.next();
        parts.next();
        parts.next()?
    } else {
        line
    };
    let (key, value) = kv.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_owned(), value.trim().to_owned()))
}

/// True for the literal boolean the device puts on the wire.
pub fn wire_bool(value: &str) -> bool {
    value == "True"
}

// -- Reply completion ---------------------------------------------------------

/// Assembles reply lines and decides when a reply is complete.
///
/// Completion fires on (a) a completion marker (`Ok` alone, `=Done` at line
/// end, or a trailing `>` prompt), or (b) the close of the XML root the
/// reply opened. The third boundary, quiet timeout, is the caller's job:
/// the collector does no I/O and keeps no clock.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    lines: Vec<String>,
    open_root: Option<String>,
    complete: bool,
}

impl ReplyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one reply line. Returns true once the reply is complete;
    /// further lines are still accepted (the device sometimes trails a
    /// prompt after `=Done`) but do not un-complete it.
    pub fn push(&mut self, line: &str) -> bool {
        let trimmed = line.trim().to_owned();
        if trimmed.is_empty() {
            return self.complete;
        }

        if self.open_root.is_none() {
            if let Some(root) = xml_root_name(&trimmed) {
                self.open_root = Some(root);
            }
        }

        let done = match &self.open_root {
            Some(root) => {
                trimmed.contains(&format!("</{root}>"))
                    || (self.lines.is_empty() && is_self_closed_root(&trimmed))
                    || is_done_marker(&trimmed)
            }
            None => is_completion_line(&trimmed),
        };

        self.lines.push(trimmed);
        if done {
            self.complete = true;
        }
        self.complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

fn is_done_marker(line: &str) -> bool {
    line == "=Done" || line.ends_with("=Done")
}

/// Completion marker on a non-XML line: bare `Ok`, `=Done`, or `>` prompt.
pub fn is_completion_line(line: &str) -> bool {
    let line = line.trim();
    line == "Ok" || is_done_marker(line) || (line.ends_with('>') && !line.contains('<'))
}

/// Extract the root element name if the line opens an XML block.
fn xml_root_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix('<')?;
    if rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('!') {
        return None;
    }
    let name: String =
        rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// True when the line is a root element closed in place with no children,
/// e.g. `<Zones total="0"/>`.
fn is_self_closed_root(line: &str) -> bool {
    line.ends_with("/>") && line.matches('<').count() == 1
}

// -- Status merging -----------------------------------------------------------

/// Fold `ReportState` lines from `GetStatus` into previously browsed zones.
pub fn update_zones_from_status(zones: &mut [Zone], lines: &[String]) {
    let mut reports: HashMap<String, Vec<StateReport>> = HashMap::new();
    for line in lines {
        if let Some(report) = parse_report_state(line) {
            reports.entry(report.target.clone()).or_default().push(report);
        }
    }
    for zone in zones.iter_mut() {
        if let Some(zone_reports) = reports.get(&zone.zone_id) {
            for report in zone_reports {
                apply_zone_property(zone, &report.property, &report.value);
            }
        }
    }
}

fn apply_zone_property(zone: &mut Zone, property: &str, value: &str) {
    match property {
        "Volume" => {
            if let Ok(v) = value.parse() {
                zone.volume = v;
            }
        }
        "PowerOn" => zone.is_on = wire_bool(value),
        "Mute" => zone.mute = wire_bool(value),
        "PartyMode" => zone.party_mode = PartyRole::parse(value),
        "MaxVolume" => {
            if let Ok(v) = value.parse() {
                zone.max_volume = v;
            }
        }
        "MinVolume" => {
            if let Ok(v) = value.parse() {
                zone.min_volume = v;
            }
        }
        "DoNotDisturb" => zone.do_not_disturb = wire_bool(value),
        _ => {}
    }
}

/// Collect device-level properties from `GetStatus` output. The device
/// reports them against a target named after its model (`NV-<model>`).
pub fn parse_system_properties(lines: &[String]) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in lines {
        let Some(report) = parse_report_state(line) else { continue };
        if report.target.starts_with("NV-") {
            props.insert(report.property, report.value);
        }
    }
    props
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
