// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data records shared between the protocol layer, the façade, and the
//! HTTP adapter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Party-mode role of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartyRole {
    #[default]
    Off,
    Host,
    Slave,
}

impl PartyRole {
    /// Parse the device's textual role. Anything unrecognized reads as `Off`.
    pub fn parse(s: &str) -> Self {
        match s {
            "Host" => Self::Host,
            "Slave" => Self::Slave,
            _ => Self::Off,
        }
    }
}

/// A room or output channel on the device.
///
/// Identity is threefold: stable GUID, small integer (`zone_number`), and
/// symbolic ID (`Zone_<n>`). The numeric ID always equals the integer suffix
/// of the symbolic ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub guid: String,
    pub name: String,
    pub zone_id: String,
    pub zone_number: u32,
    pub is_on: bool,
    pub volume: i32,
    pub mute: bool,
    pub source_id: i32,
    pub source_name: String,
    pub source_guid: String,
    pub party_mode: PartyRole,
    pub max_volume: i32,
    pub min_volume: i32,
    pub zone_group_name: String,
    pub zone_group_id: String,
    pub do_not_disturb: bool,
}

/// An input channel: analog input or "smart" media server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub guid: String,
    pub name: String,
    pub source_id: i32,
    /// Capable of the media-control (MCS) protocol.
    pub is_smart: bool,
    pub is_network: bool,
    /// Number of zones currently using this source.
    pub zone_count: i32,
    pub zone_list: String,
    pub metadata1: String,
    pub metadata2: String,
    pub metadata3: String,
    pub metadata4: String,
    pub metadata_art: String,
}

/// Aggregated device view, reconstituted on demand and never cached beyond
/// a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub device_type: String,
    pub firmware_version: String,
    pub all_mute: bool,
    pub all_off: bool,
    pub active_zone: String,
    pub active_source: String,
    pub zones: Vec<Zone>,
    pub sources: Vec<Source>,
}

/// An unsolicited state change from the device.
///
/// `target` names a zone (`Zone_3`), a zone group (`ZG_1`), or the device
/// itself (`NV-<model>`). The value is the raw wire text; typing it is the
/// reader's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub target: String,
    pub property: String,
    pub value: String,
    /// Wall-clock unix seconds, stamped on arrival.
    pub timestamp: f64,
}

/// One entry of a media-server pick list.
///
/// `index` is positional in the listing that produced it and is only
/// meaningful until the next browse on the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickListItem {
    pub index: usize,
    pub title: String,
    pub guid: String,
    pub item_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What the media server reports it is playing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub station: Option<String>,
}

/// Parsed `GetStatus` record from the MCS session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McsStatus {
    pub volume: i32,
    pub mute: bool,
    pub play_state: String,
    pub now_playing: NowPlaying,
}

/// A host discovered by the network scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: String,
    /// Device name lifted from the identification banner, when present.
    pub hostname: Option<String>,
    pub mrad_open: bool,
    pub mcs_open: bool,
    pub banner: Option<String>,
}

/// Return current wall-clock time as unix seconds.
pub fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
