// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoders for the attribute-only XML listings both protocols emit.
//!
//! Every wire struct keeps its attributes as defaulted strings so unknown
//! or missing attributes never fail a parse; conversion into the crate's
//! data records happens afterwards. Parse failures surface as `Framing`
//! errors and never tear down a session.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{GatewayError, Result};
use crate::model::{PickListItem, Source, Zone};
use crate::protocol::wire_bool;

/// Extract the text of the `root` XML block from reply lines.
///
/// Replies can carry prompt noise before and after the block; only the
/// lines from the opening tag through the matching close (or a self-closed
/// root) are joined.
pub fn extract_block(lines: &[String], root: &str) -> Option<String> {
    let open = format!("<{root}");
    let close = format!("</{root}>");

    let start = lines.iter().position(|line| {
        let t = line.trim_start();
        t.starts_with(&open)
            && matches!(
                t.as_bytes().get(open.len()).copied(),
                None | Some(b' ' | b'>' | b'/' | b'\t')
            )
    })?;

    let mut block = Vec::new();
    for (i, line) in lines[start..].iter().enumerate() {
        let t = line.trim();
        block.push(t);
        if t.contains(&close) {
            return Some(block.join("\n"));
        }
        if i == 0 && t.ends_with("/>") && t.matches('<').count() == 1 {
            return Some(block.join("\n"));
        }
    }
    None
}

fn decode<T: DeserializeOwned>(xml: &str, what: &str) -> Result<T> {
    quick_xml::de::from_str(xml)
        .map_err(|e| GatewayError::framing(format!("malformed {what} XML: {e}")))
}

fn parse_num<T: std::str::FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

// -- Zones --------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ZonesDoc {
    #[serde(rename = "Zone", default)]
    zones: Vec<ZoneEl>,
}

#[derive(Debug, Default, Deserialize)]
struct ZoneEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@id", default)]
    id: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@isOn", default)]
    is_on: String,
    #[serde(rename = "@sourceId", default)]
    source_id: String,
    #[serde(rename = "@sourceName", default)]
    source_name: String,
    #[serde(rename = "@sGuid", default)]
    source_guid: String,
    #[serde(rename = "@gName", default)]
    group_name: String,
    #[serde(rename = "@gId", default)]
    group_id: String,
}

/// Parse a `BrowseZones` listing. Volume, mute, party role, and limits are
/// defaulted here; the caller folds in `GetStatus` afterwards.
pub fn parse_zones(xml: &str) -> Result<Vec<Zone>> {
    let doc: ZonesDoc = decode(xml, "zones")?;
    Ok(doc.zones.into_iter().map(zone_from_el).collect())
}

fn zone_from_el(el: ZoneEl) -> Zone {
    // The numeric ID is the integer suffix of the symbolic one ("Zone_3").
    let zone_number = el.id.rsplit('_').next().and_then(|n| n.parse().ok()).unwrap_or(0);
    Zone {
        guid: el.guid,
        name: el.name,
        zone_number,
        zone_id: el.id,
        is_on: wire_bool(&el.is_on),
        volume: 0,
        mute: false,
        source_id: parse_num(&el.source_id),
        source_name: el.source_name,
        source_guid: el.source_guid,
        party_mode: Default::default(),
        max_volume: 79,
        min_volume: 0,
        zone_group_name: el.group_name,
        zone_group_id: el.group_id,
        do_not_disturb: false,
    }
}

// -- Sources ------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct SourcesDoc {
    #[serde(rename = "Source", default)]
    sources: Vec<SourceEl>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@sId", default)]
    source_id: String,
    #[serde(rename = "@smart", default)]
    smart: String,
    #[serde(rename = "@nnet", default)]
    network: String,
    #[serde(rename = "@znCount", default)]
    zone_count: String,
    #[serde(rename = "@znList", default)]
    zone_list: String,
    #[serde(rename = "@m1", default)]
    m1: String,
    #[serde(rename = "@m2", default)]
    m2: String,
    #[serde(rename = "@m3", default)]
    m3: String,
    #[serde(rename = "@m4", default)]
    m4: String,
    #[serde(rename = "@mArt", default)]
    m_art: String,
}

pub fn parse_sources(xml: &str) -> Result<Vec<Source>> {
    let doc: SourcesDoc = decode(xml, "sources")?;
    Ok(doc
        .sources
        .into_iter()
        .map(|el| Source {
            guid: el.guid,
            name: el.name,
            source_id: parse_num(&el.source_id),
            is_smart: el.smart == "1",
            is_network: el.network == "1",
            zone_count: parse_num(&el.zone_count),
            zone_list: el.zone_list,
            metadata1: el.m1,
            metadata2: el.m2,
            metadata3: el.m3,
            metadata4: el.m4,
            metadata_art: el.m_art,
        })
        .collect())
}

// -- Media-server instances ---------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct InstancesDoc {
    #[serde(rename = "InstanceInfoEx", default)]
    instances: Vec<InstanceEl>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceEl {
    #[serde(rename = "@instance", default)]
    instance: String,
}

/// Parse a `BrowseInstancesEX` listing into instance names.
pub fn parse_instances(xml: &str) -> Result<Vec<String>> {
    let doc: InstancesDoc = decode(xml, "instances")?;
    Ok(doc.instances.into_iter().map(|el| el.instance).filter(|name| !name.is_empty()).collect())
}

// -- Pick lists ---------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RadioStationsDoc {
    #[serde(rename = "RadioStation", default)]
    stations: Vec<RadioStationEl>,
}

#[derive(Debug, Default, Deserialize)]
struct RadioStationEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@desc", default)]
    desc: String,
}

/// Parse `BrowseRadioStations` output. Indexes are positional and only
/// valid until the next browse on the same session.
pub fn parse_radio_stations(xml: &str) -> Result<Vec<PickListItem>> {
    let doc: RadioStationsDoc = decode(xml, "radio stations")?;
    Ok(doc
        .stations
        .into_iter()
        .enumerate()
        .map(|(index, el)| {
            let mut metadata = HashMap::new();
            if !el.desc.is_empty() {
                metadata.insert("desc".to_owned(), el.desc);
            }
            PickListItem {
                index,
                title: el.name,
                guid: el.guid,
                item_type: "RadioStation".to_owned(),
                metadata,
            }
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
struct AlbumsDoc {
    #[serde(rename = "Album", default)]
    albums: Vec<AlbumEl>,
}

#[derive(Debug, Default, Deserialize)]
struct AlbumEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@artist", default)]
    artist: String,
    #[serde(rename = "@unique", default)]
    unique: String,
}

pub fn parse_albums(xml: &str) -> Result<Vec<PickListItem>> {
    let doc: AlbumsDoc = decode(xml, "albums")?;
    Ok(doc
        .albums
        .into_iter()
        .enumerate()
        .map(|(index, el)| {
            let mut metadata = HashMap::new();
            if !el.artist.is_empty() {
                metadata.insert("artist".to_owned(), el.artist);
            }
            if !el.unique.is_empty() {
                metadata.insert("unique".to_owned(), el.unique);
            }
            PickListItem {
                index,
                title: el.name,
                guid: el.guid,
                item_type: "Album".to_owned(),
                metadata,
            }
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
struct ArtistsDoc {
    #[serde(rename = "Artist", default)]
    artists: Vec<ArtistEl>,
}

#[derive(Debug, Default, Deserialize)]
struct ArtistEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@name", default)]
    name: String,
}

pub fn parse_artists(xml: &str) -> Result<Vec<PickListItem>> {
    let doc: ArtistsDoc = decode(xml, "artists")?;
    Ok(doc
        .artists
        .into_iter()
        .enumerate()
        .map(|(index, el)| PickListItem {
            index,
            title: el.name,
            guid: el.guid,
            item_type: "Artist".to_owned(),
            metadata: HashMap::new(),
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
struct TitlesDoc {
    #[serde(rename = "Title", default)]
    titles: Vec<TitleEl>,
}

#[derive(Debug, Default, Deserialize)]
struct TitleEl {
    #[serde(rename = "@guid", default)]
    guid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@artist", default)]
    artist: String,
    #[serde(rename = "@album", default)]
    album: String,
    #[serde(rename = "@albumGuid", default)]
    album_guid: String,
    #[serde(rename = "@duration", default)]
    duration: String,
    #[serde(rename = "@track", default)]
    track: String,
    #[serde(rename = "@npIndex", default)]
    queue_index: String,
    #[serde(rename = "@np", default)]
    now_playing: String,
}

/// Parse a `Titles` listing (album contents or the now-playing queue).
pub fn parse_titles(xml: &str) -> Result<Vec<PickListItem>> {
    let doc: TitlesDoc = decode(xml, "titles")?;
    Ok(doc
        .titles
        .into_iter()
        .enumerate()
        .map(|(index, el)| {
            let mut metadata = HashMap::new();
            for (key, value) in [
                ("artist", el.artist),
                ("album", el.album),
                ("album_guid", el.album_guid),
                ("duration", el.duration),
                ("track", el.track),
                ("queue_index", el.queue_index),
            ] {
                if !value.is_empty() {
                    metadata.insert(key.to_owned(), value);
                }
            }
            if el.now_playing == "1" {
                metadata.insert("now_playing".to_owned(), "1".to_owned());
            }
            PickListItem {
                index,
                title: el.name,
                guid: el.guid,
                item_type: "Title".to_owned(),
                metadata,
            }
        })
        .collect())
}

#[cfg(test)]
#[path = "xml_tests.rs"]
mod tests;
