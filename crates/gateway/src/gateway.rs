// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway façade: owns the two client slots, the event bus, and the push
//! broadcaster, and composes multi-step device orchestrations on top of
//! them. One `Gateway` exists per process, threaded through the HTTP
//! handlers as shared state.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::broadcaster::Broadcaster;
use crate::bus::EventBus;
use crate::client::{McsClient, MradClient};
use crate::config::GatewayConfig;
use crate::discovery::DiscoveryScanner;
use crate::error::{GatewayError, Result};
use crate::model::{
    DiscoveredDevice, McsStatus, PartyRole, PickListItem, Source, SystemStatus, Zone,
};

const PLAY_RADIO_DEADLINE: Duration = Duration::from_secs(45);
const PARTY_SETTLE: Duration = Duration::from_millis(500);
const HOST_FIND_ATTEMPTS: u32 = 3;
const INSTANCE_SWITCH_SETTLE: Duration = Duration::from_secs(2);
const INSTANCE_REUSE_SETTLE: Duration = Duration::from_secs(1);
const MENU_LOAD_SETTLE: Duration = Duration::from_secs(2);
const FILTER_SETTLE: Duration = Duration::from_millis(1500);
const PLAY_SETTLE: Duration = Duration::from_millis(500);
const BROWSE_ATTEMPTS: u32 = 3;
const BROWSE_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Menu titles that mark the radio directory entry.
const RADIO_KEYWORDS: &[&str] = &["tunein", "radiotime", "radio"];

/// Connection health of one client slot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientHealth {
    pub initialized: bool,
    pub connected: bool,
}

/// Health view over both protocol sessions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthView {
    pub mrad: ClientHealth,
    pub mcs: ClientHealth,
}

/// Process-wide application record.
pub struct Gateway {
    pub config: GatewayConfig,
    mrad: Arc<MradClient>,
    mcs: Arc<McsClient>,
    bus: Arc<EventBus>,
    pub broadcaster: Arc<Broadcaster>,
    pub shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(config.subscriber_queue_depth));
        let mrad = Arc::new(MradClient::new(
            config.nuvo_host.clone(),
            config.mrad_port,
            config.command_timeout(),
            Arc::clone(&bus),
        ));
        let mcs = Arc::new(McsClient::new(
            config.nuvo_host.clone(),
            config.mcs_port,
            config.client_name.clone(),
            config.mcs_command_timeout(),
            config.reconnect_settle(),
            config.reconnect_stabilize(),
        ));
        let broadcaster = Broadcaster::spawn(&bus, shutdown.child_token());
        Arc::new(Self { config, mrad, mcs, bus, broadcaster, shutdown })
    }

    /// Connect both sessions. A device that is offline at startup is not
    /// fatal: the slot stays down and the first command retries.
    pub async fn start(&self) {
        if let Err(e) = self.mrad.connect().await {
            tracing::warn!(err = %e, "MRAD connect failed at startup");
        }
        if let Err(e) = self.mcs.connect().await {
            tracing::warn!(err = %e, "MCS connect failed at startup");
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Register a callback for device state changes. The returned token
    /// detaches it via [`EventBus::unsubscribe`].
    pub async fn subscribe<F, Fut>(&self, callback: F) -> crate::bus::SubscriberId
    where
        F: Fn(crate::model::StateChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bus.subscribe(callback).await
    }

    pub fn health(&self) -> HealthView {
        HealthView {
            mrad: ClientHealth {
                initialized: self.mrad.is_initialized(),
                connected: self.mrad.is_connected(),
            },
            mcs: ClientHealth {
                initialized: self.mcs.is_initialized(),
                connected: self.mcs.is_connected(),
            },
        }
    }

    /// Borrow the zone-control client, reconnecting once if the slot is
    /// marked down.
    async fn mrad(&self) -> Result<&MradClient> {
        if !self.mrad.is_connected() {
            self.mrad.connect().await.map_err(|e| e.context("zone-control session"))?;
        }
        Ok(&self.mrad)
    }

    /// Borrow the media-server client, reconnecting once if the slot is
    /// marked down.
    async fn mcs(&self) -> Result<&McsClient> {
        if !self.mcs.is_connected() {
            self.mcs.reconnect().await.map_err(|e| e.context("media-server session"))?;
        }
        Ok(&self.mcs)
    }

    // -- Zone operations ------------------------------------------------------

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.mrad().await?.browse_zones().await
    }

    pub async fn get_zone(&self, zone_number: u32) -> Result<Zone> {
        let zones = self.list_zones().await?;
        zones
            .into_iter()
            .find(|z| z.zone_number == zone_number)
            .ok_or_else(|| GatewayError::not_found(format!("zone {zone_number} not found")))
    }

    pub async fn power_on(&self, zone_number: u32) -> Result<()> {
        self.mrad().await?.power_on(zone_number).await
    }

    pub async fn power_off(&self, zone_number: u32) -> Result<()> {
        self.mrad().await?.power_off(zone_number).await
    }

    pub async fn set_volume(&self, zone_number: u32, volume: i32) -> Result<()> {
        // Validate before borrowing a session: a bad value never generates
        // wire traffic, reconnects included.
        if !(0..=crate::client::mrad::MAX_VOLUME).contains(&volume) {
            return Err(GatewayError::invalid_argument(format!(
                "volume {volume} outside 0..={}",
                crate::client::mrad::MAX_VOLUME
            )));
        }
        self.mrad().await?.set_volume(volume, Some(zone_number)).await
    }

    pub async fn toggle_mute(&self, zone_number: u32) -> Result<()> {
        self.mrad().await?.mute_toggle(Some(zone_number)).await
    }

    /// Route a zone to a source: select the zone context, then the source.
    pub async fn set_zone_source(&self, zone_number: u32, source_guid: &str) -> Result<()> {
        let mrad = self.mrad().await?;
        let zones = mrad.browse_zones().await?;
        let zone = zones
            .iter()
            .find(|z| z.zone_number == zone_number)
            .ok_or_else(|| GatewayError::not_found(format!("zone {zone_number} not found")))?;
        let sources = mrad.browse_sources().await?;
        if !sources.iter().any(|s| s.guid == source_guid) {
            return Err(GatewayError::not_found(format!("source {source_guid:?} not found")));
        }
        mrad.set_zone(&zone.guid).await?;
        mrad.set_source(source_guid).await
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        self.mrad().await?.browse_sources().await
    }

    pub async fn get_status(&self) -> Result<SystemStatus> {
        self.mrad().await?.get_status().await
    }

    pub async fn toggle_party_mode(&self) -> Result<()> {
        self.mrad().await?.party_mode_toggle().await
    }

    pub async fn all_off(&self) -> Result<()> {
        self.mrad().await?.all_off().await
    }

    // -- Media-server operations ----------------------------------------------

    pub async fn list_instances(&self) -> Result<Vec<String>> {
        self.mcs().await?.browse_instances().await
    }

    pub async fn set_instance(&self, instance: &str) -> Result<()> {
        self.mcs().await?.set_instance(instance).await
    }

    pub async fn browse_radio_stations(&self) -> Result<Vec<PickListItem>> {
        self.mcs().await?.browse_radio_stations().await
    }

    pub async fn browse_albums(&self) -> Result<Vec<PickListItem>> {
        self.mcs().await?.browse_albums().await
    }

    pub async fn browse_artists(&self) -> Result<Vec<PickListItem>> {
        self.mcs().await?.browse_artists().await
    }

    pub async fn browse_album_titles(&self, album_guid: &str) -> Result<Vec<PickListItem>> {
        self.mcs().await?.browse_album_titles(album_guid).await
    }

    pub async fn browse_queue(&self) -> Result<Vec<PickListItem>> {
        self.mcs().await?.browse_now_playing().await
    }

    pub async fn play_radio_station(&self, guid: &str) -> Result<()> {
        self.mcs().await?.play_radio_station(guid).await
    }

    pub async fn play_album(&self, guid: &str) -> Result<()> {
        self.mcs().await?.play_album(guid).await
    }

    pub async fn play_artist(&self, guid: &str) -> Result<()> {
        self.mcs().await?.play_artist(guid).await
    }

    pub async fn play_title(&self, guid: &str) -> Result<()> {
        self.mcs().await?.play_title(guid).await
    }

    pub async fn play_all_music(&self) -> Result<()> {
        self.mcs().await?.play_all_music().await
    }

    pub async fn ack_pick_item(&self, index: usize) -> Result<()> {
        self.mcs().await?.ack_pick_item(index).await
    }

    pub async fn set_radio_filter(&self, text: &str) -> Result<()> {
        self.mcs().await?.set_radio_filter(text).await
    }

    /// Select an instance and report what it is playing.
    pub async fn now_playing(&self, instance: &str) -> Result<McsStatus> {
        let mcs = self.mcs().await?;
        mcs.set_instance(instance).await?;
        mcs.get_status().await
    }

    // -- Discovery ------------------------------------------------------------

    /// Scan for devices. With no explicit network, the /24 around the
    /// configured device address is probed.
    pub async fn discover(&self, network: Option<&str>) -> Result<Vec<DiscoveredDevice>> {
        let scanner = DiscoveryScanner::new(
            self.config.mrad_port,
            self.config.mcs_port,
            self.config.discovery_concurrency,
        );
        let network = match network {
            Some(n) => n.to_owned(),
            None => default_network(&self.config.nuvo_host),
        };
        scanner.scan(&network).await
    }

    // -- Orchestration --------------------------------------------------------

    /// One-click radio playback: put the system in party mode, route the
    /// host zone to the media server, navigate its menu to the radio
    /// directory, and start the named station. Runs under an overall
    /// deadline; on expiry the sessions stay intact.
    pub async fn play_radio_station_by_name(
        &self,
        station_name: &str,
        instance: &str,
    ) -> Result<()> {
        match timeout(PLAY_RADIO_DEADLINE, self.play_radio_impl(station_name, instance)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(format!(
                "playing {station_name:?} did not finish within {PLAY_RADIO_DEADLINE:?}; \
                 the media server may be unresponsive"
            ))),
        }
    }

    async fn play_radio_impl(&self, station_name: &str, instance: &str) -> Result<()> {
        let mrad = self.mrad().await?;
        let mcs = self.mcs().await?;

        // Party mode on, then wait for a Host role to appear.
        let mut status = mrad.get_status().await?;
        if !status.zones.iter().any(|z| z.party_mode != PartyRole::Off) {
            tracing::info!("enabling party mode");
            mrad.party_mode_toggle().await?;
            sleep(PARTY_SETTLE).await;
            status = mrad.get_status().await?;
        }
        let mut host = find_host(&status.zones);
        for _ in 1..HOST_FIND_ATTEMPTS {
            if host.is_some() {
                break;
            }
            sleep(PARTY_SETTLE).await;
            status = mrad.get_status().await?;
            host = find_host(&status.zones);
        }
        let host = host.ok_or_else(|| {
            GatewayError::not_found(format!(
                "no party-mode host zone after {HOST_FIND_ATTEMPTS} attempts"
            ))
        })?;

        // Resolve the media-server source by name.
        let wanted = instance.replace('_', " ");
        let source = status
            .sources
            .iter()
            .find(|s| s.name.contains(&wanted) || s.name.contains(instance))
            .ok_or_else(|| GatewayError::not_found(format!("source {wanted:?} not found")))?;

        tracing::info!(zone = %host.name, source = %source.name, "routing host zone");
        mrad.set_zone(&host.guid).await?;
        mrad.set_source(&source.guid).await?;

        // Instance switches are slow on this hardware; reuse still needs a
        // moment after any reconnect.
        if mcs.current_instance().await.as_deref() != Some(instance) {
            mcs.set_instance(instance).await?;
            sleep(INSTANCE_SWITCH_SETTLE).await;
        } else {
            sleep(INSTANCE_REUSE_SETTLE).await;
        }

        // Find the radio directory in the top-level menu.
        let menu = browse_non_empty(mcs).await?;
        let directory = menu
            .iter()
            .find(|item| {
                let title = item.title.to_lowercase();
                RADIO_KEYWORDS.iter().any(|keyword| title.contains(keyword))
            })
            .ok_or_else(|| {
                GatewayError::not_found(format!(
                    "no radio directory in media-server menu; available: {}",
                    titles(&menu)
                ))
            })?;

        tracing::info!(entry = %directory.title, index = directory.index, "entering radio directory");
        mcs.ack_pick_item(directory.index).await?;
        sleep(MENU_LOAD_SETTLE).await;

        // Find the station, filtering if the unfiltered list misses it.
        let needle = station_name.to_lowercase();
        let mut stations = browse_non_empty(mcs).await?;
        let mut index = find_station(&stations, &needle);
        if index.is_none() {
            tracing::info!(filter = station_name, "station not listed, applying filter");
            mcs.set_radio_filter(station_name).await?;
            sleep(FILTER_SETTLE).await;
            stations = browse_non_empty(mcs).await?;
            index = find_station(&stations, &needle);
        }
        let index = index.ok_or_else(|| {
            GatewayError::not_found(format!(
                "station {station_name:?} not found; available: {}",
                titles(&stations)
            ))
        })?;

        mcs.ack_pick_item(index).await?;
        sleep(PLAY_SETTLE).await;
        tracing::info!(station = station_name, instance, "radio playback started");
        Ok(())
    }
}

fn find_host(zones: &[Zone]) -> Option<&Zone> {
    zones.iter().find(|z| z.party_mode == PartyRole::Host)
}

fn find_station(stations: &[PickListItem], needle: &str) -> Option<usize> {
    stations.iter().find(|item| item.title.to_lowercase().contains(needle)).map(|item| item.index)
}

/// Browse the pick list, retrying when the menu comes back empty; the
/// device needs a beat after navigation before the listing is real.
async fn browse_non_empty(mcs: &McsClient) -> Result<Vec<PickListItem>> {
    for attempt in 1..=BROWSE_ATTEMPTS {
        let items = mcs.browse_radio_stations().await?;
        if !items.is_empty() {
            return Ok(items);
        }
        tracing::debug!(attempt, "pick list came back empty");
        if attempt < BROWSE_ATTEMPTS {
            sleep(BROWSE_RETRY_DELAY).await;
        }
    }
    Ok(Vec::new())
}

fn titles(items: &[PickListItem]) -> String {
    let mut list =
        items.iter().take(10).map(|i| i.title.as_str()).collect::<Vec<_>>().join(", ");
    if list.is_empty() {
        list.push_str("(empty)");
    }
    list
}

fn default_network(host: &str) -> String {
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let octets = ip.octets();
            format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
        }
        Err(_) => "192.168.1.0/24".to_owned(),
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
