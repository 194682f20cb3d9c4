// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the gateway API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::Gateway;

// -- Request/Response types ---------------------------------------------------

/// Generic acknowledgment for control commands.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub volume: i32,
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub source_guid: String,
}

#[derive(Debug, Deserialize)]
pub struct InstanceRequest {
    pub instance: String,
}

#[derive(Debug, Deserialize)]
pub struct GuidRequest {
    pub guid: String,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayRadioStationRequest {
    pub station_name: String,
    #[serde(default = "default_instance")]
    pub music_server_instance: String,
}

#[derive(Debug, Deserialize)]
pub struct NowPlayingQuery {
    #[serde(default = "default_instance")]
    pub instance: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    pub network: Option<String>,
}

fn default_instance() -> String {
    "Music_Server_A".to_owned()
}

// -- Helpers ------------------------------------------------------------------

fn json_result<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

fn command_result(result: Result<()>, message: impl Into<String>) -> Response {
    match result {
        Ok(()) => {
            Json(CommandResponse { success: true, message: message.into() }).into_response()
        }
        Err(e) => e.to_http_response().into_response(),
    }
}

// -- Health & system ----------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.health())
}

/// `GET /api/v1/status`
pub async fn system_status(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.get_status().await)
}

/// `POST /api/v1/control/partymode`
pub async fn toggle_party_mode(State(gateway): State<Arc<Gateway>>) -> Response {
    command_result(gateway.toggle_party_mode().await, "party mode toggled")
}

/// `POST /api/v1/control/alloff`
pub async fn all_off(State(gateway): State<Arc<Gateway>>) -> Response {
    command_result(gateway.all_off().await, "all zones turned off")
}

/// `POST /api/v1/control/play-radio-station`, the one-click orchestration.
pub async fn play_radio_station_by_name(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<PlayRadioStationRequest>,
) -> Response {
    let result = gateway
        .play_radio_station_by_name(&req.station_name, &req.music_server_instance)
        .await;
    command_result(
        result,
        format!("playing {} on {} in party mode", req.station_name, req.music_server_instance),
    )
}

/// `GET /api/v1/control/now-playing`
pub async fn now_playing(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<NowPlayingQuery>,
) -> Response {
    json_result(gateway.now_playing(&query.instance).await)
}

// -- Zones --------------------------------------------------------------------

/// `GET /api/v1/zones`
pub async fn list_zones(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.list_zones().await)
}

/// `GET /api/v1/zones/{zone_number}`
pub async fn get_zone(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
) -> Response {
    json_result(gateway.get_zone(zone_number).await)
}

/// `POST /api/v1/zones/{zone_number}/power/on`
pub async fn power_on(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
) -> Response {
    command_result(gateway.power_on(zone_number).await, format!("zone {zone_number} powered on"))
}

/// `POST /api/v1/zones/{zone_number}/power/off`
pub async fn power_off(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
) -> Response {
    command_result(gateway.power_off(zone_number).await, format!("zone {zone_number} powered off"))
}

/// `POST /api/v1/zones/{zone_number}/volume`
pub async fn set_volume(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
    Json(req): Json<VolumeRequest>,
) -> Response {
    command_result(
        gateway.set_volume(zone_number, req.volume).await,
        format!("zone {zone_number} volume set to {}", req.volume),
    )
}

/// `POST /api/v1/zones/{zone_number}/mute`
pub async fn toggle_mute(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
) -> Response {
    command_result(gateway.toggle_mute(zone_number).await, format!("zone {zone_number} mute toggled"))
}

/// `POST /api/v1/zones/{zone_number}/source`
pub async fn set_zone_source(
    State(gateway): State<Arc<Gateway>>,
    Path(zone_number): Path<u32>,
    Json(req): Json<SourceRequest>,
) -> Response {
    command_result(
        gateway.set_zone_source(zone_number, &req.source_guid).await,
        format!("zone {zone_number} source set"),
    )
}

/// `GET /api/v1/sources`
pub async fn list_sources(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.list_sources().await)
}

// -- Media servers ------------------------------------------------------------

/// `GET /api/v1/music-servers/instances`
pub async fn list_instances(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.list_instances().await)
}

/// `POST /api/v1/music-servers/instance`
pub async fn set_instance(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    command_result(gateway.set_instance(&req.instance).await, format!("instance {} selected", req.instance))
}

/// `GET /api/v1/music-servers/radio-stations`
pub async fn radio_stations(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.browse_radio_stations().await)
}

/// `POST /api/v1/music-servers/pick/{index}`
pub async fn ack_pick_item(
    State(gateway): State<Arc<Gateway>>,
    Path(index): Path<usize>,
) -> Response {
    command_result(gateway.ack_pick_item(index).await, format!("pick item {index} selected"))
}

/// `POST /api/v1/music-servers/radio-filter`
pub async fn set_radio_filter(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<FilterRequest>,
) -> Response {
    command_result(gateway.set_radio_filter(&req.text).await, "radio filter applied")
}

/// `POST /api/v1/music-servers/play/radio-station`
pub async fn play_radio_station(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<GuidRequest>,
) -> Response {
    command_result(gateway.play_radio_station(&req.guid).await, "station playback started")
}

/// `POST /api/v1/music-servers/play/album`
pub async fn play_album(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<GuidRequest>,
) -> Response {
    command_result(gateway.play_album(&req.guid).await, "album playback started")
}

/// `POST /api/v1/music-servers/play/artist`
pub async fn play_artist(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<GuidRequest>,
) -> Response {
    command_result(gateway.play_artist(&req.guid).await, "artist playback started")
}

/// `POST /api/v1/music-servers/play/title`
pub async fn play_title(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<GuidRequest>,
) -> Response {
    command_result(gateway.play_title(&req.guid).await, "title playback started")
}

/// `POST /api/v1/music-servers/play/all`
pub async fn play_all_music(State(gateway): State<Arc<Gateway>>) -> Response {
    command_result(gateway.play_all_music().await, "library playback started")
}

// -- Local library ------------------------------------------------------------

/// `GET /api/v1/library/albums`
pub async fn albums(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.browse_albums().await)
}

/// `GET /api/v1/library/albums/{guid}/titles`
pub async fn album_titles(
    State(gateway): State<Arc<Gateway>>,
    Path(guid): Path<String>,
) -> Response {
    json_result(gateway.browse_album_titles(&guid).await)
}

/// `GET /api/v1/library/artists`
pub async fn artists(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.browse_artists().await)
}

/// `GET /api/v1/library/queue`
pub async fn queue(State(gateway): State<Arc<Gateway>>) -> Response {
    json_result(gateway.browse_queue().await)
}

// -- Discovery ----------------------------------------------------------------

/// `GET /api/v1/discovery`
pub async fn discover(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<DiscoveryQuery>,
) -> Response {
    json_result(gateway.discover(query.network.as_deref()).await)
}
