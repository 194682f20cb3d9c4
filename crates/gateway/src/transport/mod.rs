// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket adapter over the gateway façade. Handlers are thin:
//! translate the request, call the façade, map the error kind to a status.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::gateway::Gateway;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(http::health))
        // System
        .route("/api/v1/status", get(http::system_status))
        .route("/api/v1/control/partymode", post(http::toggle_party_mode))
        .route("/api/v1/control/alloff", post(http::all_off))
        .route("/api/v1/control/play-radio-station", post(http::play_radio_station_by_name))
        .route("/api/v1/control/now-playing", get(http::now_playing))
        // Zones
        .route("/api/v1/zones", get(http::list_zones))
        .route("/api/v1/zones/{zone_number}", get(http::get_zone))
        .route("/api/v1/zones/{zone_number}/power/on", post(http::power_on))
        .route("/api/v1/zones/{zone_number}/power/off", post(http::power_off))
        .route("/api/v1/zones/{zone_number}/volume", post(http::set_volume))
        .route("/api/v1/zones/{zone_number}/mute", post(http::toggle_mute))
        .route("/api/v1/zones/{zone_number}/source", post(http::set_zone_source))
        .route("/api/v1/sources", get(http::list_sources))
        // Media servers
        .route("/api/v1/music-servers/instances", get(http::list_instances))
        .route("/api/v1/music-servers/instance", post(http::set_instance))
        .route("/api/v1/music-servers/radio-stations", get(http::radio_stations))
        .route("/api/v1/music-servers/pick/{index}", post(http::ack_pick_item))
        .route("/api/v1/music-servers/radio-filter", post(http::set_radio_filter))
        .route("/api/v1/music-servers/play/radio-station", post(http::play_radio_station))
        .route("/api/v1/music-servers/play/album", post(http::play_album))
        .route("/api/v1/music-servers/play/artist", post(http::play_artist))
        .route("/api/v1/music-servers/play/title", post(http::play_title))
        .route("/api/v1/music-servers/play/all", post(http::play_all_music))
        // Local library
        .route("/api/v1/library/albums", get(http::albums))
        .route("/api/v1/library/albums/{guid}/titles", get(http::album_titles))
        .route("/api/v1/library/artists", get(http::artists))
        .route("/api/v1/library/queue", get(http::queue))
        // Discovery
        .route("/api/v1/discovery", get(http::discover))
        // Push events
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}
