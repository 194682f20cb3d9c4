// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nuvoport: HTTP + push-events gateway for NuVo MusicPort multi-room
//! audio controllers.
//!
//! The device speaks two line-oriented TCP protocols: MRAD for zone
//! control and MCS for media browsing/playback. This crate keeps one
//! persistent session per protocol alive across device slowness and
//! drops, serializes commands over them, fans device-originated state
//! changes out to push subscribers, and exposes the lot as a REST +
//! WebSocket API.

pub mod broadcaster;
pub mod bus;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod model;
pub mod protocol;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::transport::build_router;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.http_host, config.http_port);
    let shutdown = CancellationToken::new();

    let gateway = Gateway::new(config, shutdown.clone());
    gateway.start().await;

    tracing::info!("nuvoport listening on {addr}");
    let router = build_router(Arc::clone(&gateway));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
