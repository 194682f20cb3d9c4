// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "nuvoport", about = "HTTP gateway for NuVo MusicPort controllers")]
pub struct GatewayConfig {
    /// Device IP address.
    #[arg(long, env = "NUVO_HOST")]
    pub nuvo_host: String,

    /// MRAD (zone control) port on the device.
    #[arg(long, default_value_t = 5006, env = "NUVO_MRAD_PORT")]
    pub mrad_port: u16,

    /// MCS (media control) port on the device.
    #[arg(long, default_value_t = 5004, env = "NUVO_MCS_PORT")]
    pub mcs_port: u16,

    /// Host to bind the HTTP API on.
    #[arg(long, default_value = "0.0.0.0", env = "NUVO_GATEWAY_HOST")]
    pub http_host: String,

    /// Port to serve the HTTP API on.
    #[arg(long, default_value_t = 8000, env = "NUVO_GATEWAY_PORT")]
    pub http_port: u16,

    /// MRAD command deadline in seconds.
    #[arg(long, default_value_t = 5.0, env = "NUVO_COMMAND_TIMEOUT_S")]
    pub command_timeout_s: f64,

    /// MCS command deadline in seconds.
    #[arg(long, default_value_t = 10.0, env = "NUVO_MCS_COMMAND_TIMEOUT_S")]
    pub mcs_command_timeout_s: f64,

    /// Pause after closing an MCS socket before reconnecting. The device
    /// drops fresh connections opened sooner.
    #[arg(long, default_value_t = 3.0, env = "NUVO_RECONNECT_SETTLE_S")]
    pub reconnect_settle_s: f64,

    /// Pause after an MCS reconnect before resuming caller traffic.
    #[arg(long, default_value_t = 3.0, env = "NUVO_RECONNECT_STABILIZE_S")]
    pub reconnect_stabilize_s: f64,

    /// Max concurrent probes during network discovery.
    #[arg(long, default_value_t = 100, env = "NUVO_DISCOVERY_CONCURRENCY")]
    pub discovery_concurrency: usize,

    /// Per-subscriber event queue depth; overflow drops oldest.
    #[arg(long, default_value_t = 256, env = "NUVO_SUBSCRIBER_QUEUE_DEPTH")]
    pub subscriber_queue_depth: usize,

    /// Client name reported to the media server on connect.
    #[arg(long, default_value = "nuvoport", env = "NUVO_CLIENT_NAME")]
    pub client_name: String,
}

impl GatewayConfig {
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.command_timeout_s)
    }

    pub fn mcs_command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.mcs_command_timeout_s)
    }

    pub fn reconnect_settle(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.reconnect_settle_s)
    }

    pub fn reconnect_stabilize(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.reconnect_stabilize_s)
    }
}
