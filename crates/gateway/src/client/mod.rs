// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent TCP sessions to the device: MRAD (zone control) and MCS
//! (media control). The two clients share a concurrency contract (one
//! in-flight command per session, a reconnect lock with a bounded wait)
//! but differ in read strategy (see each module).

pub mod mcs;
pub mod mrad;

pub use mcs::McsClient;
pub use mrad::MradClient;

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{GatewayError, Result};

/// How long a caller waits on another caller's reconnect before giving up.
pub(crate) const RECONNECT_WAIT: Duration = Duration::from_secs(5);

/// Open a TCP connection with a connect timeout.
pub(crate) async fn connect_tcp(host: &str, port: u16, deadline: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(deadline, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(GatewayError::unavailable(format!("connect {host}:{port}: {e}"))),
        Err(_) => Err(GatewayError::unavailable(format!("connect {host}:{port}: timed out"))),
    }
}
