// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket push endpoint: attaches the connection to the broadcaster and
//! forwards state-change envelopes as they arrive.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::gateway::Gateway;

/// `GET /ws`: WebSocket upgrade for real-time state updates.
pub async fn ws_handler(
    State(gateway): State<Arc<Gateway>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(gateway, socket))
}

/// Per-connection event loop. Client text frames are echoed back as a
/// heartbeat; everything outbound comes from the broadcaster.
async fn handle_ws(gateway: Arc<Gateway>, socket: WebSocket) {
    let (id, mut events) = gateway.broadcaster.attach().await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = gateway.shutdown.cancelled() => break,

            event = events.recv() => {
                match event {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Detached by the broadcaster (we stalled too long).
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // ping/pong/binary ignored
                }
            }
        }
    }

    gateway.broadcaster.detach(id).await;
}
