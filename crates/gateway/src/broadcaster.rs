// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push fan-out: serializes bus events into the wire envelope and delivers
//! them to every attached push subscriber.
//!
//! Subscribers are mpsc channels (the WebSocket handler holds the receiving
//! end). A send that fails or stalls past the per-subscriber deadline
//! detaches that subscriber; everyone else keeps receiving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::model::StateChangeEvent;

/// A late subscriber is detached after stalling this long.
const SEND_DEADLINE: Duration = Duration::from_secs(1);

/// Per-subscriber channel capacity.
const SUBSCRIBER_BUFFER: usize = 64;

/// Canonical push envelope for state changes.
#[derive(Debug, Serialize)]
struct PushEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    target: &'a str,
    property: &'a str,
    value: &'a str,
    timestamp: f64,
}

impl<'a> PushEnvelope<'a> {
    fn new(event: &'a StateChangeEvent) -> Self {
        Self {
            kind: "state_change",
            target: &event.target,
            property: &event.property,
            value: &event.value,
            timestamp: event.timestamp,
        }
    }
}

/// Multiplexes core events to any number of push subscribers.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl Broadcaster {
    /// Start the delivery loop over a fresh receiver on `bus`.
    pub fn spawn(bus: &EventBus, cancel: CancellationToken) -> Arc<Self> {
        let broadcaster = Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel: cancel.clone(),
        });

        let mut rx = bus.subscribe_raw();
        let this = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    recv = rx.recv() => match recv {
                        Ok(event) => this.deliver(&event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(dropped = n, "push broadcaster lagged behind event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        broadcaster
    }

    /// Attach a push subscriber. The returned receiver yields serialized
    /// envelopes until the subscriber is detached.
    pub async fn attach(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.write().await.insert(id, tx);
        tracing::debug!(subscriber = id, "push subscriber attached");
        (id, rx)
    }

    pub async fn detach(&self, id: u64) {
        if self.subscribers.write().await.remove(&id).is_some() {
            tracing::debug!(subscriber = id, "push subscriber detached");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn deliver(&self, event: &StateChangeEvent) {
        let json = match serde_json::to_string(&PushEnvelope::new(event)) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(err = %e, "failed to serialize push envelope");
                return;
            }
        };

        // Snapshot so attach/detach never contend with in-flight sends.
        let snapshot: Vec<(u64, mpsc::Sender<String>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if let Err(e) = tx.send_timeout(json.clone(), SEND_DEADLINE).await {
                tracing::warn!(subscriber = id, err = %e, "push delivery failed, detaching");
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
#[path = "broadcaster_tests.rs"]
mod tests;
