// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State-change event hub.
//!
//! Delivery fans out over a broadcast ring of bounded depth. Each callback
//! subscriber drains its own receiver in its own task, so a slow subscriber
//! lags (and drops its oldest pending events, counted) without holding up
//! the MRAD read loop or any other subscriber. Per-subscriber delivery is
//! FIFO in wire arrival order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::StateChangeEvent;

/// Detach token for a registered subscriber.
pub type SubscriberId = u64;

struct SubscriberEntry {
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

/// Subscribe/publish hub for device state changes.
pub struct EventBus {
    event_tx: broadcast::Sender<StateChangeEvent>,
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus whose per-subscriber queue retains `queue_depth` events.
    pub fn new(queue_depth: usize) -> Self {
        let (event_tx, _) = broadcast::channel(queue_depth.max(1));
        Self { event_tx, subscribers: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Publish a parsed event to all subscribers.
    pub fn publish(&self, event: StateChangeEvent) {
        // No receivers is normal before anything subscribes.
        let _ = self.event_tx.send(event);
    }

    /// A raw receiver over the event stream, for consumers that manage
    /// their own delivery loop (the push broadcaster does).
    pub fn subscribe_raw(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Register an async callback. Events are delivered one at a time per
    /// subscriber; a failing callback is logged and delivery continues.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> SubscriberId
    where
        F: Fn(StateChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let mut rx = self.event_tx.subscribe();

        {
            let cancel = cancel.clone();
            let dropped = Arc::clone(&dropped);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        recv = rx.recv() => match recv {
                            Ok(event) => {
                                if let Err(e) = callback(event).await {
                                    tracing::warn!(subscriber = id, err = %e, "event subscriber failed");
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                dropped.fetch_add(n, Ordering::Relaxed);
                                tracing::warn!(subscriber = id, dropped = n, "slow subscriber dropped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            });
        }

        self.subscribers.write().await.insert(id, SubscriberEntry { cancel, dropped });
        id
    }

    /// Detach one subscriber. Returns false if the ID was unknown.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.subscribers.write().await.remove(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Detach every subscriber.
    pub async fn clear(&self) {
        let mut subscribers = self.subscribers.write().await;
        for (_, entry) in subscribers.drain() {
            entry.cancel.cancel();
        }
    }

    /// Events dropped so far for a subscriber that fell behind.
    pub async fn dropped_events(&self, id: SubscriberId) -> Option<u64> {
        self.subscribers.read().await.get(&id).map(|e| e.dropped.load(Ordering::Relaxed))
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
