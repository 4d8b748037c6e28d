//! In-process fan-out of feed events.
//!
//! One broadcast channel carries every [`FeedEvent`]. Publishing never
//! blocks and is a no-op without subscribers; a subscriber that falls more
//! than the channel capacity behind skips the events it missed.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::{FeedEvent, HubConfig, InitialSnapshot, PlatformCounts, Record, Statistics};
use crate::services::ConnectionObserver;
use crate::storage::{IngestionStore, RecordFilter};

/// Cloneable handle for publishing events and registering subscribers.
#[derive(Clone)]
pub struct FanoutHub {
    store: Arc<IngestionStore>,
    sender: broadcast::Sender<FeedEvent>,
    seed_size: usize,
}

/// A registered subscriber: its catch-up seed plus the live event stream.
///
/// The receiver exists before the seed is read, so an event racing with
/// registration may show up in both. Consumers dedupe by sid.
pub struct Subscription {
    pub initial: InitialSnapshot,
    receiver: broadcast::Receiver<FeedEvent>,
}

impl Subscription {
    /// Next event, or `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Subscriber lagged, skipped {} event(s)", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<FeedEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    log::warn!("Subscriber lagged, skipped {} event(s)", missed);
                }
                Err(_) => return None,
            }
        }
    }
}

impl FanoutHub {
    pub fn new(store: Arc<IngestionStore>, config: &HubConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            store,
            sender,
            seed_size: config.seed_size,
        }
    }

    pub fn store(&self) -> &Arc<IngestionStore> {
        &self.store
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Register a subscriber and hand it the latest records.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.sender.subscribe();
        let initial = self.store.seed(self.seed_size);
        log::debug!(
            "Subscriber registered with {} seed record(s)",
            initial.records.len()
        );
        Subscription { initial, receiver }
    }

    pub fn publish(&self, event: FeedEvent) {
        // Ignore send errors (no active receivers)
        let _ = self.sender.send(event);
    }

    pub fn record_accepted(&self, record: Record) {
        self.publish(FeedEvent::RecordAccepted { record });
    }

    /// Close out a cycle with the accepted count and fresh aggregates.
    pub fn batch_complete(&self, count: usize, breakdown: PlatformCounts) {
        self.publish(FeedEvent::BatchComplete {
            count,
            breakdown,
            snapshot: self.store.aggregate(),
        });
    }

    pub fn cleared(&self) {
        self.publish(FeedEvent::Cleared);
    }

    pub fn monitoring_changed(&self, active: bool) {
        self.publish(FeedEvent::MonitoringChanged { active });
    }

    /// Read-only query used by consumers that poll instead of subscribing.
    pub fn snapshot(&self, filter: &RecordFilter, limit: usize) -> Vec<Record> {
        self.store.snapshot(filter, limit)
    }

    pub fn statistics(&self) -> Statistics {
        self.store.statistics()
    }
}

impl ConnectionObserver for FanoutHub {
    fn connection_status(&self, connected: bool) {
        if self.store.set_connection_status(connected) {
            log::info!(
                "Connection status: {}",
                if connected { "connected" } else { "disconnected" }
            );
            self.publish(FeedEvent::ConnectionStatusChanged { connected });
        }
    }
}
