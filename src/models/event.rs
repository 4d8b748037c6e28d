//! Events pushed to feed subscribers.

use serde::{Deserialize, Serialize};

use super::{AggregateSnapshot, PlatformCounts, Record};

/// A change notification delivered through the fan-out hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A record was accepted into the store for the first time
    RecordAccepted { record: Record },

    /// One poll cycle finished; follows that cycle's record events
    BatchComplete {
        count: usize,
        breakdown: PlatformCounts,
        snapshot: AggregateSnapshot,
    },

    /// The portal session was established or lost
    ConnectionStatusChanged { connected: bool },

    /// The store was emptied; mirrored state should be dropped
    Cleared,

    /// The poll loop was started, or a stop was requested
    MonitoringChanged { active: bool },
}

/// State handed to a subscriber when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSnapshot {
    /// Most recent records, newest first
    pub records: Vec<Record>,
    pub aggregate: AggregateSnapshot,
}
