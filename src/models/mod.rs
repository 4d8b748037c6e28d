// src/models/mod.rs

//! Domain models for the feed.
//!
//! Plain data: records, statistics projections, subscriber events and the
//! configuration tree.

mod config;
mod event;
mod record;
mod stats;

// Re-export all public types
pub use config::{
    Config, DedupPolicy, ExtractionConfig, HttpConfig, HubConfig, LoggingConfig, PollingConfig,
    PortalConfig, StoreConfig,
};
pub use event::{FeedEvent, InitialSnapshot};
pub use record::{Platform, Record};
pub use stats::{AggregateSnapshot, Analytics, HourlyStat, PlatformCounts, Statistics};
