//! Ingestion pipeline.
//!
//! - `Monitor`: poll loop lifecycle and cycle execution
//! - `FanoutHub`: event delivery to subscribers
//! - `RetryPolicy` / `Schedule`: backoff between failed cycles

pub mod backoff;
pub mod hub;
pub mod monitor;

pub use backoff::{RetryPolicy, Schedule};
pub use hub::{FanoutHub, Subscription};
pub use monitor::{CycleReport, Lifecycle, Monitor, MonitorStatus};
