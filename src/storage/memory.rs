//! In-memory ingestion store.
//!
//! One mutex guards the whole state. Every operation takes the lock once,
//! does its work and copies results out, so callers never hold references
//! into the store.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Local};

use crate::models::{
    AggregateSnapshot, Analytics, DedupPolicy, HourlyStat, InitialSnapshot, Platform,
    PlatformCounts, Record, Statistics, StoreConfig,
};
use crate::storage::{AuditAction, AuditEntry, RecordFilter};

/// Limits used by [`IngestionStore::statistics`].
const STATS_TOP_COUNTRIES: usize = 10;
const STATS_TOP_RANGES: usize = 10;
const STATS_HOURS: usize = 6;

#[derive(Debug, Default)]
struct StoreState {
    /// Newest first
    recent: VecDeque<Record>,
    seen: HashSet<String>,
    platform_counts: PlatformCounts,
    country_counts: HashMap<String, u64>,
    range_counts: HashMap<String, u64>,
    hourly: BTreeMap<String, PlatformCounts>,
    /// Oldest first
    history: VecDeque<AuditEntry>,
    analytics: Analytics,
    last_update: Option<DateTime<Local>>,
    connection_status: bool,
}

/// Deduplicated, bounded record store with all-time aggregates.
#[derive(Debug)]
pub struct IngestionStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
}

impl IngestionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a record unless its sid was seen before.
    pub fn add(&self, record: Record) -> bool {
        self.add_at(record, Local::now())
    }

    /// [`add`](Self::add) with an explicit insertion time.
    pub fn add_at(&self, record: Record, now: DateTime<Local>) -> bool {
        let mut state = self.state();
        if state.seen.contains(&record.sid) {
            return false;
        }

        state.recent.push_front(record.clone());
        while state.recent.len() > self.config.recent_capacity {
            if let Some(evicted) = state.recent.pop_back() {
                if self.config.dedup_policy == DedupPolicy::Windowed {
                    state.seen.remove(&evicted.sid);
                }
            }
        }
        state.seen.insert(record.sid.clone());

        state.platform_counts.increment(record.platform);
        *state.country_counts.entry(record.country.clone()).or_insert(0) += 1;
        state
            .hourly
            .entry(hour_label(&now))
            .or_default()
            .increment(record.platform);

        state.history.push_back(AuditEntry {
            time: now,
            action: AuditAction::NewRecord,
            record,
        });
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }

        state.last_update = Some(now);
        state.analytics = self.compute_analytics(&state, now);
        true
    }

    /// Tally range labels seen on the live page.
    pub fn record_ranges(&self, ranges: &[String]) {
        if ranges.is_empty() {
            return;
        }
        let mut state = self.state();
        for range in ranges {
            *state.range_counts.entry(range.clone()).or_insert(0) += 1;
        }
    }

    /// Drop all records, counters and dedup keys. Connection status is kept.
    pub fn clear(&self) {
        let mut state = self.state();
        let connection_status = state.connection_status;
        *state = StoreState {
            connection_status,
            ..StoreState::default()
        };
    }

    /// Set the connection flag. Returns whether it changed.
    pub fn set_connection_status(&self, connected: bool) -> bool {
        let mut state = self.state();
        let changed = state.connection_status != connected;
        state.connection_status = connected;
        changed
    }

    pub fn connection_status(&self) -> bool {
        self.state().connection_status
    }

    /// Records currently held in the window.
    pub fn len(&self) -> usize {
        self.state().recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.state().last_update
    }

    /// Newest-first records matching `filter`, at most `limit`.
    pub fn snapshot(&self, filter: &RecordFilter, limit: usize) -> Vec<Record> {
        self.state()
            .recent
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn platform_counts(&self) -> PlatformCounts {
        self.state().platform_counts
    }

    /// Share of each platform in percent; empty when nothing was accepted.
    pub fn platform_percentages(&self) -> BTreeMap<Platform, f64> {
        self.state().platform_counts.percentages()
    }

    pub fn top_countries(&self, limit: usize) -> Vec<(String, u64)> {
        top_n(&self.state().country_counts, limit)
    }

    pub fn top_ranges(&self, limit: usize) -> Vec<(String, u64)> {
        top_n(&self.state().range_counts, limit)
    }

    /// The latest `hours` hour buckets, latest label first.
    pub fn hourly_stats(&self, hours: usize) -> Vec<HourlyStat> {
        hourly_stats(&self.state(), hours)
    }

    pub fn analytics(&self) -> Analytics {
        self.state().analytics.clone()
    }

    /// Most recent audit entries, newest first.
    pub fn history(&self, limit: usize) -> Vec<AuditEntry> {
        self.state()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn aggregate(&self) -> AggregateSnapshot {
        aggregate(&self.state())
    }

    /// Latest records and counts taken under a single lock.
    pub fn seed(&self, limit: usize) -> InitialSnapshot {
        let state = self.state();
        InitialSnapshot {
            records: state.recent.iter().take(limit).cloned().collect(),
            aggregate: aggregate(&state),
        }
    }

    pub fn statistics(&self) -> Statistics {
        let state = self.state();
        Statistics {
            total_records: state.recent.len(),
            total_received: state.platform_counts.total(),
            platform_counts: state.platform_counts,
            platform_percentages: state.platform_counts.percentages(),
            top_countries: top_n(&state.country_counts, STATS_TOP_COUNTRIES),
            unique_countries: state.country_counts.len(),
            hourly: hourly_stats(&state, STATS_HOURS),
            top_ranges: top_n(&state.range_counts, STATS_TOP_RANGES),
            analytics: state.analytics.clone(),
            connection_status: state.connection_status,
            last_update: state.last_update,
        }
    }

    fn compute_analytics(&self, state: &StoreState, now: DateTime<Local>) -> Analytics {
        let mut peak_hours: Vec<(String, u64)> = state
            .hourly
            .iter()
            .map(|(hour, counts)| (hour.clone(), counts.total()))
            .collect();
        sort_ranking(&mut peak_hours);
        peak_hours.truncate(self.config.peak_hours);

        // O(window) scan; fine at the configured capacity.
        let hour_ago = now - Duration::hours(1);
        let last_hour = state
            .recent
            .iter()
            .filter(|r| r.received_at > hour_ago)
            .count();

        Analytics {
            peak_hours,
            trending_countries: top_n(&state.country_counts, self.config.trending_countries),
            sms_rate: last_hour as f64 / 60.0,
        }
    }
}

impl Default for IngestionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn hour_label(at: &DateTime<Local>) -> String {
    at.format("%H:00").to_string()
}

fn aggregate(state: &StoreState) -> AggregateSnapshot {
    AggregateSnapshot {
        total_records: state.recent.len(),
        platform_counts: state.platform_counts,
        connection_status: state.connection_status,
        last_update: state.last_update,
    }
}

fn hourly_stats(state: &StoreState, hours: usize) -> Vec<HourlyStat> {
    state
        .hourly
        .iter()
        .rev()
        .take(hours)
        .map(|(hour, counts)| HourlyStat {
            hour: hour.clone(),
            counts: *counts,
        })
        .collect()
}

/// Highest counts first, ties by key.
fn sort_ranking(items: &mut [(String, u64)]) {
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

fn top_n(counts: &HashMap<String, u64>, limit: usize) -> Vec<(String, u64)> {
    let mut items: Vec<(String, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    sort_ranking(&mut items);
    items.truncate(limit);
    items
}
