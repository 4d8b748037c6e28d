//! The poll loop.
//!
//! ```text
//!          start()               stop()
//!   Idle ──────────▶ Running ──────────▶ Stopping
//!    ▲                  ▲   start()         │
//!    │                  └───────────────────┤
//!    └───────── loop observes stop ─────────┘
//! ```
//!
//! Cycles never overlap: the loop and [`Monitor::refresh`] share one lock
//! around the fetcher. Nothing else takes that lock; status reads go through
//! a small cache refreshed at the end of every cycle. Stop requests are
//! observed between cycles only, so an in-flight fetch or sleep always runs
//! to completion.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{Analytics, Config, PlatformCounts, Record};
use crate::pipeline::backoff::{RetryPolicy, Schedule};
use crate::pipeline::hub::FanoutHub;
use crate::services::{Fetcher, SessionState};
use crate::storage::IngestionStore;
use crate::utils::http::{HttpTransport, Transport};

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CycleReport {
    pub accepted: usize,
    pub breakdown: PlatformCounts,
    /// Newly accepted records in page order
    pub records: Vec<Record>,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub lifecycle: Lifecycle,
    pub logged_in: bool,
    pub connection_status: bool,
    pub retries: u32,
    pub fetch_count: u64,
    pub last_success: Option<DateTime<Local>>,
    pub total_records: usize,
    pub unique_countries: usize,
    pub analytics: Analytics,
}

/// Fetcher state copied out after each cycle.
#[derive(Debug, Clone, Copy, Default)]
struct FetchState {
    logged_in: bool,
    fetch_count: u64,
    last_success: Option<DateTime<Local>>,
}

struct Inner {
    fetcher: tokio::sync::Mutex<Fetcher>,
    fetch_state: Mutex<FetchState>,
    store: Arc<IngestionStore>,
    hub: FanoutHub,
    policy: RetryPolicy,
    lifecycle: Mutex<Lifecycle>,
    task: Mutex<Option<JoinHandle<()>>>,
    retries: AtomicU32,
}

/// Drives the fetcher on a schedule and feeds the store and hub.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    /// Build a monitor with a real HTTP transport.
    pub fn new(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let store = Arc::new(IngestionStore::new(config.store.clone()));
        let hub = FanoutHub::new(Arc::clone(&store), &config.hub);
        let fetcher = Fetcher::new(config, transport, Arc::new(hub.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                fetcher: tokio::sync::Mutex::new(fetcher),
                fetch_state: Mutex::new(FetchState::default()),
                store,
                hub,
                policy: RetryPolicy::from_config(&config.polling),
                lifecycle: Mutex::new(Lifecycle::Idle),
                task: Mutex::new(None),
                retries: AtomicU32::new(0),
            }),
        })
    }

    pub fn store(&self) -> &Arc<IngestionStore> {
        &self.inner.store
    }

    pub fn hub(&self) -> &FanoutHub {
        &self.inner.hub
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Start the loop. Must be called from within a Tokio runtime.
    ///
    /// Idempotent while running. A pending stop is cancelled and the
    /// existing loop keeps going.
    pub fn start(&self) {
        let mut lifecycle = self.inner.lifecycle();
        match *lifecycle {
            Lifecycle::Running => log::debug!("Monitor already running"),
            Lifecycle::Stopping => {
                log::info!("Stop cancelled, monitor keeps running");
                *lifecycle = Lifecycle::Running;
                self.inner.hub.monitoring_changed(true);
            }
            Lifecycle::Idle => {
                log::info!("Starting monitor");
                *lifecycle = Lifecycle::Running;
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(run_loop(inner));
                *self.inner.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                self.inner.hub.monitoring_changed(true);
            }
        }
    }

    /// Ask the loop to exit after the current cycle or sleep.
    pub fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle();
        if *lifecycle == Lifecycle::Running {
            log::info!("Stop requested");
            *lifecycle = Lifecycle::Stopping;
            self.inner.hub.monitoring_changed(false);
        }
    }

    /// Wait for the loop task to finish, if one was started.
    pub async fn join(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Monitor task failed: {}", e);
            }
        }
    }

    /// Run one cycle now, outside the schedule.
    ///
    /// Waits for an in-flight loop cycle first. A failure is returned to the
    /// caller and leaves the loop's retry counter alone.
    pub async fn refresh(&self) -> Result<CycleReport> {
        self.inner.run_cycle().await
    }

    /// Drop all stored records and counters, and tell subscribers.
    pub fn clear(&self) {
        self.inner.store.clear();
        self.inner.hub.cleared();
        log::info!("Store cleared");
    }

    /// Never waits on an in-flight cycle.
    pub fn status(&self) -> MonitorStatus {
        let fetch = *self
            .inner
            .fetch_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stats = self.inner.store.statistics();
        MonitorStatus {
            lifecycle: self.lifecycle(),
            logged_in: fetch.logged_in,
            connection_status: stats.connection_status,
            retries: self.inner.retries.load(Ordering::Relaxed),
            fetch_count: fetch.fetch_count,
            last_success: fetch.last_success,
            total_records: stats.total_records,
            unique_countries: stats.unique_countries,
            analytics: stats.analytics,
        }
    }
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether to run another cycle. Completes a pending stop.
    fn keep_running(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Running => true,
            Lifecycle::Stopping => {
                *lifecycle = Lifecycle::Idle;
                log::info!("Monitor stopped");
                false
            }
            Lifecycle::Idle => false,
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut fetcher = self.fetcher.lock().await;
        let fetched = fetcher.fetch_once().await;
        *self.fetch_state.lock().unwrap_or_else(PoisonError::into_inner) = FetchState {
            logged_in: fetcher.session().state() == SessionState::LoggedIn,
            fetch_count: fetcher.fetch_count(),
            last_success: fetcher.last_success(),
        };

        let page = fetched?;
        self.store.record_ranges(&page.ranges);

        let mut report = CycleReport::default();
        for record in page.records? {
            let platform = record.platform;
            if self.store.add(record.clone()) {
                log::debug!(
                    "[{}] {} {} from {}",
                    record.time_label(),
                    platform,
                    record.country,
                    record.sid
                );
                report.accepted += 1;
                report.breakdown.increment(platform);
                self.hub.record_accepted(record.clone());
                report.records.push(record);
            }
        }

        if report.accepted > 0 {
            log::info!("Added {} new SMS records", report.accepted);
        }
        self.hub.batch_complete(report.accepted, report.breakdown);
        Ok(report)
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut schedule = Schedule::Steady;

    while inner.keep_running() {
        schedule = match inner.run_cycle().await {
            Ok(_) => schedule.on_success(),
            Err(e) => {
                let next = schedule.on_failure();
                log::error!(
                    "Poll cycle failed ({:?}): {}. Retry {} in {:?}",
                    e.kind(),
                    e,
                    next.retries(),
                    next.delay(&inner.policy)
                );
                next
            }
        };
        inner.retries.store(schedule.retries(), Ordering::Relaxed);

        tokio::time::sleep(schedule.delay(&inner.policy)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::AppError;
    use crate::models::{FeedEvent, Platform, PollingConfig};
    use crate::utils::http::testing::ScriptedTransport;

    const PORTAL: &str = "https://www.ivasms.com/portal";
    const LIVE: &str = "https://www.ivasms.com/portal/live/test_sms";

    const LOGGED_IN: &str = r#"<a href="/logout">Logout</a>"#;
    const LIVE_PAGE: &str = r#"<table id="LiveTestSMS">
          <tr><td>NG</td><td>s-1</td><td>WhatsApp code 1</td></tr>
          <tr><td>KE</td><td>s-2</td><td>Facebook code 2</td></tr>
          <tr><td>GH</td><td>s-3</td><td>Instagram code 3</td></tr>
        </table>"#;

    fn monitor(transport: Arc<ScriptedTransport>, polling: PollingConfig) -> Monitor {
        let config = Config {
            polling,
            ..Config::default()
        };
        Monitor::with_transport(&config, transport).unwrap()
    }

    fn logged_in_transport() -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(PORTAL, 200, LOGGED_IN)
            .respond(LIVE, 200, LIVE_PAGE);
        transport
    }

    fn fast_polling() -> PollingConfig {
        PollingConfig {
            interval_secs: 0,
            retry_base_secs: 0,
            retry_cap_secs: 0,
        }
    }

    async fn wait_for(monitor: &Monitor, lifecycle: Lifecycle) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while monitor.lifecycle() != lifecycle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_emits_records_then_batch() {
        let monitor = monitor(logged_in_transport(), PollingConfig::default());
        let mut sub = monitor.hub().subscribe();

        let report = monitor.refresh().await.unwrap();
        assert_eq!(report.accepted, 3);
        let reported: Vec<&str> = report.records.iter().map(|r| r.sid.as_str()).collect();
        assert_eq!(reported, vec!["s-1", "s-2", "s-3"]);

        assert_eq!(
            sub.try_next(),
            Some(FeedEvent::ConnectionStatusChanged { connected: true })
        );
        let mut sids = Vec::new();
        for _ in 0..3 {
            match sub.try_next() {
                Some(FeedEvent::RecordAccepted { record }) => sids.push(record.sid),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(sids, vec!["s-1", "s-2", "s-3"]);

        match sub.try_next() {
            Some(FeedEvent::BatchComplete {
                count, breakdown, ..
            }) => {
                assert_eq!(count, 3);
                assert_eq!(breakdown.get(Platform::WhatsApp), 1);
                assert_eq!(breakdown.get(Platform::Instagram), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_repeat_cycle_accepts_nothing() {
        let monitor = monitor(logged_in_transport(), PollingConfig::default());
        monitor.refresh().await.unwrap();
        let mut sub = monitor.hub().subscribe();

        let report = monitor.refresh().await.unwrap();

        assert_eq!(report.accepted, 0);
        assert!(report.records.is_empty());
        assert!(matches!(
            sub.try_next(),
            Some(FeedEvent::BatchComplete { count: 0, .. })
        ));
        assert_eq!(monitor.store().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_publishes_no_batch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(PORTAL, 200, LOGGED_IN)
            .respond(LIVE, 502, "bad gateway");
        let monitor = monitor(transport, PollingConfig::default());
        let mut sub = monitor.hub().subscribe();

        assert!(monitor.refresh().await.is_err());

        while let Some(event) = sub.try_next() {
            assert!(!matches!(event, FeedEvent::BatchComplete { .. }));
        }
        assert!(monitor.store().is_empty());
        assert_eq!(monitor.status().retries, 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_cancellable() {
        let monitor = monitor(logged_in_transport(), PollingConfig::default());
        assert_eq!(monitor.lifecycle(), Lifecycle::Idle);

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        monitor.stop();
        assert_eq!(monitor.lifecycle(), Lifecycle::Stopping);
        monitor.start();
        assert_eq!(monitor.lifecycle(), Lifecycle::Running);

        monitor.stop();
    }

    #[tokio::test]
    async fn test_loop_ingests_and_stops() {
        let transport = logged_in_transport();
        let monitor = monitor(transport.clone(), fast_polling());
        let mut sub = monitor.hub().subscribe();

        monitor.start();
        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(FeedEvent::BatchComplete { count, .. }) = sub.next().await {
                    return count;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, 3);

        monitor.stop();
        wait_for(&monitor, Lifecycle::Idle).await;
        monitor.join().await;

        let status = monitor.status();
        assert!(status.logged_in);
        assert!(status.fetch_count >= 1);
        assert_eq!(status.total_records, 3);
        assert_eq!(status.unique_countries, 3);
    }

    #[tokio::test]
    async fn test_loop_survives_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(PORTAL, "connection refused");
        let monitor = monitor(transport.clone(), fast_polling());

        monitor.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.call_count(PORTAL) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(monitor.is_running());
        assert!(monitor.status().retries >= 2);
        assert!(!monitor.store().connection_status());

        monitor.stop();
        wait_for(&monitor, Lifecycle::Idle).await;
    }

    #[tokio::test]
    async fn test_status_does_not_wait_for_inflight_cycle() {
        let transport = logged_in_transport();
        transport.latency(Duration::from_millis(200));
        let monitor = monitor(transport.clone(), PollingConfig::default());

        let background = monitor.clone();
        let cycle = tokio::spawn(async move { background.refresh().await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let started = std::time::Instant::now();
        let status = monitor.status();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!cycle.is_finished());
        assert_eq!(status.fetch_count, 0);
        assert!(!status.logged_in);

        cycle.await.unwrap().unwrap();
        let status = monitor.status();
        assert_eq!(status.fetch_count, 1);
        assert!(status.logged_in);
        assert!(status.last_success.is_some());
    }

    #[tokio::test]
    async fn test_stop_lets_inflight_cycle_finish() {
        let transport = logged_in_transport();
        transport.latency(Duration::from_millis(100));
        let monitor = monitor(transport.clone(), fast_polling());
        let mut sub = monitor.hub().subscribe();

        monitor.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.call_count(PORTAL) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        monitor.stop();
        assert_eq!(monitor.lifecycle(), Lifecycle::Stopping);
        wait_for(&monitor, Lifecycle::Idle).await;

        assert_eq!(transport.call_count(LIVE), 1);
        assert_eq!(monitor.store().len(), 3);
        let mut batches = 0;
        while let Some(event) = sub.try_next() {
            if matches!(event, FeedEvent::BatchComplete { count: 3, .. }) {
                batches += 1;
            }
        }
        assert_eq!(batches, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_and_clear_events() {
        let monitor = monitor(logged_in_transport(), PollingConfig::default());
        let mut sub = monitor.hub().subscribe();

        monitor.start();
        monitor.start();
        monitor.stop();
        monitor.start();
        monitor.stop();
        monitor.clear();

        let events: Vec<FeedEvent> = std::iter::from_fn(|| sub.try_next()).collect();
        assert_eq!(
            events,
            vec![
                FeedEvent::MonitoringChanged { active: true },
                FeedEvent::MonitoringChanged { active: false },
                FeedEvent::MonitoringChanged { active: true },
                FeedEvent::MonitoringChanged { active: false },
                FeedEvent::Cleared,
            ]
        );
    }

    #[tokio::test]
    async fn test_ranges_tallied_when_table_missing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(PORTAL, 200, LOGGED_IN).respond(
            LIVE,
            200,
            r#"<div class="card-body"><span>+2547 range</span></div>"#,
        );
        let monitor = monitor(transport, PollingConfig::default());

        let err = monitor.refresh().await.unwrap_err();

        assert!(matches!(err, AppError::Parse(_)));
        assert_eq!(monitor.store().top_ranges(5), vec![("+2547 range".to_string(), 1)]);
        assert_eq!(monitor.status().fetch_count, 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_connection() {
        let monitor = monitor(logged_in_transport(), PollingConfig::default());
        monitor.refresh().await.unwrap();

        monitor.clear();

        assert!(monitor.store().is_empty());
        assert!(monitor.store().connection_status());
        assert_eq!(monitor.refresh().await.unwrap().accepted, 3);
    }
}
