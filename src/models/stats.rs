//! Aggregate statistics projections handed out by the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::Platform;

/// Per-platform tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCounts {
    pub facebook: u64,
    pub whatsapp: u64,
    pub instagram: u64,
}

impl PlatformCounts {
    pub fn increment(&mut self, platform: Platform) {
        *self.slot(platform) += 1;
    }

    pub fn get(&self, platform: Platform) -> u64 {
        match platform {
            Platform::Facebook => self.facebook,
            Platform::WhatsApp => self.whatsapp,
            Platform::Instagram => self.instagram,
        }
    }

    pub fn total(&self) -> u64 {
        self.facebook + self.whatsapp + self.instagram
    }

    /// Share of each platform in percent. Empty when nothing was counted.
    pub fn percentages(&self) -> BTreeMap<Platform, f64> {
        let total = self.total();
        if total == 0 {
            return BTreeMap::new();
        }
        Platform::ALL
            .iter()
            .map(|&p| (p, self.get(p) as f64 / total as f64 * 100.0))
            .collect()
    }

    fn slot(&mut self, platform: Platform) -> &mut u64 {
        match platform {
            Platform::Facebook => &mut self.facebook,
            Platform::WhatsApp => &mut self.whatsapp,
            Platform::Instagram => &mut self.instagram,
        }
    }
}

/// Counts for one `HH:00` bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyStat {
    pub hour: String,
    #[serde(flatten)]
    pub counts: PlatformCounts,
}

/// Derived analytics, recomputed on every accepted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    /// Top hour labels by total volume
    pub peak_hours: Vec<(String, u64)>,
    /// Top countries by all-time count
    pub trending_countries: Vec<(String, u64)>,
    /// Messages per minute over the trailing hour
    pub sms_rate: f64,
}

/// Counts attached to every batch event and subscriber seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Records currently held in the recent-history window
    pub total_records: usize,
    pub platform_counts: PlatformCounts,
    pub connection_status: bool,
    pub last_update: Option<DateTime<Local>>,
}

/// Full statistics projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_records: usize,
    /// All-time accepted count, unaffected by window eviction
    pub total_received: u64,
    pub platform_counts: PlatformCounts,
    pub platform_percentages: BTreeMap<Platform, f64>,
    pub top_countries: Vec<(String, u64)>,
    pub unique_countries: usize,
    pub hourly: Vec<HourlyStat>,
    pub top_ranges: Vec<(String, u64)>,
    pub analytics: Analytics,
    pub connection_status: bool,
    pub last_update: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages_empty_when_no_counts() {
        assert!(PlatformCounts::default().percentages().is_empty());
    }

    #[test]
    fn test_percentages_cover_all_platforms() {
        let mut counts = PlatformCounts::default();
        counts.increment(Platform::Facebook);
        counts.increment(Platform::Facebook);
        counts.increment(Platform::WhatsApp);
        counts.increment(Platform::Instagram);

        let pct = counts.percentages();
        assert_eq!(pct.len(), 3);
        assert_eq!(pct[&Platform::Facebook], 50.0);
        assert_eq!(pct[&Platform::WhatsApp], 25.0);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_hourly_stat_flattens_counts() {
        let stat = HourlyStat {
            hour: "09:00".into(),
            counts: PlatformCounts {
                facebook: 2,
                whatsapp: 1,
                instagram: 0,
            },
        };
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["hour"], "09:00");
        assert_eq!(json["facebook"], 2);
        assert_eq!(json["whatsapp"], 1);
    }
}
