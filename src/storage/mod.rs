//! Record storage.
//!
//! Everything lives in process memory and is lost on restart:
//!
//! ```text
//! recent   ── newest-first window of accepted records (bounded)
//! seen     ── sids used for deduplication
//! counts   ── per-platform, per-country, per-range and per-hour tallies
//! history  ── audit trail of acceptances (bounded)
//! ```

pub mod memory;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::{Platform, Record};

// Re-export for convenience
pub use memory::IngestionStore;

/// What happened in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    NewRecord,
}

/// One line of the acceptance audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub time: DateTime<Local>,
    pub action: AuditAction,
    pub record: Record,
}

/// Optional narrowing for [`IngestionStore::snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub platform: Option<Platform>,
    /// Matched against the country name
    pub country: Option<String>,
}

impl RecordFilter {
    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            country: None,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.platform.is_none_or(|p| p == record.platform)
            && self
                .country
                .as_deref()
                .is_none_or(|c| c.eq_ignore_ascii_case(&record.country))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::tests::record;

    #[test]
    fn test_filter_matches() {
        let r = record("s1", Platform::WhatsApp, "Nigeria");

        assert!(RecordFilter::default().matches(&r));
        assert!(RecordFilter::platform(Platform::WhatsApp).matches(&r));
        assert!(!RecordFilter::platform(Platform::Facebook).matches(&r));

        let by_country = RecordFilter {
            platform: None,
            country: Some("nigeria".into()),
        };
        assert!(by_country.matches(&r));
    }
}
