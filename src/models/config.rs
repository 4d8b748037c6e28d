//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote portal endpoints and credentials
    #[serde(default)]
    pub portal: PortalConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Live table extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Poll loop schedule
    #[serde(default)]
    pub polling: PollingConfig,

    /// Ingestion store bounds
    #[serde(default)]
    pub store: StoreConfig,

    /// Subscriber fan-out settings
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.portal.base_url.trim().is_empty() {
            return Err(AppError::validation("portal.base_url is empty"));
        }
        url::Url::parse(&self.portal.base_url)
            .map_err(|e| AppError::validation(format!("portal.base_url: {e}")))?;
        if self.portal.session_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(AppError::validation("portal.session_markers is empty"));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 || self.http.auth_timeout_secs == 0 {
            return Err(AppError::validation("http timeouts must be > 0"));
        }
        if self.extraction.table_id.trim().is_empty() {
            return Err(AppError::validation("extraction.table_id is empty"));
        }
        let code = &self.extraction.default_country_code;
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(AppError::validation(
                "extraction.default_country_code must be two uppercase letters",
            ));
        }
        if self.polling.interval_secs == 0 || self.polling.retry_base_secs == 0 {
            return Err(AppError::validation("polling intervals must be > 0"));
        }
        if self.polling.retry_cap_secs < self.polling.retry_base_secs {
            return Err(AppError::validation(
                "polling.retry_cap_secs must be >= polling.retry_base_secs",
            ));
        }
        if self.store.recent_capacity == 0 || self.store.history_capacity == 0 {
            return Err(AppError::validation("store capacities must be > 0"));
        }
        if self.hub.channel_capacity == 0 {
            return Err(AppError::validation("hub.channel_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Remote portal endpoints and session detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Page that shows the session marker when logged in
    #[serde(default = "defaults::portal_path")]
    pub portal_path: String,

    #[serde(default = "defaults::login_path")]
    pub login_path: String,

    /// Page holding the live SMS table
    #[serde(default = "defaults::live_path")]
    pub live_path: String,

    /// Substrings (case-insensitive) that only appear for a logged-in session
    #[serde(default = "defaults::session_markers")]
    pub session_markers: Vec<String>,

    /// Hidden form field carrying the CSRF token
    #[serde(default = "defaults::token_field")]
    pub token_field: String,

    #[serde(default = "defaults::session_field")]
    pub session_field: String,

    #[serde(default = "defaults::cookie_domain")]
    pub cookie_domain: String,

    /// Session cookies, passed through untouched
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl PortalConfig {
    pub fn portal_url(&self) -> String {
        self.join(&self.portal_path)
    }

    pub fn login_url(&self) -> String {
        self.join(&self.login_path)
    }

    pub fn live_url(&self) -> String {
        self.join(&self.live_path)
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            portal_path: defaults::portal_path(),
            login_path: defaults::login_path(),
            live_path: defaults::live_path(),
            session_markers: defaults::session_markers(),
            token_field: defaults::token_field(),
            session_field: defaults::session_field(),
            cookie_domain: defaults::cookie_domain(),
            cookies: BTreeMap::new(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Timeout for the live-data request in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Timeout for session probes in seconds
    #[serde(default = "defaults::auth_timeout")]
    pub auth_timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            auth_timeout_secs: defaults::auth_timeout(),
        }
    }
}

/// Where to find records in the live page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// `id` attribute of the SMS table
    #[serde(default = "defaults::table_id")]
    pub table_id: String,

    /// Section scanned for number-range labels
    #[serde(default = "defaults::range_selector")]
    pub range_selector: String,

    /// Used when no country code is found in the label cell
    #[serde(default = "defaults::default_country_code")]
    pub default_country_code: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            table_id: defaults::table_id(),
            range_selector: defaults::range_selector(),
            default_country_code: defaults::default_country_code(),
        }
    }
}

/// Poll loop schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Steady-state delay between successful cycles
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// First backoff delay after a failure
    #[serde(default = "defaults::retry_base")]
    pub retry_base_secs: u64,

    /// Backoff ceiling
    #[serde(default = "defaults::retry_cap")]
    pub retry_cap_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            retry_base_secs: defaults::retry_base(),
            retry_cap_secs: defaults::retry_cap(),
        }
    }
}

/// What happens to dedup keys when their record leaves the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keys are remembered until `clear()`, even after eviction
    #[default]
    Lifetime,
    /// Keys are forgotten together with their evicted record
    Windowed,
}

/// Ingestion store bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Recent-history window size
    #[serde(default = "defaults::recent_capacity")]
    pub recent_capacity: usize,

    /// Audit history size
    #[serde(default = "defaults::history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,

    #[serde(default = "defaults::trending_countries")]
    pub trending_countries: usize,

    #[serde(default = "defaults::peak_hours")]
    pub peak_hours: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            recent_capacity: defaults::recent_capacity(),
            history_capacity: defaults::history_capacity(),
            dedup_policy: DedupPolicy::default(),
            trending_countries: defaults::trending_countries(),
            peak_hours: defaults::peak_hours(),
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Events buffered per subscriber before it starts missing them
    #[serde(default = "defaults::channel_capacity")]
    pub channel_capacity: usize,

    /// Records included in a new subscriber's seed snapshot
    #[serde(default = "defaults::seed_size")]
    pub seed_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::channel_capacity(),
            seed_size: defaults::seed_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Portal defaults
    pub fn base_url() -> String {
        "https://www.ivasms.com".into()
    }
    pub fn portal_path() -> String {
        "/portal".into()
    }
    pub fn login_path() -> String {
        "/login".into()
    }
    pub fn live_path() -> String {
        "/portal/live/test_sms".into()
    }
    pub fn session_markers() -> Vec<String> {
        vec!["logout".into()]
    }
    pub fn token_field() -> String {
        "_token".into()
    }
    pub fn session_field() -> String {
        "_session".into()
    }
    pub fn cookie_domain() -> String {
        ".ivasms.com".into()
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
    }
    pub fn timeout() -> u64 {
        15
    }
    pub fn auth_timeout() -> u64 {
        10
    }

    // Extraction defaults
    pub fn table_id() -> String {
        "LiveTestSMS".into()
    }
    pub fn range_selector() -> String {
        "div.card-body".into()
    }
    pub fn default_country_code() -> String {
        "US".into()
    }

    // Polling defaults
    pub fn interval() -> u64 {
        30
    }
    pub fn retry_base() -> u64 {
        5
    }
    pub fn retry_cap() -> u64 {
        300
    }

    // Store defaults
    pub fn recent_capacity() -> usize {
        2000
    }
    pub fn history_capacity() -> usize {
        200
    }
    pub fn trending_countries() -> usize {
        5
    }
    pub fn peak_hours() -> usize {
        3
    }

    // Hub defaults
    pub fn channel_capacity() -> usize {
        256
    }
    pub fn seed_size() -> usize {
        50
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_cap_below_base() {
        let mut config = Config::default();
        config.polling.retry_base_secs = 10;
        config.polling.retry_cap_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_country_default() {
        let mut config = Config::default();
        config.extraction.default_country_code = "usa".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.store.recent_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[portal]
base_url = "https://portal.example.com/"

[portal.cookies]
session = "abc"

[store]
dedup_policy = "windowed"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(
            config.portal.live_url(),
            "https://portal.example.com/portal/live/test_sms"
        );
        assert_eq!(config.portal.cookies["session"], "abc");
        assert_eq!(config.store.dedup_policy, DedupPolicy::Windowed);
        assert_eq!(config.store.recent_capacity, 2000);
        assert_eq!(config.polling.interval_secs, 30);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = Config::load_or_default("/nonexistent/smsfeed.toml");
        assert_eq!(config.extraction.table_id, "LiveTestSMS");
    }
}
