// src/services/fetcher.rs

//! One authenticated retrieval + extraction pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::services::extractor::{Extractor, PageExtraction};
use crate::services::session::{ConnectionObserver, SessionManager};
use crate::utils::http::{RawResponse, Transport};

/// Status codes the portal uses for an expired or missing session.
const UNAUTHENTICATED_STATUS: &[u16] = &[401, 403, 419];

/// Fetches the live page and extracts its records.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    extractor: Extractor,
    live_url: String,
    login_path: String,
    timeout: Duration,
    fetch_count: u64,
    last_success: Option<DateTime<Local>>,
}

impl Fetcher {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Self> {
        let session = SessionManager::new(
            Arc::clone(&transport),
            config.portal.clone(),
            config.http.auth_timeout(),
            observer,
        );

        Ok(Self {
            transport,
            session,
            extractor: Extractor::new(&config.extraction)?,
            live_url: config.portal.live_url(),
            login_path: config.portal.login_path.clone(),
            timeout: config.http.timeout(),
            fetch_count: 0,
            last_success: None,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Successful fetches so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count
    }

    pub fn last_success(&self) -> Option<DateTime<Local>> {
        self.last_success
    }

    /// Authenticate if needed, then fetch and extract the live page.
    ///
    /// Transport and session failures are returned as errors. A page that
    /// arrived but lacks the SMS table comes back with a parse error in
    /// [`PageExtraction::records`] and its range labels intact.
    pub async fn fetch_once(&mut self) -> Result<PageExtraction> {
        if !self.session.is_logged_in() {
            log::warn!("Not logged in, attempting to login...");
            if !self.session.authenticate().await.ok {
                return Err(AppError::authentication("not authenticated"));
            }
        }

        log::info!("Fetch #{}: live SMS page", self.fetch_count + 1);
        let response = self.transport.get(&self.live_url, self.timeout).await?;

        if self.is_unauthenticated(&response) {
            self.session.invalidate("live page answered as unauthenticated");
            return Err(AppError::authentication("session expired"));
        }
        if !response.is_ok() {
            return Err(AppError::Status {
                url: self.live_url.clone(),
                status: response.status,
            });
        }

        let now = Local::now();
        let page = self.extractor.extract(&response.text(), now);

        if page.records.is_ok() {
            self.fetch_count += 1;
            self.last_success = Some(now);
        }
        Ok(page)
    }

    fn is_unauthenticated(&self, response: &RawResponse) -> bool {
        if UNAUTHENTICATED_STATUS.contains(&response.status) {
            return true;
        }
        url::Url::parse(&response.final_url)
            .map(|u| u.path().trim_end_matches('/') == self.login_path.trim_end_matches('/'))
            .unwrap_or(false)
    }
}
