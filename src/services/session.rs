// src/services/session.rs

//! Portal session tracking.
//!
//! Credentials are whatever cookies the transport carries; this module only
//! decides whether the portal currently treats them as a logged-in session.
//!
//! ```text
//! LoggedOut ──authenticate──▶ Authenticating ──marker seen──▶ LoggedIn
//!     ▲                              │                            │
//!     └────────── no marker / error ─┘        unauthenticated ────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::PortalConfig;
use crate::utils::http::Transport;

/// Session lifecycle against the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    LoggedIn,
}

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub ok: bool,
    /// CSRF token captured from the portal or login form
    pub token: Option<String>,
}

/// Receives the connection flag on every session transition.
pub trait ConnectionObserver: Send + Sync {
    fn connection_status(&self, connected: bool);
}

/// Tracks whether the transport's credentials are accepted by the portal.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    portal: PortalConfig,
    timeout: Duration,
    observer: Arc<dyn ConnectionObserver>,
    state: SessionState,
    csrf_token: Option<String>,
    session_id: Option<String>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        portal: PortalConfig,
        timeout: Duration,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            transport,
            portal,
            timeout,
            observer,
            state: SessionState::LoggedOut,
            csrf_token: None,
            session_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Probe the portal and move to `LoggedIn` only if a session marker shows up.
    ///
    /// Transport failures are logged and reported as a failed attempt.
    pub async fn authenticate(&mut self) -> AuthResult {
        self.transition(SessionState::Authenticating);

        match self.try_authenticate().await {
            Ok(token) => {
                self.csrf_token = token.clone();
                self.transition(SessionState::LoggedIn);
                log::info!("Portal session established");
                AuthResult { ok: true, token }
            }
            Err(e) => {
                log::error!("Login error: {}", e);
                self.transition(SessionState::LoggedOut);
                AuthResult {
                    ok: false,
                    token: None,
                }
            }
        }
    }

    /// Drop to `LoggedOut` after the portal answered as if unauthenticated.
    pub fn invalidate(&mut self, reason: &str) {
        if self.state != SessionState::LoggedOut {
            log::warn!("Portal session lost: {}", reason);
        }
        self.csrf_token = None;
        self.session_id = None;
        self.transition(SessionState::LoggedOut);
    }

    async fn try_authenticate(&mut self) -> Result<Option<String>> {
        let portal_url = self.portal.portal_url();
        log::info!("Attempting to login with cookies...");

        let response = self.transport.get(&portal_url, self.timeout).await?;
        if response.is_ok() {
            let body = response.text();
            if self.has_marker(&body) {
                log::info!("Already logged in with cookies");
                self.session_id = find_input_value(&body, &self.portal.session_field);
                return Ok(find_input_value(&body, &self.portal.token_field));
            }
        }

        log::info!("Session marker absent, trying login page...");
        let login_url = self.portal.login_url();
        let response = self.transport.get(&login_url, self.timeout).await?;
        if !response.is_ok() {
            return Err(AppError::Status {
                url: login_url,
                status: response.status,
            });
        }
        let token = find_input_value(&response.text(), &self.portal.token_field)
            .ok_or_else(|| AppError::authentication("login form has no token field"))?;

        let response = self.transport.get(&portal_url, self.timeout).await?;
        if response.is_ok() && self.has_marker(&response.text()) {
            Ok(Some(token))
        } else {
            Err(AppError::authentication(
                "portal did not show a logged-in session",
            ))
        }
    }

    fn has_marker(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.portal
            .session_markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .any(|m| body.contains(&m.to_lowercase()))
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::debug!("Session {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        self.observer
            .connection_status(next == SessionState::LoggedIn);
    }
}

/// Value of the first `<input name="{field}">` in a page.
fn find_input_value(html: &str, field: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"input[name="{field}"]"#)).ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::utils::http::testing::ScriptedTransport;

    /// Records every flag pushed by the session.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub seen: Mutex<Vec<bool>>,
    }

    impl ConnectionObserver for RecordingObserver {
        fn connection_status(&self, connected: bool) {
            self.seen.lock().unwrap().push(connected);
        }
    }

    const PORTAL: &str = "https://www.ivasms.com/portal";
    const LOGIN: &str = "https://www.ivasms.com/login";

    const LOGGED_IN: &str = r#"<html><body>
        <form><input type="hidden" name="_token" value="csrf-1">
        <input type="hidden" name="_session" value="sess-9"></form>
        <a href="/logout">Logout</a></body></html>"#;
    const LOGIN_FORM: &str = r#"<form><input name="_token" value="csrf-login">
        <input name="password" type="password"></form>"#;
    const GUEST: &str = "<html><body><a href=\"/login\">Sign in</a></body></html>";

    fn manager(
        transport: Arc<ScriptedTransport>,
    ) -> (SessionManager, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let session = SessionManager::new(
            transport,
            PortalConfig::default(),
            Duration::from_secs(10),
            observer.clone(),
        );
        (session, observer)
    }

    #[tokio::test]
    async fn test_marker_on_portal_logs_in() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(PORTAL, 200, LOGGED_IN);
        let (mut session, observer) = manager(transport.clone());

        let result = session.authenticate().await;

        assert!(result.ok);
        assert_eq!(result.token.as_deref(), Some("csrf-1"));
        assert_eq!(session.state(), SessionState::LoggedIn);
        assert_eq!(session.session_id(), Some("sess-9"));
        assert_eq!(observer.seen.lock().unwrap().last(), Some(&true));
        assert_eq!(transport.call_count(LOGIN), 0);
    }

    #[tokio::test]
    async fn test_login_page_then_marker() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(PORTAL, 200, GUEST)
            .respond(PORTAL, 200, LOGGED_IN)
            .respond(LOGIN, 200, LOGIN_FORM);
        let (mut session, _) = manager(transport.clone());

        let result = session.authenticate().await;

        assert!(result.ok);
        assert_eq!(result.token.as_deref(), Some("csrf-login"));
        assert_eq!(transport.calls(), vec![PORTAL, LOGIN, PORTAL]);
    }

    #[tokio::test]
    async fn test_no_marker_stays_logged_out() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(PORTAL, 200, GUEST)
            .respond(LOGIN, 200, LOGIN_FORM);
        let (mut session, observer) = manager(transport);

        let result = session.authenticate().await;

        assert!(!result.ok);
        assert!(result.token.is_none());
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(observer.seen.lock().unwrap().iter().all(|c| !c));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(PORTAL, "connection reset");
        let (mut session, _) = manager(transport);

        let result = session.authenticate().await;

        assert!(!result.ok);
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_page_error_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(PORTAL, 403, "")
            .respond(LOGIN, 503, "");
        let (mut session, _) = manager(transport);

        assert!(!session.authenticate().await.ok);
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_invalidate_reports_disconnect() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(PORTAL, 200, LOGGED_IN);
        let (mut session, observer) = manager(transport);
        session.authenticate().await;

        session.invalidate("redirected to login");

        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(session.csrf_token().is_none());
        assert_eq!(observer.seen.lock().unwrap().last(), Some(&false));
    }

    #[test]
    fn test_find_input_value() {
        assert_eq!(
            find_input_value(LOGIN_FORM, "_token"),
            Some("csrf-login".to_string())
        );
        assert_eq!(find_input_value(GUEST, "_token"), None);
    }
}
