//! Remote browser client.
//!
//! Page operations propagate errors, with two exceptions:
//! [`BrowserClient::is_visible`] never fails, and `back`/`forward` fall back
//! through weaker completion checks when a wait times out.

mod cdp;
mod driver;
mod history;
mod mock;
mod types;

pub use cdp::{CdpConnector, CdpDriver};
pub use driver::{AutomationDriver, DriverConnector};
pub use history::{traverse, HistoryStrategy, HISTORY_STRATEGIES};
pub use mock::{DriverCall, MockConnector, MockDriver, MockElement, MOCK_SCREENSHOT};
pub use types::{
    Cookie, HistoryDirection, ImageFormat, NavigateParams, Screenshot, ScreenshotEncoding,
    ScreenshotParams, SelectorState, WaitForSelectorParams, WaitUntil,
};

use base64::Engine;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BrowserConfig, Config};
use crate::error::{Result, SandboxError};
use crate::session::{ResolvedStart, Session, SessionManager, StartSessionParams};
use crate::transport::{
    BrowserSessionDetails, BrowserSessionSummary, HttpTransport, SandboxKind, SandboxTransport,
    SessionInfo, SessionStatus, SignedEndpoint, StartSessionRequest, StreamStatus,
};

/// Default lifetime of a live-view URL.
pub const DEFAULT_LIVE_VIEW_EXPIRES_SECS: u64 = 300;

/// Client for a remote browser sandbox.
///
/// Holds at most one session and at most one automation connection; the
/// connection is opened on the first page operation and closed by
/// [`stop_session`](Self::stop_session).
pub struct BrowserClient {
    config: BrowserConfig,
    transport: Arc<dyn SandboxTransport>,
    connector: Arc<dyn DriverConnector>,
    sessions: SessionManager,
    driver: Mutex<Option<Arc<dyn AutomationDriver>>>,
}

impl std::fmt::Debug for BrowserClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserClient")
            .field("identifier", &self.config.identifier)
            .finish_non_exhaustive()
    }
}

impl BrowserClient {
    /// Builds a client talking to the real service over CDP.
    pub fn new(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            Arc::new(CdpConnector),
        ))
    }

    /// Builds a client from an explicit transport and driver connector.
    pub fn with_parts(
        config: &Config,
        transport: Arc<dyn SandboxTransport>,
        connector: Arc<dyn DriverConnector>,
    ) -> Self {
        let config = config.browser.clone();
        let sessions = SessionManager::new(config.session_timeout_secs);
        Self {
            config,
            transport,
            connector,
            sessions,
            driver: Mutex::new(None),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.config.navigation_timeout_ms)
    }

    // --- session lifecycle ---

    /// Starts a session; fails if one is already active.
    pub async fn start_session(&self, params: StartSessionParams) -> Result<Session> {
        self.sessions
            .start(params, |start| self.create_session(start))
            .await
    }

    /// Closes the automation connection and stops the active session.
    ///
    /// A connection that fails to close is logged and dropped; only the
    /// remote stop call can fail this operation.
    pub async fn stop_session(&self) -> Result<Option<Session>> {
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            if let Err(err) = driver.close().await {
                warn!(error = %err, "Failed to close automation connection");
            }
        }
        self.sessions
            .stop(|session| async move {
                self.transport
                    .stop_session(
                        SandboxKind::Browser,
                        &self.config.identifier,
                        &session.session_id,
                    )
                    .await
            })
            .await
    }

    /// The active session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.sessions.current().await
    }

    async fn create_session(&self, start: ResolvedStart) -> Result<SessionInfo> {
        let request = StartSessionRequest {
            kind: SandboxKind::Browser,
            identifier: self.config.identifier.clone(),
            name: start.name,
            timeout_seconds: start.timeout_seconds,
            viewport: self.config.viewport,
        };
        self.transport.start_session(&request).await
    }

    /// Explicit id, else the active session's id.
    async fn resolve_session_id(&self, session_id: Option<&str>) -> Result<String> {
        if let Some(id) = session_id {
            return Ok(id.to_string());
        }
        self.sessions
            .current()
            .await
            .map(|s| s.session_id)
            .ok_or(SandboxError::MissingSession)
    }

    // --- session metadata ---

    /// Fetches a session by id, defaulting to the active one.
    pub async fn get_session(&self, session_id: Option<&str>) -> Result<BrowserSessionDetails> {
        let id = self.resolve_session_id(session_id).await?;
        self.transport
            .get_browser_session(&self.config.identifier, &id)
            .await
    }

    /// Lists sessions of this browser, optionally filtered by status.
    pub async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<BrowserSessionSummary>> {
        self.transport
            .list_browser_sessions(&self.config.identifier, status)
            .await
    }

    /// Enables or disables the automation stream of a session.
    pub async fn update_stream(&self, status: StreamStatus, session_id: Option<&str>) -> Result<()> {
        let id = self.resolve_session_id(session_id).await?;
        info!(session_id = %id, status = status.as_str(), "Updating automation stream");
        self.transport
            .update_browser_stream(&self.config.identifier, &id, status)
            .await
    }

    /// Presigned URL for watching a session live.
    pub async fn live_view_url(&self, expires_secs: Option<u64>, session_id: Option<&str>) -> Result<Url> {
        let id = self.resolve_session_id(session_id).await?;
        self.transport.live_view_url(
            &self.config.identifier,
            &id,
            expires_secs.unwrap_or(DEFAULT_LIVE_VIEW_EXPIRES_SECS),
        )
    }

    /// Signed automation endpoint for a session, for callers bringing their
    /// own automation library.
    pub async fn automation_endpoint(&self, session_id: Option<&str>) -> Result<SignedEndpoint> {
        let id = self.resolve_session_id(session_id).await?;
        self.transport
            .automation_endpoint(&self.config.identifier, &id)
    }

    // --- page operations ---

    /// The automation connection, opening the session and the connection
    /// on first use.
    async fn page(&self) -> Result<Arc<dyn AutomationDriver>> {
        let mut slot = self.driver.lock().await;
        if let Some(driver) = slot.as_ref() {
            return Ok(Arc::clone(driver));
        }
        let session = self
            .sessions
            .ensure(|start| self.create_session(start))
            .await?;
        let endpoint = self
            .transport
            .automation_endpoint(&self.config.identifier, &session.session_id)?;
        debug!(session_id = %session.session_id, "Opening automation connection");
        let driver = self.connector.connect(&endpoint, self.config.viewport).await?;
        *slot = Some(Arc::clone(&driver));
        Ok(driver)
    }

    /// Loads a URL.
    pub async fn navigate(&self, params: NavigateParams) -> Result<()> {
        let wait_until = params.wait_until.unwrap_or_default();
        let timeout = params.timeout.unwrap_or_else(|| self.navigation_timeout());
        debug!(url = %params.url, %wait_until, "Navigating");
        self.page()
            .await?
            .navigate(&params.url, wait_until, timeout)
            .await
    }

    /// Clicks an element.
    pub async fn click(&self, selector: &str) -> Result<()> {
        self.page().await?.click(selector).await
    }

    /// Types text into an element, after its current value.
    pub async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.page().await?.type_text(selector, text).await
    }

    /// Replaces the value of an input.
    pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.page().await?.fill(selector, value).await
    }

    /// Text content of an element; fails when nothing matches.
    pub async fn get_text(&self, selector: &str) -> Result<String> {
        self.page()
            .await?
            .text_content(selector)
            .await?
            .ok_or_else(|| SandboxError::element_not_found(selector))
    }

    /// Inner HTML of an element, or the whole document when `selector` is
    /// `None`.
    pub async fn get_html(&self, selector: Option<&str>) -> Result<String> {
        let page = self.page().await?;
        match selector {
            Some(selector) => page
                .inner_html(selector)
                .await?
                .ok_or_else(|| SandboxError::element_not_found(selector)),
            None => page.content().await,
        }
    }

    /// Captures the page.
    pub async fn screenshot(&self, params: ScreenshotParams) -> Result<Screenshot> {
        let bytes = self
            .page()
            .await?
            .screenshot(
                params.full_page.unwrap_or(false),
                params.format.unwrap_or_default(),
                params.quality,
            )
            .await?;
        Ok(match params.encoding.unwrap_or_default() {
            ScreenshotEncoding::Binary => Screenshot::Binary(bytes),
            ScreenshotEncoding::Base64 => {
                Screenshot::Base64(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        })
    }

    /// Evaluates a script in the page.
    pub async fn evaluate(&self, script: &str) -> Result<Value> {
        self.page().await?.evaluate(script).await
    }

    /// Cookies visible to the page.
    pub async fn get_cookies(&self) -> Result<Vec<Cookie>> {
        self.page().await?.cookies().await
    }

    /// Adds or replaces cookies.
    pub async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.page().await?.set_cookies(cookies).await
    }

    /// Presses a key on the focused element.
    pub async fn press_key(&self, key: &str) -> Result<()> {
        self.page().await?.press_key(key).await
    }

    /// Waits for an element to reach a state.
    pub async fn wait_for_selector(&self, params: WaitForSelectorParams) -> Result<()> {
        let state = params.state.unwrap_or_default();
        let timeout = params.timeout.unwrap_or_else(|| self.navigation_timeout());
        self.page()
            .await?
            .wait_for_selector(&params.selector, state, timeout)
            .await
    }

    /// Whether an element is visible. Any failure, including one to open
    /// the session, reads as `false`.
    pub async fn is_visible(&self, selector: &str) -> bool {
        let visible = match self.page().await {
            Ok(page) => page.is_visible(selector).await,
            Err(err) => Err(err),
        };
        visible.unwrap_or_else(|err| {
            debug!(selector, error = %err, "Visibility check failed");
            false
        })
    }

    /// Goes back one history entry.
    pub async fn back(&self) -> Result<()> {
        let page = self.page().await?;
        traverse(page.as_ref(), HistoryDirection::Back, &HISTORY_STRATEGIES).await
    }

    /// Goes forward one history entry.
    pub async fn forward(&self) -> Result<()> {
        let page = self.page().await?;
        traverse(page.as_ref(), HistoryDirection::Forward, &HISTORY_STRATEGIES).await
    }

    /// Reloads the page and waits for the load event.
    pub async fn refresh(&self) -> Result<()> {
        let timeout = self.navigation_timeout();
        self.page()
            .await?
            .reload(WaitUntil::Load, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, RecordedCall};

    fn client(mock: &MockTransport, connector: &MockConnector) -> BrowserClient {
        BrowserClient::with_parts(
            &Config::for_region("us-west-2"),
            Arc::new(mock.clone()),
            Arc::new(connector.clone()),
        )
    }

    fn page_client() -> (MockTransport, MockConnector, BrowserClient) {
        let mock = MockTransport::new();
        let driver = MockDriver::new()
            .with_element("#title", MockElement::visible("Hello"))
            .with_element("#secret", MockElement::hidden("shh"));
        let connector = MockConnector::new(driver);
        let client = client(&mock, &connector);
        (mock, connector, client)
    }

    #[tokio::test]
    async fn test_connects_once_per_session() {
        let (mock, connector, client) = page_client();
        client.click("#title").await.unwrap();
        client.get_text("#title").await.unwrap();
        client.press_key("Enter").await.unwrap();

        assert_eq!(mock.start_count(), 1);
        assert_eq!(connector.connect_count(), 1);
        assert!(connector.endpoints()[0]
            .url
            .path()
            .ends_with("/sessions/mock-session-1/automation"));
    }

    #[tokio::test]
    async fn test_stop_closes_connection_and_next_operation_reconnects() {
        let (mock, connector, client) = page_client();
        client.click("#title").await.unwrap();
        client.stop_session().await.unwrap();
        assert!(connector.driver().closed());
        assert_eq!(mock.stop_count(), 1);

        client.click("#title").await.unwrap();
        assert_eq!(mock.start_count(), 2);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_block_stop() {
        let (mock, connector, client) = page_client();
        client.click("#title").await.unwrap();
        connector.driver().fail_close("socket gone");

        let stopped = client.stop_session().await.unwrap();
        assert!(stopped.is_some());
        assert_eq!(mock.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_navigate_defaults() {
        let (_, connector, client) = page_client();
        client
            .navigate(NavigateParams::new("https://example.com"))
            .await
            .unwrap();
        assert_eq!(
            connector.driver().calls(),
            vec![DriverCall::Navigate(
                "https://example.com".to_string(),
                WaitUntil::DomContentLoaded
            )]
        );
    }

    #[tokio::test]
    async fn test_navigation_timeout_propagates() {
        let (_, connector, client) = page_client();
        connector.driver().time_out_waits_for(WaitUntil::Load);
        let err = client
            .navigate(NavigateParams::new("https://slow.test").wait_until(WaitUntil::Load))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_get_text_and_html() {
        let (_, _, client) = page_client();
        assert_eq!(client.get_text("#title").await.unwrap(), "Hello");
        assert_eq!(
            client.get_html(Some("#title")).await.unwrap(),
            "<span>Hello</span>"
        );
        assert!(client
            .get_html(None)
            .await
            .unwrap()
            .starts_with("<html>"));

        let err = client.get_text("#nope").await.unwrap_err();
        assert!(err.is_element_not_found());
        let err = client.get_html(Some("#nope")).await.unwrap_err();
        assert!(err.is_element_not_found());
    }

    #[tokio::test]
    async fn test_screenshot_defaults_and_base64() {
        let (_, connector, client) = page_client();
        let shot = client.screenshot(ScreenshotParams::default()).await.unwrap();
        assert_eq!(shot, Screenshot::Binary(MOCK_SCREENSHOT.to_vec()));
        assert_eq!(
            connector.driver().calls(),
            vec![DriverCall::Screenshot {
                full_page: false,
                format: ImageFormat::Png
            }]
        );

        let shot = client
            .screenshot(ScreenshotParams::default().encoding(ScreenshotEncoding::Base64))
            .await
            .unwrap();
        assert_eq!(shot.into_bytes().unwrap(), MOCK_SCREENSHOT.to_vec());
    }

    #[tokio::test]
    async fn test_is_visible_never_fails() {
        let (_, connector, client) = page_client();
        assert!(client.is_visible("#title").await);
        assert!(!client.is_visible("#secret").await);
        assert!(!client.is_visible("#nope").await);

        connector.driver().fail_with("connection lost");
        assert!(!client.is_visible("#title").await);
    }

    #[tokio::test]
    async fn test_is_visible_false_when_session_cannot_start() {
        let mock = MockTransport::new();
        mock.fail_start("throttled");
        let connector = MockConnector::new(MockDriver::new());
        assert!(!client(&mock, &connector).is_visible("#x").await);
    }

    #[tokio::test]
    async fn test_page_errors_propagate() {
        let (_, connector, client) = page_client();
        connector.driver().fail_with("connection lost");
        assert!(client.evaluate("1 + 1").await.is_err());
        assert!(client.click("#title").await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_selector_defaults_to_visible() {
        let (_, connector, client) = page_client();
        client
            .wait_for_selector(WaitForSelectorParams::new("#title"))
            .await
            .unwrap();
        assert_eq!(
            connector.driver().calls(),
            vec![DriverCall::WaitForSelector(
                "#title".to_string(),
                SelectorState::Visible
            )]
        );
    }

    #[tokio::test]
    async fn test_back_falls_back_to_direct() {
        let (_, connector, client) = page_client();
        connector.driver().time_out_waits_for(WaitUntil::NetworkIdle);
        connector.driver().time_out_waits_for(WaitUntil::Load);
        client.back().await.unwrap();
        assert_eq!(
            connector.driver().calls().last(),
            Some(&DriverCall::TraverseHistoryDirect(HistoryDirection::Back))
        );
    }

    #[tokio::test]
    async fn test_refresh_waits_for_load() {
        let (_, connector, client) = page_client();
        client.refresh().await.unwrap();
        assert_eq!(
            connector.driver().calls(),
            vec![DriverCall::Reload(WaitUntil::Load)]
        );
    }

    #[tokio::test]
    async fn test_metadata_requires_session_or_id() {
        let (mock, _, client) = page_client();
        let err = client.get_session(None).await.unwrap_err();
        assert!(matches!(err, SandboxError::MissingSession));
        assert!(client.update_stream(StreamStatus::Disabled, None).await.is_err());
        assert!(client.live_view_url(None, None).await.is_err());
        assert!(mock.calls().is_empty());

        let details = client.get_session(Some("explicit")).await.unwrap();
        assert_eq!(details.session_id, "explicit");
    }

    #[tokio::test]
    async fn test_metadata_uses_active_session() {
        let (mock, _, client) = page_client();
        let session = client.start_session(StartSessionParams::default()).await.unwrap();

        client
            .update_stream(StreamStatus::Enabled, None)
            .await
            .unwrap();
        let url = client.live_view_url(Some(60), None).await.unwrap();
        assert!(url.as_str().contains(&session.session_id));
        assert!(url.as_str().contains("X-Amz-Expires=60"));
        assert_eq!(
            mock.calls().last(),
            Some(&RecordedCall::UpdateBrowserStream(
                session.session_id.clone(),
                StreamStatus::Enabled
            ))
        );

        let sessions = client.list_sessions(Some(SessionStatus::Ready)).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_start_session_passes_viewport() {
        let mock = MockTransport::new();
        let mut config = Config::for_region("us-west-2");
        config.browser.viewport = Some(crate::config::Viewport {
            width: 1280,
            height: 720,
        });
        let client = BrowserClient::with_parts(
            &config,
            Arc::new(mock.clone()),
            Arc::new(MockConnector::default()),
        );
        client.start_session(StartSessionParams::default()).await.unwrap();
        match &mock.calls()[0] {
            RecordedCall::Start(request) => {
                assert_eq!(request.kind, SandboxKind::Browser);
                assert_eq!(request.identifier, "aws.browser.v1");
                assert_eq!(request.viewport.map(|v| v.width), Some(1280));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }
}
