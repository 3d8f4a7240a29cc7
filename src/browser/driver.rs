//! Browser automation seam.
//!
//! [`BrowserClient`](super::BrowserClient) never speaks a wire protocol
//! itself; it delegates page work to an [`AutomationDriver`] obtained once
//! per session from a [`DriverConnector`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::types::{Cookie, HistoryDirection, ImageFormat, SelectorState, WaitUntil};
use crate::config::Viewport;
use crate::error::Result;
use crate::transport::SignedEndpoint;

/// A live connection to one page of a remote browser.
///
/// Waiting methods fail with [`SandboxError::Timeout`](crate::SandboxError::Timeout)
/// when their deadline passes; selector lookups that match nothing are
/// reported as `None`/`false` rather than as errors.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Loads `url` and waits for `wait_until`.
    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()>;

    /// Clicks the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Focuses `selector` and types `text` after its current value.
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    /// Replaces the value of an input matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Text content of the first match, `None` when nothing matches.
    async fn text_content(&self, selector: &str) -> Result<Option<String>>;

    /// Inner HTML of the first match, `None` when nothing matches.
    async fn inner_html(&self, selector: &str) -> Result<Option<String>>;

    /// Serialized HTML of the whole document.
    async fn content(&self) -> Result<String>;

    /// Captures the viewport, or the full page, as encoded image bytes.
    async fn screenshot(
        &self,
        full_page: bool,
        format: ImageFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>>;

    /// Evaluates a script and returns its JSON-serializable result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Cookies visible to the page.
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    /// Adds or replaces cookies.
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// Presses a key (e.g. `Enter`, `a`) on the focused element.
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Waits until `selector` reaches `state`.
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<()>;

    /// Whether `selector` currently matches a visible element.
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// Moves one history entry and waits for `wait_until`.
    ///
    /// Retrying after a timeout must not move a second time.
    async fn traverse_history(
        &self,
        direction: HistoryDirection,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<()>;

    /// Moves one history entry without waiting for anything.
    async fn traverse_history_direct(&self, direction: HistoryDirection) -> Result<()>;

    /// Reloads the page and waits for `wait_until`.
    async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Opens automation connections.
#[async_trait]
pub trait DriverConnector: Send + Sync {
    /// Connects to a browser session through a signed endpoint.
    async fn connect(
        &self,
        endpoint: &SignedEndpoint,
        viewport: Option<Viewport>,
    ) -> Result<Arc<dyn AutomationDriver>>;
}
