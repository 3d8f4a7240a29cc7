//! In-memory automation driver for testing.
//!
//! Holds a fixed set of elements keyed by selector and records every call.
//! Timeouts and failures can be injected to exercise fallback paths.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::driver::{AutomationDriver, DriverConnector};
use super::types::{Cookie, HistoryDirection, ImageFormat, SelectorState, WaitUntil};
use crate::config::Viewport;
use crate::error::{Result, SandboxError};
use crate::transport::SignedEndpoint;

/// Bytes returned by every mock screenshot.
pub const MOCK_SCREENSHOT: &[u8] = b"\x89PNG mock";

/// A call observed by [`MockDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Navigate(String, WaitUntil),
    Click(String),
    TypeText(String, String),
    Fill(String, String),
    TextContent(String),
    InnerHtml(String),
    Content,
    Screenshot { full_page: bool, format: ImageFormat },
    Evaluate(String),
    Cookies,
    SetCookies(Vec<Cookie>),
    PressKey(String),
    WaitForSelector(String, SelectorState),
    IsVisible(String),
    TraverseHistory(HistoryDirection, WaitUntil),
    TraverseHistoryDirect(HistoryDirection),
    Reload(WaitUntil),
    Close,
}

/// An element on the mock page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockElement {
    pub text: String,
    pub html: String,
    pub visible: bool,
}

impl MockElement {
    /// A visible element with the given text.
    pub fn visible(text: &str) -> Self {
        Self {
            text: text.to_string(),
            html: format!("<span>{text}</span>"),
            visible: true,
        }
    }

    /// A hidden element with the given text.
    pub fn hidden(text: &str) -> Self {
        Self {
            visible: false,
            ..Self::visible(text)
        }
    }
}

#[derive(Debug, Default)]
struct MockPage {
    url: String,
    elements: HashMap<String, MockElement>,
    cookies: Vec<Cookie>,
    eval_result: Value,
    timeout_waits: Vec<WaitUntil>,
    failure: Option<String>,
    close_failure: Option<String>,
}

/// A scriptable [`AutomationDriver`].
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    page: Arc<Mutex<MockPage>>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDriver {
    /// An empty page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element reachable through `selector`.
    pub fn with_element(self, selector: &str, element: MockElement) -> Self {
        lock(&self.page)
            .elements
            .insert(selector.to_string(), element);
        self
    }

    /// Sets the value returned by `evaluate`.
    pub fn with_eval_result(self, value: Value) -> Self {
        lock(&self.page).eval_result = value;
        self
    }

    /// Makes every wait for `wait_until` time out.
    pub fn time_out_waits_for(&self, wait_until: WaitUntil) {
        lock(&self.page).timeout_waits.push(wait_until);
    }

    /// Makes every page operation fail with a transport error.
    pub fn fail_with(&self, message: &str) {
        lock(&self.page).failure = Some(message.to_string());
    }

    /// Makes `close` fail.
    pub fn fail_close(&self, message: &str) {
        lock(&self.page).close_failure = Some(message.to_string());
    }

    /// URL of the last completed navigation.
    pub fn url(&self) -> String {
        lock(&self.page).url.clone()
    }

    /// Every call in arrival order.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// Whether `close` was called.
    pub fn closed(&self) -> bool {
        self.calls().contains(&DriverCall::Close)
    }

    fn record(&self, call: DriverCall) -> Result<()> {
        lock(&self.calls).push(call);
        match &lock(&self.page).failure {
            Some(message) => Err(SandboxError::transport(message.clone())),
            None => Ok(()),
        }
    }

    fn wait(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        if lock(&self.page).timeout_waits.contains(&wait_until) {
            return Err(SandboxError::timeout_after(
                &format!("waiting for {wait_until}"),
                timeout,
            ));
        }
        Ok(())
    }

    fn element(&self, selector: &str) -> Option<MockElement> {
        lock(&self.page).elements.get(selector).cloned()
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        self.record(DriverCall::Navigate(url.to_string(), wait_until))?;
        lock(&self.page).url = url.to_string();
        self.wait(wait_until, timeout)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.record(DriverCall::Click(selector.to_string()))?;
        self.element(selector)
            .map(|_| ())
            .ok_or_else(|| SandboxError::element_not_found(selector))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.record(DriverCall::TypeText(selector.to_string(), text.to_string()))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.record(DriverCall::Fill(selector.to_string(), value.to_string()))
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        self.record(DriverCall::TextContent(selector.to_string()))?;
        Ok(self.element(selector).map(|e| e.text))
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>> {
        self.record(DriverCall::InnerHtml(selector.to_string()))?;
        Ok(self.element(selector).map(|e| e.html))
    }

    async fn content(&self) -> Result<String> {
        self.record(DriverCall::Content)?;
        let body: String = lock(&self.page)
            .elements
            .values()
            .map(|e| e.html.clone())
            .collect();
        Ok(format!("<html><body>{body}</body></html>"))
    }

    async fn screenshot(
        &self,
        full_page: bool,
        format: ImageFormat,
        _quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        self.record(DriverCall::Screenshot { full_page, format })?;
        Ok(MOCK_SCREENSHOT.to_vec())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.record(DriverCall::Evaluate(script.to_string()))?;
        Ok(lock(&self.page).eval_result.clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.record(DriverCall::Cookies)?;
        Ok(lock(&self.page).cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.record(DriverCall::SetCookies(cookies.to_vec()))?;
        let mut page = lock(&self.page);
        for cookie in cookies {
            page.cookies.retain(|c| c.name != cookie.name);
            page.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(DriverCall::PressKey(key.to_string()))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<()> {
        self.record(DriverCall::WaitForSelector(selector.to_string(), state))?;
        let element = self.element(selector);
        let reached = match state {
            SelectorState::Attached => element.is_some(),
            SelectorState::Detached => element.is_none(),
            SelectorState::Visible => element.is_some_and(|e| e.visible),
            SelectorState::Hidden => !element.is_some_and(|e| e.visible),
        };
        if reached {
            Ok(())
        } else {
            Err(SandboxError::timeout_after(
                &format!("waiting for {selector}"),
                timeout,
            ))
        }
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        self.record(DriverCall::IsVisible(selector.to_string()))?;
        Ok(self.element(selector).is_some_and(|e| e.visible))
    }

    async fn traverse_history(
        &self,
        direction: HistoryDirection,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<()> {
        self.record(DriverCall::TraverseHistory(direction, wait_until))?;
        self.wait(wait_until, timeout)
    }

    async fn traverse_history_direct(&self, direction: HistoryDirection) -> Result<()> {
        self.record(DriverCall::TraverseHistoryDirect(direction))
    }

    async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        self.record(DriverCall::Reload(wait_until))?;
        self.wait(wait_until, timeout)
    }

    async fn close(&self) -> Result<()> {
        lock(&self.calls).push(DriverCall::Close);
        match &lock(&self.page).close_failure {
            Some(message) => Err(SandboxError::transport(message.clone())),
            None => Ok(()),
        }
    }
}

/// Hands out one shared [`MockDriver`] and counts connections.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    driver: MockDriver,
    connects: Arc<AtomicUsize>,
    endpoints: Arc<Mutex<Vec<SignedEndpoint>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MockConnector {
    /// A connector that returns `driver` on every connect.
    pub fn new(driver: MockDriver) -> Self {
        Self {
            driver,
            ..Self::default()
        }
    }

    /// The driver handed out.
    pub fn driver(&self) -> &MockDriver {
        &self.driver
    }

    /// Makes every subsequent connect fail.
    pub fn fail_with(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }

    /// Number of connections opened.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Endpoints connected to, in order.
    pub fn endpoints(&self) -> Vec<SignedEndpoint> {
        lock(&self.endpoints).clone()
    }
}

#[async_trait]
impl DriverConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &SignedEndpoint,
        _viewport: Option<Viewport>,
    ) -> Result<Arc<dyn AutomationDriver>> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(SandboxError::transport(message));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.endpoints).push(endpoint.clone());
        Ok(Arc::new(self.driver.clone()))
    }
}
