//! Chrome DevTools Protocol driver over a signed WebSocket.
//!
//! The remote browser exposes its automation stream as a CDP endpoint. One
//! [`CdpDriver`] attaches to a single page target using flattened sessions
//! and implements every page operation with CDP commands plus small page
//! scripts.

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::driver::{AutomationDriver, DriverConnector};
use super::types::{Cookie, HistoryDirection, ImageFormat, SelectorState, WaitUntil};
use crate::config::Viewport;
use crate::error::{Result, SandboxError};
use crate::transport::SignedEndpoint;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Opens [`CdpDriver`] connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpConnector;

#[async_trait]
impl DriverConnector for CdpConnector {
    async fn connect(
        &self,
        endpoint: &SignedEndpoint,
        viewport: Option<Viewport>,
    ) -> Result<Arc<dyn AutomationDriver>> {
        let driver = CdpDriver::connect(endpoint, viewport).await?;
        Ok(Arc::new(driver))
    }
}

/// Command/response multiplexer over one WebSocket.
struct CdpConnection {
    ws_tx: mpsc::Sender<Message>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpConnection {
    async fn open(endpoint: &SignedEndpoint) -> Result<Self> {
        let mut request = endpoint.url.as_str().into_client_request()?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SandboxError::protocol(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SandboxError::protocol(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        debug!(endpoint = %endpoint.url.path(), "Automation stream connected");
        let (mut sink, mut source) = stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_pending = Arc::clone(&pending);
        let writer_closed = Arc::clone(&closed);
        let writer = tokio::spawn(async move {
            while let Some(message) = ws_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Automation stream write failed: {}", e);
                    writer_closed.store(true, Ordering::SeqCst);
                    writer_pending.lock().await.clear();
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = value.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                let _ = tx.send(value);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Automation stream closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("Automation stream read failed: {}", e);
                        break;
                    }
                    Ok(_) => {}
                }
            }
            // Fail every in-flight command instead of leaving it to time out.
            reader_closed.store(true, Ordering::SeqCst);
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            message["sessionId"] = Value::String(session_id.to_string());
        }

        if self.is_closed() {
            return Err(SandboxError::transport("automation connection is closed"));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        // The reader may have shut down between the check and the insert.
        if self.is_closed()
            || self
                .ws_tx
                .send(Message::Text(message.to_string()))
                .await
                .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(SandboxError::transport("automation connection is closed"));
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(SandboxError::transport(format!(
                    "automation connection closed during {method}"
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(SandboxError::timeout_after(method, COMMAND_TIMEOUT));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(SandboxError::protocol(format!("{method}: {message}")));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let sent = self.ws_tx.send(Message::Close(None)).await;
        self.reader.abort();
        sent.map_err(|_| SandboxError::transport("automation connection already closed"))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Automation driver attached to one page target.
pub struct CdpDriver {
    conn: CdpConnection,
    session_id: String,
    /// History entry a timed-out traversal was heading for.
    history_target: std::sync::Mutex<Option<i64>>,
}

impl std::fmt::Debug for CdpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpDriver")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl CdpDriver {
    /// Connects, attaches to the first page (creating one if needed) and
    /// applies the viewport.
    pub async fn connect(endpoint: &SignedEndpoint, viewport: Option<Viewport>) -> Result<Self> {
        let conn = CdpConnection::open(endpoint).await?;

        let targets = conn.send("Target.getTargets", json!({}), None).await?;
        let existing = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .and_then(|infos| {
                infos
                    .iter()
                    .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))
            })
            .and_then(|t| t.get("targetId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let target_id = match existing {
            Some(id) => id,
            None => {
                let created = conn
                    .send("Target.createTarget", json!({ "url": "about:blank" }), None)
                    .await?;
                required_str(&created, "targetId")?.to_string()
            }
        };

        let attached = conn
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = required_str(&attached, "sessionId")?.to_string();
        debug!(%target_id, %session_id, "Attached to page");

        let driver = Self {
            conn,
            session_id,
            history_target: std::sync::Mutex::new(None),
        };
        for domain in ["Page", "Runtime", "Network"] {
            driver.call(&format!("{domain}.enable"), json!({})).await?;
        }
        if let Some(viewport) = viewport {
            driver
                .call(
                    "Emulation.setDeviceMetricsOverride",
                    json!({
                        "width": viewport.width,
                        "height": viewport.height,
                        "deviceScaleFactor": 1,
                        "mobile": false,
                    }),
                )
                .await?;
        }
        Ok(driver)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.conn.send(method, params, Some(&self.session_id)).await
    }

    /// Evaluates an expression in the page and returns its value.
    async fn eval(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(SandboxError::protocol(format!("Script error: {message}")));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Runs `body` with `el` bound to the first match of `selector`.
    async fn with_element(&self, selector: &str, body: &str) -> Result<Value> {
        let selector = serde_json::to_string(selector)?;
        self.eval(&format!(
            "(() => {{ const el = document.querySelector({selector}); {body} }})()"
        ))
        .await
    }

    async fn element_state(&self, selector: &str) -> Result<(bool, bool)> {
        let state = self
            .with_element(
                selector,
                &format!("if (!el) return [false, false]; return [true, {VISIBLE_JS}];"),
            )
            .await?;
        Ok((
            state.get(0).and_then(Value::as_bool).unwrap_or(false),
            state.get(1).and_then(Value::as_bool).unwrap_or(false),
        ))
    }

    async fn wait_for(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        if wait_until == WaitUntil::Commit {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.poll_lifecycle(wait_until))
            .await
            .map_err(|_| SandboxError::timeout_after(&format!("waiting for {wait_until}"), timeout))?
    }

    async fn poll_lifecycle(&self, wait_until: WaitUntil) -> Result<()> {
        let mut quiet_since: Option<(u64, Instant)> = None;
        loop {
            let progress = self
                .eval("[document.readyState, performance.getEntriesByType('resource').length]")
                .await?;
            let ready_state = progress.get(0).and_then(Value::as_str).unwrap_or("loading");
            let resources = progress.get(1).and_then(Value::as_u64).unwrap_or(0);

            match wait_until {
                WaitUntil::Commit => return Ok(()),
                WaitUntil::DomContentLoaded if ready_state != "loading" => return Ok(()),
                WaitUntil::Load if ready_state == "complete" => return Ok(()),
                WaitUntil::NetworkIdle if ready_state == "complete" => match quiet_since {
                    Some((count, since)) if count == resources => {
                        if since.elapsed() >= NETWORK_IDLE_WINDOW {
                            return Ok(());
                        }
                    }
                    _ => quiet_since = Some((resources, Instant::now())),
                },
                _ => quiet_since = None,
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until `entry_id` is the committed history entry, then for
    /// `wait_until` on the document it committed.
    async fn settle_on_entry(
        &self,
        entry_id: i64,
        direction: HistoryDirection,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<()> {
        let settle = async {
            loop {
                let (current, _, _) = self.history_neighbors(direction).await?;
                if current == entry_id {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            if wait_until == WaitUntil::Commit {
                return Ok(());
            }
            self.poll_lifecycle(wait_until).await
        };
        tokio::time::timeout(timeout, settle)
            .await
            .map_err(|_| SandboxError::timeout_after(&format!("waiting for {wait_until}"), timeout))?
    }

    fn take_history_target(&self) -> Option<i64> {
        self.history_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_history_target(&self, target: Option<i64>) {
        *self
            .history_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = target;
    }

    /// Current entry id, all entry ids, and the entry `direction` leads to.
    async fn history_neighbors(
        &self,
        direction: HistoryDirection,
    ) -> Result<(i64, Vec<i64>, Option<i64>)> {
        let history = self.call("Page.getNavigationHistory", json!({})).await?;
        let index = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| SandboxError::protocol("navigation history without currentIndex"))?;
        let ids: Vec<i64> = history
            .get("entries")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("id").and_then(Value::as_i64))
                    .collect()
            })
            .unwrap_or_default();
        let entry = |i: i64| usize::try_from(i).ok().and_then(|i| ids.get(i)).copied();
        let current = entry(index)
            .ok_or_else(|| SandboxError::protocol("navigation history index out of range"))?;
        let next = entry(index + direction.delta());
        Ok((current, ids, next))
    }
}

const VISIBLE_JS: &str = "(() => { const s = getComputedStyle(el); const r = el.getBoundingClientRect(); \
     return s.visibility !== 'hidden' && s.display !== 'none' && r.width > 0 && r.height > 0; })()";

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SandboxError::protocol(format!("response is missing {key}")))
}

fn optional_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Text and virtual key code for keys that produce input.
fn key_details(key: &str) -> (Option<String>, Option<u32>) {
    match key {
        "Enter" => (Some("\r".to_string()), Some(13)),
        "Tab" => (Some("\t".to_string()), Some(9)),
        "Backspace" => (None, Some(8)),
        "Escape" => (None, Some(27)),
        "ArrowLeft" => (None, Some(37)),
        "ArrowUp" => (None, Some(38)),
        "ArrowRight" => (None, Some(39)),
        "ArrowDown" => (None, Some(40)),
        "Delete" => (None, Some(46)),
        _ if key.chars().count() == 1 => (Some(key.to_string()), None),
        _ => (None, None),
    }
}

#[async_trait]
impl AutomationDriver for CdpDriver {
    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        self.set_history_target(None);
        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(SandboxError::transport(format!(
                    "Navigation to {url} failed: {error}"
                )));
            }
        }
        self.wait_for(wait_until, timeout).await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let point = self
            .with_element(
                selector,
                "if (!el) return null; el.scrollIntoView({block: 'center', inline: 'center'}); \
                 const r = el.getBoundingClientRect(); return [r.x + r.width / 2, r.y + r.height / 2];",
            )
            .await?;
        let (Some(x), Some(y)) = (
            point.get(0).and_then(Value::as_f64),
            point.get(1).and_then(Value::as_f64),
        ) else {
            return Err(SandboxError::element_not_found(selector));
        };
        for kind in ["mouseMoved", "mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await?;
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let focused = self
            .with_element(
                selector,
                "if (!el) return false; el.focus(); \
                 if (typeof el.value === 'string') { const n = el.value.length; \
                 try { el.setSelectionRange(n, n); } catch (e) {} } return true;",
            )
            .await?;
        if focused != Value::Bool(true) {
            return Err(SandboxError::element_not_found(selector));
        }
        self.call("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let value = serde_json::to_string(value)?;
        let filled = self
            .with_element(
                selector,
                &format!(
                    "if (!el) return false; el.focus(); el.value = {value}; \
                     el.dispatchEvent(new Event('input', {{bubbles: true}})); \
                     el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;"
                ),
            )
            .await?;
        if filled == Value::Bool(true) {
            Ok(())
        } else {
            Err(SandboxError::element_not_found(selector))
        }
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        let text = self
            .with_element(selector, "return el ? (el.textContent ?? '') : null;")
            .await?;
        Ok(optional_string(text))
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>> {
        let html = self
            .with_element(selector, "return el ? el.innerHTML : null;")
            .await?;
        Ok(optional_string(html))
    }

    async fn content(&self) -> Result<String> {
        let html = self.eval("document.documentElement.outerHTML").await?;
        optional_string(html).ok_or_else(|| SandboxError::protocol("page has no document"))
    }

    async fn screenshot(
        &self,
        full_page: bool,
        format: ImageFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        let mut params = json!({ "format": format.as_str() });
        if let (ImageFormat::Jpeg, Some(quality)) = (format, quality) {
            params["quality"] = json!(quality);
        }
        if full_page {
            let metrics = self.call("Page.getLayoutMetrics", json!({})).await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"))
                .ok_or_else(|| SandboxError::protocol("layout metrics without content size"))?;
            params["captureBeyondViewport"] = Value::Bool(true);
            params["clip"] = json!({
                "x": 0,
                "y": 0,
                "width": size.get("width").cloned().unwrap_or(json!(0)),
                "height": size.get("height").cloned().unwrap_or(json!(0)),
                "scale": 1,
            });
        }
        let result = self.call("Page.captureScreenshot", params).await?;
        let data = required_str(&result, "data")?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| SandboxError::protocol(format!("invalid screenshot data: {e}")))
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.eval(script).await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let result = self.call("Network.getCookies", json!({})).await?;
        let cookies = result.get("cookies").cloned().unwrap_or(json!([]));
        Ok(serde_json::from_value(cookies)?)
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.call("Network.setCookies", json!({ "cookies": cookies }))
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (text, key_code) = key_details(key);
        let mut down = json!({ "type": "keyDown", "key": key });
        if let Some(text) = text {
            down["text"] = Value::String(text);
        }
        if let Some(code) = key_code {
            down["windowsVirtualKeyCode"] = json!(code);
        }
        self.call("Input.dispatchKeyEvent", down).await?;
        let mut up = json!({ "type": "keyUp", "key": key });
        if let Some(code) = key_code {
            up["windowsVirtualKeyCode"] = json!(code);
        }
        self.call("Input.dispatchKeyEvent", up).await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<()> {
        let poll = async {
            loop {
                let (attached, visible) = self.element_state(selector).await?;
                let reached = match state {
                    SelectorState::Attached => attached,
                    SelectorState::Detached => !attached,
                    SelectorState::Visible => visible,
                    SelectorState::Hidden => !visible,
                };
                if reached {
                    return Ok::<(), SandboxError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SandboxError::timeout_after(&format!("waiting for {selector}"), timeout))?
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.element_state(selector).await?.1)
    }

    async fn traverse_history(
        &self,
        direction: HistoryDirection,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<()> {
        let (current, ids, next) = self.history_neighbors(direction).await?;
        // A previous attempt that timed out has already moved (or is moving)
        // the page; finish that traversal instead of starting another.
        let target = match self.take_history_target() {
            Some(pending) if pending == current => None,
            Some(pending) if ids.contains(&pending) => Some(pending),
            _ => match next {
                Some(next) => Some(next),
                None => {
                    debug!(%direction, "No history entry in that direction");
                    return Ok(());
                }
            },
        };
        match target {
            Some(entry_id) => {
                self.call("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
                    .await?;
                self.set_history_target(Some(entry_id));
                self.settle_on_entry(entry_id, direction, wait_until, timeout)
                    .await?;
            }
            None => self.wait_for(wait_until, timeout).await?,
        }
        self.set_history_target(None);
        Ok(())
    }

    async fn traverse_history_direct(&self, direction: HistoryDirection) -> Result<()> {
        if let Some(pending) = self.take_history_target() {
            let (current, ids, _) = self.history_neighbors(direction).await?;
            if pending == current || !ids.contains(&pending) {
                return Ok(());
            }
            self.call("Page.navigateToHistoryEntry", json!({ "entryId": pending }))
                .await?;
            return Ok(());
        }
        let script = match direction {
            HistoryDirection::Back => "history.back()",
            HistoryDirection::Forward => "history.forward()",
        };
        self.eval(script).await?;
        Ok(())
    }

    async fn reload(&self, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
        self.set_history_target(None);
        self.call("Page.reload", json!({})).await?;
        self.wait_for(wait_until, timeout).await
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await
    }
}
