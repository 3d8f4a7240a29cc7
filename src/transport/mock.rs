//! Mock transport for testing.
//!
//! Answers invoke calls from a scripted queue and records every call so
//! tests can assert how many remote round trips an operation made.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

use super::{
    BrowserSessionDetails, BrowserSessionSummary, EnvelopeStream, InvokeRequest, SandboxKind,
    SandboxTransport, SessionInfo, SessionStatus, SignedEndpoint, StartSessionRequest,
    StreamStatus,
};
use crate::error::{Result, SandboxError};
use crate::normalize::Envelope;

/// A scripted answer to one invoke call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return these events as the response stream.
    Events(Vec<Envelope>),
    /// Fail the call itself with a transport error.
    Fail(String),
    /// Return these events, then fail mid-stream.
    EventsThenFail(Vec<Envelope>, String),
}

impl MockReply {
    /// A single successful text event.
    pub fn text(text: &str) -> Self {
        Self::Events(vec![Envelope::text(text)])
    }

    /// A single event flagged with `isError`.
    pub fn error_text(text: &str) -> Self {
        Self::Events(vec![Envelope::error_text(text)])
    }
}

/// A call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Start(StartSessionRequest),
    Stop {
        kind: SandboxKind,
        identifier: String,
        session_id: String,
    },
    Invoke(InvokeRequest),
    GetBrowserSession(String),
    ListBrowserSessions(Option<SessionStatus>),
    UpdateBrowserStream(String, StreamStatus),
}

/// A mock sandbox service.
///
/// Invoke replies are consumed in order; when the queue runs dry the
/// fallback reply (an empty text event unless configured) is used.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    fallback: Arc<Mutex<Option<MockReply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    start_count: Arc<AtomicUsize>,
    stop_count: Arc<AtomicUsize>,
    invoke_count: Arc<AtomicUsize>,
    fail_start: Arc<Mutex<Option<String>>>,
    fail_stop: Arc<Mutex<Option<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Creates a mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose every invoke returns the given text.
    pub fn always_text(text: &str) -> Self {
        let mock = Self::new();
        *lock(&mock.fallback) = Some(MockReply::text(text));
        mock
    }

    /// Queues a reply for the next unanswered invoke call.
    pub fn push_reply(&self, reply: MockReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Makes every subsequent session creation fail.
    pub fn fail_start(&self, message: &str) {
        *lock(&self.fail_start) = Some(message.to_string());
    }

    /// Makes every subsequent session stop fail.
    pub fn fail_stop(&self, message: &str) {
        *lock(&self.fail_stop) = Some(message.to_string());
    }

    /// Number of session creations.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of session stops.
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// Number of invoke calls.
    pub fn invoke_count(&self) -> usize {
        self.invoke_count.load(Ordering::SeqCst)
    }

    /// Every call in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Invoke requests in arrival order.
    pub fn invocations(&self) -> Vec<InvokeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Invoke(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RecordedCall) {
        lock(&self.calls).push(call);
    }

    fn next_reply(&self) -> MockReply {
        if let Some(reply) = lock(&self.replies).pop_front() {
            return reply;
        }
        lock(&self.fallback)
            .clone()
            .unwrap_or_else(|| MockReply::text(""))
    }
}

#[async_trait]
impl SandboxTransport for MockTransport {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<SessionInfo> {
        self.record(RecordedCall::Start(request.clone()));
        if let Some(message) = lock(&self.fail_start).clone() {
            return Err(SandboxError::transport(message));
        }
        let n = self.start_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionInfo {
            session_id: format!("mock-session-{n}"),
            created_at: Utc::now(),
            streams: None,
        })
    }

    async fn stop_session(
        &self,
        kind: SandboxKind,
        identifier: &str,
        session_id: &str,
    ) -> Result<()> {
        self.record(RecordedCall::Stop {
            kind,
            identifier: identifier.to_string(),
            session_id: session_id.to_string(),
        });
        if let Some(message) = lock(&self.fail_stop).clone() {
            return Err(SandboxError::transport(message));
        }
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<EnvelopeStream> {
        self.record(RecordedCall::Invoke(request.clone()));
        self.invoke_count.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            MockReply::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            MockReply::Fail(message) => Err(SandboxError::transport(message)),
            MockReply::EventsThenFail(events, message) => Ok(stream::iter(
                events
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(SandboxError::transport(message)))),
            )
            .boxed()),
        }
    }

    async fn get_browser_session(
        &self,
        _identifier: &str,
        session_id: &str,
    ) -> Result<BrowserSessionDetails> {
        self.record(RecordedCall::GetBrowserSession(session_id.to_string()));
        Ok(BrowserSessionDetails {
            session_id: session_id.to_string(),
            name: Some("default".to_string()),
            status: SessionStatus::Ready,
            created_at: Utc::now(),
            last_updated_at: None,
            session_timeout_seconds: Some(3600),
            streams: None,
        })
    }

    async fn list_browser_sessions(
        &self,
        _identifier: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<BrowserSessionSummary>> {
        self.record(RecordedCall::ListBrowserSessions(status));
        let sessions = (1..=self.start_count())
            .map(|n| BrowserSessionSummary {
                session_id: format!("mock-session-{n}"),
                name: Some("default".to_string()),
                status: SessionStatus::Ready,
                created_at: Utc::now(),
                last_updated_at: None,
            })
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .collect();
        Ok(sessions)
    }

    async fn update_browser_stream(
        &self,
        _identifier: &str,
        session_id: &str,
        status: StreamStatus,
    ) -> Result<()> {
        self.record(RecordedCall::UpdateBrowserStream(
            session_id.to_string(),
            status,
        ));
        Ok(())
    }

    fn automation_endpoint(&self, identifier: &str, session_id: &str) -> Result<SignedEndpoint> {
        let url = Url::parse(&format!(
            "wss://mock.invalid/browser-streams/{identifier}/sessions/{session_id}/automation"
        ))
        .map_err(|e| SandboxError::config(e.to_string()))?;
        Ok(SignedEndpoint {
            url,
            headers: vec![("authorization".to_string(), "mock".to_string())],
        })
    }

    fn live_view_url(&self, identifier: &str, session_id: &str, expires_secs: u64) -> Result<Url> {
        Url::parse(&format!(
            "https://mock.invalid/browser-streams/{identifier}/sessions/{session_id}/live-view?X-Amz-Expires={expires_secs}"
        ))
        .map_err(|e| SandboxError::config(e.to_string()))
    }
}
