//! Remote sandbox service calls.
//!
//! [`SandboxTransport`] is the seam between the clients and the network.
//! [`HttpTransport`] talks to the real service; [`MockTransport`] answers
//! from a script for tests.

mod event_stream;
mod http;
mod mock;

pub use event_stream::EventStreamDecoder;
pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport, RecordedCall};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::Viewport;
use crate::error::{Result, SandboxError};
use crate::normalize::Envelope;

/// Sandbox family a call is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    /// Remote code execution.
    CodeInterpreter,
    /// Remote browser.
    Browser,
}

impl SandboxKind {
    /// REST collection name for this family.
    pub fn resource(self) -> &'static str {
        match self {
            Self::CodeInterpreter => "code-interpreters",
            Self::Browser => "browsers",
        }
    }
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeInterpreter => write!(f, "code-interpreter"),
            Self::Browser => write!(f, "browser"),
        }
    }
}

/// Parameters of a remote "create session" call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSessionRequest {
    pub kind: SandboxKind,
    pub identifier: String,
    pub name: String,
    pub timeout_seconds: u64,
    pub viewport: Option<Viewport>,
}

/// What the service returns for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub streams: Option<BrowserStreams>,
}

/// A named operation invoked inside a code-interpreter session.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub identifier: String,
    pub session_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Events of one invoke call, in arrival order.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope>>;

/// Lifecycle state of a browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Ready,
    Terminating,
    Terminated,
}

impl SessionStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "READY" => Ok(Self::Ready),
            "TERMINATING" => Ok(Self::Terminating),
            "TERMINATED" => Ok(Self::Terminated),
            _ => Err(SandboxError::protocol(format!(
                "Unknown session status: '{s}'. Supported: ready, terminating, terminated"
            ))),
        }
    }
}

/// Whether the automation stream accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Enabled,
    Disabled,
}

impl StreamStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
        }
    }
}

impl std::str::FromStr for StreamStatus {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ENABLED" => Ok(Self::Enabled),
            "DISABLED" => Ok(Self::Disabled),
            _ => Err(SandboxError::protocol(format!("Unknown stream status: '{s}'"))),
        }
    }
}

/// One stream endpoint advertised for a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEndpoint {
    pub endpoint: String,
    pub status: Option<StreamStatus>,
}

/// Streams advertised for a browser session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrowserStreams {
    pub automation: Option<StreamEndpoint>,
    pub live_view: Option<StreamEndpoint>,
}

/// Full description of a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserSessionDetails {
    pub session_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub session_timeout_seconds: Option<u64>,
    pub streams: Option<BrowserStreams>,
}

/// Row of a browser session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserSessionSummary {
    pub session_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// A signed URL plus the headers that must accompany the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEndpoint {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

/// Calls consumed from the remote sandbox service.
///
/// Implementations make exactly one remote attempt per call.
#[async_trait]
pub trait SandboxTransport: Send + Sync {
    /// Creates a session.
    async fn start_session(&self, request: &StartSessionRequest) -> Result<SessionInfo>;

    /// Stops a session.
    async fn stop_session(&self, kind: SandboxKind, identifier: &str, session_id: &str)
        -> Result<()>;

    /// Invokes a named code-interpreter operation.
    async fn invoke(&self, request: &InvokeRequest) -> Result<EnvelopeStream>;

    /// Fetches one browser session.
    async fn get_browser_session(
        &self,
        identifier: &str,
        session_id: &str,
    ) -> Result<BrowserSessionDetails>;

    /// Lists browser sessions, optionally filtered by status.
    async fn list_browser_sessions(
        &self,
        identifier: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<BrowserSessionSummary>>;

    /// Enables or disables the automation stream of a browser session.
    async fn update_browser_stream(
        &self,
        identifier: &str,
        session_id: &str,
        status: StreamStatus,
    ) -> Result<()>;

    /// Signed WebSocket endpoint for driving the browser.
    fn automation_endpoint(&self, identifier: &str, session_id: &str) -> Result<SignedEndpoint>;

    /// Presigned URL for watching the browser.
    fn live_view_url(&self, identifier: &str, session_id: &str, expires_secs: u64) -> Result<Url>;
}
