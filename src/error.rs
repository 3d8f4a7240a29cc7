//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Result alias used throughout the SDK.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A session is already live on this client.
    #[error("Session already active ({session_id}); call stop_session() first")]
    AlreadyActive { session_id: String },

    /// The remote call itself failed (network, TLS, connection reset).
    #[error("Transport failure: {message}")]
    Transport { message: String },

    /// The service answered with a non-success status.
    #[error("Service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// A wait or navigation exceeded its deadline.
    #[error("Timed out: {message}")]
    Timeout { message: String },

    /// A selector matched no element on the page.
    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    /// No session id was given and no session is active.
    #[error("No session id provided and no active session; start a session or pass an explicit id")]
    MissingSession,

    /// Credentials could not be resolved.
    #[error("Credentials unavailable: {message}")]
    Credentials { message: String },

    /// Configuration is invalid.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// The remote end spoke something we could not interpret.
    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl SandboxError {
    /// Creates an `AlreadyActive` error.
    pub fn already_active(session_id: impl Into<String>) -> Self {
        Self::AlreadyActive {
            session_id: session_id.into(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a `Service` error.
    pub fn service(status: u16, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error from an elapsed `Duration`.
    pub fn timeout_after(what: &str, duration: Duration) -> Self {
        Self::timeout(format!("{what} exceeded {}ms", duration.as_millis()))
    }

    /// Creates an `ElementNotFound` error.
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Creates a `Credentials` error.
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            message: message.into(),
        }
    }

    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout-class error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is the already-active precondition violation.
    pub fn is_already_active(&self) -> bool {
        matches!(self, Self::AlreadyActive { .. })
    }

    /// Returns true if a selector matched nothing.
    pub fn is_element_not_found(&self) -> bool {
        matches!(self, Self::ElementNotFound { .. })
    }
}

impl From<reqwest::Error> for SandboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SandboxError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(err.to_string())
    }
}
