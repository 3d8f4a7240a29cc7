//! Parameter and result types of browser page operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SandboxError};

/// Navigation milestone an operation waits for before returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// The navigation was committed; nothing further is awaited.
    Commit,
    /// `DOMContentLoaded` fired.
    #[default]
    DomContentLoaded,
    /// The `load` event fired.
    Load,
    /// No network activity for a short quiet period after `load`.
    NetworkIdle,
}

impl std::fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::DomContentLoaded => write!(f, "domcontentloaded"),
            Self::Load => write!(f, "load"),
            Self::NetworkIdle => write!(f, "networkidle"),
        }
    }
}

impl std::str::FromStr for WaitUntil {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "commit" => Ok(Self::Commit),
            "domcontentloaded" => Ok(Self::DomContentLoaded),
            "load" => Ok(Self::Load),
            "networkidle" => Ok(Self::NetworkIdle),
            _ => Err(SandboxError::config(format!(
                "Unknown wait condition: '{s}'. Supported: commit, domcontentloaded, load, networkidle"
            ))),
        }
    }
}

/// Arguments of [`BrowserClient::navigate`](super::BrowserClient::navigate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigateParams {
    pub url: String,
    /// Defaults to [`WaitUntil::DomContentLoaded`].
    pub wait_until: Option<WaitUntil>,
    /// Defaults to the configured navigation timeout.
    pub timeout: Option<Duration>,
}

impl NavigateParams {
    /// Navigates to `url` with default waiting.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the wait condition.
    #[must_use]
    pub fn wait_until(mut self, wait_until: WaitUntil) -> Self {
        self.wait_until = Some(wait_until);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Raster format of a screenshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Wire name of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

/// How screenshot bytes are handed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScreenshotEncoding {
    #[default]
    Binary,
    Base64,
}

/// Arguments of [`BrowserClient::screenshot`](super::BrowserClient::screenshot).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenshotParams {
    /// Capture the whole scrollable page. Defaults to `false`.
    pub full_page: Option<bool>,
    /// Defaults to PNG.
    pub format: Option<ImageFormat>,
    /// JPEG quality, 0-100. Ignored for PNG.
    pub quality: Option<u8>,
    /// Defaults to raw bytes.
    pub encoding: Option<ScreenshotEncoding>,
}

impl ScreenshotParams {
    /// Sets full-page capture.
    #[must_use]
    pub fn full_page(mut self, full_page: bool) -> Self {
        self.full_page = Some(full_page);
        self
    }

    /// Sets the image format.
    #[must_use]
    pub fn format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the output encoding.
    #[must_use]
    pub fn encoding(mut self, encoding: ScreenshotEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// Captured screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screenshot {
    Binary(Vec<u8>),
    Base64(String),
}

impl Screenshot {
    /// Raw image bytes, decoding base64 when needed.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        use base64::Engine;
        match self {
            Self::Binary(bytes) => Ok(bytes),
            Self::Base64(data) => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| SandboxError::protocol(format!("invalid screenshot data: {e}"))),
        }
    }
}

/// Element state awaited by `wait_for_selector`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorState {
    /// Present in the DOM.
    Attached,
    /// Absent from the DOM.
    Detached,
    /// Present with a non-empty box and not hidden by CSS.
    #[default]
    Visible,
    /// Absent or not visible.
    Hidden,
}

/// Arguments of [`BrowserClient::wait_for_selector`](super::BrowserClient::wait_for_selector).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForSelectorParams {
    pub selector: String,
    /// Defaults to [`SelectorState::Visible`].
    pub state: Option<SelectorState>,
    /// Defaults to the configured navigation timeout.
    pub timeout: Option<Duration>,
}

impl WaitForSelectorParams {
    /// Waits for `selector` to become visible.
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Self::default()
        }
    }

    /// Sets the awaited state.
    #[must_use]
    pub fn state(mut self, state: SelectorState) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A browser cookie, in the shape the DevTools protocol uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Seconds since the Unix epoch; session cookies have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl Cookie {
    /// A cookie scoped to `url`.
    pub fn for_url(name: impl Into<String>, value: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Direction of a history traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    Back,
    Forward,
}

impl HistoryDirection {
    /// Offset from the current history entry.
    pub fn delta(self) -> i64 {
        match self {
            Self::Back => -1,
            Self::Forward => 1,
        }
    }
}

impl std::fmt::Display for HistoryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Back => write!(f, "back"),
            Self::Forward => write!(f, "forward"),
        }
    }
}
