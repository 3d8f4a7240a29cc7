//! HTTPS transport to the sandbox service.
//!
//! Every call is a single SigV4-signed request. Non-2xx answers become
//! [`SandboxError::Service`]; nothing is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::debug;
use url::Url;

use super::{
    BrowserSessionDetails, BrowserSessionSummary, BrowserStreams, EnvelopeStream,
    EventStreamDecoder, InvokeRequest, SandboxKind, SandboxTransport, SessionInfo, SessionStatus,
    SignedEndpoint, StartSessionRequest, StreamEndpoint, StreamStatus,
};
use crate::config::Config;
use crate::error::{Result, SandboxError};
use crate::normalize::Envelope;
use crate::signing::{presign_url, sign_request, Credentials, SigningParams, SERVICE_NAME};

/// Header carrying the code-interpreter session id on invoke calls.
const SESSION_ID_HEADER: &str = "x-amzn-code-interpreter-session-id";

/// Page size used for session listings.
const LIST_PAGE_SIZE: u32 = 100;

/// Transport that calls the sandbox service over HTTPS.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Builds a transport from configuration, resolving credentials now.
    pub fn new(config: &Config) -> Result<Self> {
        let credentials = config.credentials.resolve()?;
        Self::with_credentials(config.endpoint_url()?, config.region.clone(), credentials)
    }

    /// Builds a transport with explicit endpoint and credentials.
    pub fn with_credentials(endpoint: Url, region: String, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("agent-sandbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            region,
            credentials,
        })
    }

    fn signing_params(&self) -> SigningParams<'_> {
        SigningParams {
            credentials: &self.credentials,
            region: &self.region,
            service: SERVICE_NAME,
            time: Utc::now(),
        }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), path);
        let mut url = Url::parse(&raw)
            .map_err(|e| SandboxError::config(format!("bad request URL {raw}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn stream_url(&self, scheme: &str, identifier: &str, session_id: &str, leaf: &str) -> Result<Url> {
        let mut url = self.url(
            &format!("browser-streams/{identifier}/sessions/{session_id}/{leaf}"),
            &[],
        )?;
        url.set_scheme(scheme)
            .map_err(|()| SandboxError::config(format!("cannot use scheme {scheme} for {url}")))?;
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        extra_headers: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let body_bytes = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        let mut headers = extra_headers.to_vec();
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        let signed = sign_request(
            method.as_str(),
            &url,
            &headers,
            &body_bytes,
            &self.signing_params(),
        )?;

        debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        for (name, value) in headers.iter().chain(signed.iter()) {
            if name == "host" {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if !body_bytes.is_empty() {
            request = request.body(body_bytes);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::service(status.as_u16(), error_message(&body)))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send(method, url, body, &[]).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Pulls a readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("Message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn client_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl SandboxTransport for HttpTransport {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<SessionInfo> {
        let url = self.url(
            &format!(
                "{}/{}/sessions/start",
                request.kind.resource(),
                request.identifier
            ),
            &[],
        )?;
        let mut body = json!({
            "name": request.name,
            "sessionTimeoutSeconds": request.timeout_seconds,
            "clientToken": client_token(),
        });
        if let Some(viewport) = request.viewport {
            body["viewPort"] = json!({"width": viewport.width, "height": viewport.height});
        }

        let wire: WireStartResponse = self.send_json(Method::PUT, url, Some(&body)).await?;
        Ok(SessionInfo {
            session_id: wire.session_id,
            created_at: wire.created_at,
            streams: wire.streams.map(BrowserStreams::from),
        })
    }

    async fn stop_session(
        &self,
        kind: SandboxKind,
        identifier: &str,
        session_id: &str,
    ) -> Result<()> {
        let url = self.url(
            &format!("{}/{identifier}/sessions/stop", kind.resource()),
            &[("sessionId", session_id)],
        )?;
        let body = json!({ "clientToken": client_token() });
        self.send(Method::PUT, url, Some(&body), &[]).await?;
        Ok(())
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<EnvelopeStream> {
        let url = self.url(
            &format!("code-interpreters/{}/tools/invoke", request.identifier),
            &[],
        )?;
        let body = json!({
            "name": request.name,
            "arguments": request.arguments,
        });
        let response = self
            .send(
                Method::POST,
                url,
                Some(&body),
                &[(SESSION_ID_HEADER.to_string(), request.session_id.clone())],
            )
            .await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        if is_json {
            let bytes = response.bytes().await?;
            let value: Value = serde_json::from_slice(&bytes)?;
            let events: Vec<Result<Envelope>> = match value {
                Value::Array(items) => items.into_iter().map(|v| Ok(Envelope::from_value(v))).collect(),
                single => vec![Ok(Envelope::from_value(single))],
            };
            return Ok(stream::iter(events).boxed());
        }

        Ok(decode_event_stream(response.bytes_stream().boxed()))
    }

    async fn get_browser_session(
        &self,
        identifier: &str,
        session_id: &str,
    ) -> Result<BrowserSessionDetails> {
        let url = self.url(
            &format!("browsers/{identifier}/sessions/get"),
            &[("sessionId", session_id)],
        )?;
        let wire: WireBrowserSession = self.send_json(Method::GET, url, None).await?;
        Ok(BrowserSessionDetails {
            session_id: wire.session_id,
            name: wire.name,
            status: wire.status,
            created_at: wire.created_at,
            last_updated_at: wire.last_updated_at,
            session_timeout_seconds: wire.session_timeout_seconds,
            streams: wire.streams.map(BrowserStreams::from),
        })
    }

    async fn list_browser_sessions(
        &self,
        identifier: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<BrowserSessionSummary>> {
        let url = self.url(&format!("browsers/{identifier}/sessions/list"), &[])?;
        let mut body = json!({ "maxResults": LIST_PAGE_SIZE });
        if let Some(status) = status {
            body["status"] = json!(status.as_str());
        }
        let wire: WireListResponse = self.send_json(Method::POST, url, Some(&body)).await?;
        Ok(wire
            .items
            .into_iter()
            .map(|item| BrowserSessionSummary {
                session_id: item.session_id,
                name: item.name,
                status: item.status,
                created_at: item.created_at,
                last_updated_at: item.last_updated_at,
            })
            .collect())
    }

    async fn update_browser_stream(
        &self,
        identifier: &str,
        session_id: &str,
        status: StreamStatus,
    ) -> Result<()> {
        let url = self.url(
            &format!("browsers/{identifier}/sessions/streams/update"),
            &[("sessionId", session_id)],
        )?;
        let body = json!({
            "streamUpdate": {
                "automationStreamUpdate": { "streamStatus": status.as_str() }
            },
            "clientToken": client_token(),
        });
        self.send(Method::PUT, url, Some(&body), &[]).await?;
        Ok(())
    }

    fn automation_endpoint(&self, identifier: &str, session_id: &str) -> Result<SignedEndpoint> {
        let scheme = if self.endpoint.scheme() == "http" { "ws" } else { "wss" };
        let url = self.stream_url(scheme, identifier, session_id, "automation")?;
        let headers = sign_request("GET", &url, &[], b"", &self.signing_params())?;
        Ok(SignedEndpoint { url, headers })
    }

    fn live_view_url(&self, identifier: &str, session_id: &str, expires_secs: u64) -> Result<Url> {
        let url = self.stream_url(
            self.endpoint.scheme(),
            identifier,
            session_id,
            "live-view",
        )?;
        presign_url(&url, expires_secs, &self.signing_params())
    }
}

/// Turns a chunked event-stream body into envelopes as frames complete.
fn decode_event_stream(
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
) -> EnvelopeStream {
    struct State {
        body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
        decoder: EventStreamDecoder,
        pending: VecDeque<Result<Envelope>>,
        done: bool,
    }

    let state = State {
        body,
        decoder: EventStreamDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(envelopes) => state.pending.extend(envelopes.into_iter().map(Ok)),
                    Err(err) => {
                        state.pending.push_back(Err(err));
                        state.done = true;
                    }
                },
                Some(Err(err)) => {
                    state.pending.push_back(Err(err.into()));
                    state.done = true;
                }
                None => {
                    if state.decoder.has_partial() {
                        state
                            .pending
                            .push_back(Err(SandboxError::protocol("event stream ended mid-frame")));
                    }
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

// -----------------------------------------------------------------------------
// Wire types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStartResponse {
    session_id: String,
    #[serde(deserialize_with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    streams: Option<WireStreams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStreams {
    #[serde(default)]
    automation_stream: Option<WireStreamEndpoint>,
    #[serde(default)]
    live_view_stream: Option<WireStreamEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStreamEndpoint {
    stream_endpoint: String,
    #[serde(default)]
    stream_status: Option<String>,
}

impl From<WireStreamEndpoint> for StreamEndpoint {
    fn from(wire: WireStreamEndpoint) -> Self {
        Self {
            endpoint: wire.stream_endpoint,
            status: wire.stream_status.and_then(|s| s.parse().ok()),
        }
    }
}

impl From<WireStreams> for BrowserStreams {
    fn from(wire: WireStreams) -> Self {
        Self {
            automation: wire.automation_stream.map(StreamEndpoint::from),
            live_view: wire.live_view_stream.map(StreamEndpoint::from),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBrowserSession {
    session_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(deserialize_with = "status")]
    status: SessionStatus,
    #[serde(deserialize_with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    session_timeout_seconds: Option<u64>,
    #[serde(default)]
    streams: Option<WireStreams>,
}

#[derive(Debug, Deserialize)]
struct WireListResponse {
    #[serde(default)]
    items: Vec<WireBrowserSession>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Epoch(f64),
}

impl RawTimestamp {
    #[allow(clippy::cast_possible_truncation)]
    fn into_datetime(self) -> std::result::Result<DateTime<Utc>, String> {
        match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp {text}: {e}")),
            Self::Epoch(secs) => DateTime::from_timestamp_millis((secs * 1000.0) as i64)
                .ok_or_else(|| format!("timestamp out of range: {secs}")),
        }
    }
}

fn timestamp<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    RawTimestamp::deserialize(d)?
        .into_datetime()
        .map_err(serde::de::Error::custom)
}

fn optional_timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<RawTimestamp>::deserialize(d)? {
        Some(raw) => raw.into_datetime().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn status<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<SessionStatus, D::Error> {
    String::deserialize(d)?
        .parse()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{collect_stream, ToolOutput};
    use crate::transport::event_stream::tests::encode_frame;

    fn transport(endpoint: &str) -> HttpTransport {
        HttpTransport::with_credentials(
            Url::parse(endpoint).unwrap(),
            "us-west-2".to_string(),
            Credentials::new("AKID", "SECRET", None),
        )
        .unwrap()
    }

    #[test]
    fn test_url_building() {
        let t = transport("https://bedrock-agentcore.us-west-2.amazonaws.com");
        let url = t
            .url("browsers/aws.browser.v1/sessions/get", &[("sessionId", "abc")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bedrock-agentcore.us-west-2.amazonaws.com/browsers/aws.browser.v1/sessions/get?sessionId=abc"
        );
    }

    #[test]
    fn test_automation_endpoint_is_signed_wss() {
        let t = transport("https://bedrock-agentcore.us-west-2.amazonaws.com/");
        let endpoint = t.automation_endpoint("aws.browser.v1", "sess-1").unwrap();
        assert_eq!(endpoint.url.scheme(), "wss");
        assert_eq!(
            endpoint.url.path(),
            "/browser-streams/aws.browser.v1/sessions/sess-1/automation"
        );
        assert!(endpoint.headers.iter().any(|(k, _)| k == "authorization"));
        assert!(endpoint.headers.iter().any(|(k, _)| k == "x-amz-date"));
    }

    #[test]
    fn test_automation_endpoint_plain_http_uses_ws() {
        let t = transport("http://localhost:8080");
        let endpoint = t.automation_endpoint("b", "s").unwrap();
        assert_eq!(endpoint.url.scheme(), "ws");
        assert_eq!(endpoint.url.port(), Some(8080));
    }

    #[test]
    fn test_live_view_url_is_presigned() {
        let t = transport("https://bedrock-agentcore.us-west-2.amazonaws.com");
        let url = t.live_view_url("aws.browser.v1", "sess-1", 300).unwrap();
        assert_eq!(url.scheme(), "https");
        assert!(url.path().ends_with("/live-view"));
        assert!(url.query().unwrap().contains("X-Amz-Signature="));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"denied"}"#), "denied");
        assert_eq!(error_message(r#"{"Message":"throttled"}"#), "throttled");
        assert_eq!(error_message("  plain text \n"), "plain text");
    }

    #[test]
    fn test_wire_start_response_accepts_both_timestamp_forms() {
        let iso: WireStartResponse = serde_json::from_value(json!({
            "sessionId": "s-1",
            "createdAt": "2025-01-02T03:04:05Z"
        }))
        .unwrap();
        let epoch: WireStartResponse = serde_json::from_value(json!({
            "sessionId": "s-2",
            "createdAt": 1_735_787_045.0
        }))
        .unwrap();
        assert_eq!(iso.created_at, epoch.created_at);
    }

    #[test]
    fn test_wire_browser_session() {
        let wire: WireBrowserSession = serde_json::from_value(json!({
            "sessionId": "s-1",
            "name": "default",
            "status": "READY",
            "createdAt": "2025-01-02T03:04:05Z",
            "streams": {
                "automationStream": {"streamEndpoint": "wss://x/automation", "streamStatus": "ENABLED"},
                "liveViewStream": {"streamEndpoint": "https://x/live-view"}
            }
        }))
        .unwrap();
        assert_eq!(wire.status, SessionStatus::Ready);
        let streams = BrowserStreams::from(wire.streams.unwrap());
        assert_eq!(
            streams.automation.unwrap().status,
            Some(StreamStatus::Enabled)
        );
        assert_eq!(streams.live_view.unwrap().endpoint, "https://x/live-view");
    }

    #[tokio::test]
    async fn test_decode_event_stream_body() {
        let payload = json!({"content": [{"type": "text", "text": "42"}]}).to_string();
        let frame = encode_frame(
            &[(":message-type", "event"), (":event-type", "result")],
            payload.as_bytes(),
        );
        let (a, b) = frame.split_at(10);
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::copy_from_slice(a)),
            Ok(bytes::Bytes::copy_from_slice(b)),
        ];
        let out = collect_stream(decode_event_stream(stream::iter(chunks).boxed()))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::success("42"));
    }

    #[tokio::test]
    async fn test_truncated_event_stream_is_an_error() {
        let frame = encode_frame(&[(":message-type", "event")], b"");
        let chunks: Vec<reqwest::Result<bytes::Bytes>> =
            vec![Ok(bytes::Bytes::copy_from_slice(&frame[..frame.len() - 2]))];
        let result = collect_stream(decode_event_stream(stream::iter(chunks).boxed())).await;
        assert!(matches!(result, Err(SandboxError::Protocol { .. })));
    }
}
