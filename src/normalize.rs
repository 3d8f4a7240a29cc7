//! Response normalization.
//!
//! The sandbox answers with polymorphic payloads: a bare string, an array
//! of typed content items, or an error object, possibly delivered as a
//! stream of such events. This module decodes them into a closed set of
//! types at the boundary and renders them into a single [`ToolOutput`].
//!
//! Decoding and rendering are total. Shapes that are not recognized end up
//! in an `Unknown`/`Other` arm and are rendered as their JSON text.

use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{Result, SandboxError};

/// Fallback text for error envelopes that carry no message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// One event of a (possibly single-event) response.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A tool result, successful or flagged with `isError`.
    Result(ToolResult),
    /// An explicit error object.
    Error(RemoteError),
}

/// A tool result carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Content,
    pub is_error: bool,
    pub structured_content: Option<Value>,
}

/// The `content` field of a tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Items(Vec<ContentItem>),
    Other(Value),
}

/// A typed element of a content array.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text(String),
    Resource(EmbeddedResource),
    ResourceLink(ResourceLink),
    Unknown(Value),
}

/// Payload of a `resource` item.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedResource {
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub text: Option<String>,
    /// The nested resource object as received.
    pub raw: Value,
}

/// Payload of a `resource_link` item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLink {
    pub uri: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// An explicit error delivered in place of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Error category as named by the service, when known.
    pub kind: Option<String>,
    pub message: Option<String>,
}

/// Normalized outcome of a code-interpreter operation.
///
/// `text` is what the operation produced; `is_error` says whether that text
/// describes a failure, whether reported by the service or caused by the
/// call itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful output.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// A failed output with the given text.
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Renders a caught error as `"Error: <message>"`.
    pub fn from_error(err: &SandboxError) -> Self {
        Self::failure(format!("Error: {err}"))
    }

    /// Returns the output text.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<ToolOutput> for String {
    fn from(output: ToolOutput) -> Self {
        output.text
    }
}

// -----------------------------------------------------------------------------
// Decoding
// -----------------------------------------------------------------------------

impl Envelope {
    /// Decodes a JSON event.
    ///
    /// Recognized shapes:
    /// - `{"result": {...}}` or a bare result object with `content`
    /// - `{"error": {"message": ...}}`
    /// - `{"<name>Exception": {"message": ...}}`
    ///
    /// Anything else becomes a result whose content is `Other`.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Result(ToolResult::from_content(Content::from_value(value)));
        };

        if let Some(result) = map.remove("result") {
            return Self::Result(ToolResult::from_value(result));
        }
        if map.contains_key("content") {
            return Self::Result(ToolResult::from_value(Value::Object(map)));
        }
        if let Some(error) = map.remove("error") {
            return Self::Error(RemoteError::from_value(None, &error));
        }
        if let Some(key) = map.keys().find(|k| k.ends_with("Exception")).cloned() {
            let body = map.remove(&key).unwrap_or(Value::Null);
            return Self::Error(RemoteError::from_value(Some(key), &body));
        }

        Self::Result(ToolResult::from_content(Content::Other(Value::Object(map))))
    }

    /// Builds a plain successful text envelope.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Result(ToolResult::from_content(Content::Text(text.into())))
    }

    /// Builds an envelope flagged with `isError`.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self::Result(ToolResult {
            content: Content::Text(text.into()),
            is_error: true,
            structured_content: None,
        })
    }
}

impl ToolResult {
    /// A non-error result with the given content.
    pub fn from_content(content: Content) -> Self {
        Self {
            content,
            is_error: false,
            structured_content: None,
        }
    }

    /// Decodes a result object (`content`, `isError`, `structuredContent`).
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let is_error = map
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let structured_content = map.remove("structuredContent");
                let content = match map.remove("content") {
                    Some(content) => Content::from_value(content),
                    None => Content::Other(Value::Object(map)),
                };
                Self {
                    content,
                    is_error,
                    structured_content,
                }
            }
            other => Self::from_content(Content::from_value(other)),
        }
    }
}

impl Content {
    /// True for content that carries nothing: no items, empty text or null.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Items(items) => items.is_empty(),
            Self::Other(value) => value.is_null(),
        }
    }

    /// Decodes a `content` value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Array(items) => {
                Self::Items(items.into_iter().map(ContentItem::from_value).collect())
            }
            other => Self::Other(other),
        }
    }
}

impl ContentItem {
    /// Decodes one content item by its `type` tag.
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str);
        match kind {
            Some("text") => match value.get("text").and_then(Value::as_str) {
                Some(text) => Self::Text(text.to_string()),
                None => Self::Unknown(value),
            },
            Some("resource") => match value.get("resource") {
                Some(resource) => Self::Resource(EmbeddedResource::from_value(resource.clone())),
                None => Self::Unknown(value),
            },
            Some("resource_link") => Self::ResourceLink(ResourceLink {
                uri: string_field(&value, "uri"),
                name: string_field(&value, "name"),
                description: string_field(&value, "description"),
                mime_type: string_field(&value, "mimeType"),
            }),
            _ => Self::Unknown(value),
        }
    }
}

impl EmbeddedResource {
    fn from_value(raw: Value) -> Self {
        Self {
            uri: string_field(&raw, "uri"),
            mime_type: string_field(&raw, "mimeType"),
            text: string_field(&raw, "text"),
            raw,
        }
    }
}

impl RemoteError {
    fn from_value(kind: Option<String>, body: &Value) -> Self {
        let message = match body {
            Value::String(s) => Some(s.clone()),
            other => string_field(other, "message").or_else(|| string_field(other, "Message")),
        };
        Self { kind, message }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

// -----------------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------------

/// Renders an envelope into its flat output.
pub fn render_envelope(envelope: &Envelope) -> ToolOutput {
    match envelope {
        Envelope::Result(result) => ToolOutput {
            text: render_content(&result.content),
            is_error: result.is_error,
        },
        Envelope::Error(error) => {
            ToolOutput::failure(error.message.as_deref().unwrap_or(UNKNOWN_ERROR))
        }
    }
}

/// Renders a `content` value.
pub fn render_content(content: &Content) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Items(items) => items
            .iter()
            .map(render_item)
            .collect::<Vec<_>>()
            .join("\n"),
        Content::Other(value) => dump(value),
    }
}

/// Renders one content item.
pub fn render_item(item: &ContentItem) -> String {
    match item {
        ContentItem::Text(text) => text.clone(),
        ContentItem::Resource(resource) => match &resource.text {
            Some(text) => text.clone(),
            None => dump(&resource.raw),
        },
        ContentItem::ResourceLink(link) => render_resource_link(link),
        ContentItem::Unknown(value) => dump(value),
    }
}

/// One-line summary of a resource link, e.g. `"notes.txt - text/plain (file:///notes.txt)"`.
fn render_resource_link(link: &ResourceLink) -> String {
    let summary = [&link.name, &link.description, &link.mime_type]
        .into_iter()
        .filter_map(|part| part.as_deref().filter(|s| !s.is_empty()))
        .collect::<Vec<_>>()
        .join(" - ");

    match (&link.uri, summary.is_empty()) {
        (Some(uri), false) => format!("{summary} ({uri})"),
        (Some(uri), true) => format!("({uri})"),
        (None, _) => summary,
    }
}

fn dump(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// Collects a stream of envelopes; the last non-empty event wins.
///
/// Successful results with empty content never replace earlier output;
/// error envelopes and `isError` results always do. An empty stream yields
/// an empty successful output. A stream item that is an error aborts
/// collection with that error.
pub async fn collect_stream<S>(stream: S) -> Result<ToolOutput>
where
    S: Stream<Item = Result<Envelope>>,
{
    futures_util::pin_mut!(stream);
    let mut output = ToolOutput::default();
    while let Some(event) = stream.next().await {
        let envelope = event?;
        if let Envelope::Result(result) = &envelope {
            if !result.is_error && result.content.is_empty() {
                continue;
            }
        }
        output = render_envelope(&envelope);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    #[test]
    fn test_plain_string_content() {
        let env = Envelope::from_value(json!({"result": {"content": "hello"}}));
        assert_eq!(render_envelope(&env), ToolOutput::success("hello"));
    }

    #[test]
    fn test_text_items_are_joined_with_newlines() {
        let env = Envelope::from_value(json!({
            "result": {
                "content": [
                    {"type": "text", "text": "line one"},
                    {"type": "text", "text": "line two"}
                ]
            }
        }));
        assert_eq!(render_envelope(&env).text, "line one\nline two");
    }

    #[test]
    fn test_is_error_flag_is_carried() {
        let env = Envelope::from_value(json!({
            "result": {"content": [{"type": "text", "text": "Error occurred"}], "isError": true}
        }));
        let out = render_envelope(&env);
        assert!(out.is_error);
        assert_eq!(out.text, "Error occurred");
    }

    #[test]
    fn test_resource_with_text() {
        let item = ContentItem::from_value(json!({
            "type": "resource",
            "resource": {"uri": "file:///a.txt", "text": "contents of a"}
        }));
        assert_eq!(render_item(&item), "contents of a");
    }

    #[test]
    fn test_resource_without_text_dumps_json() {
        let item = ContentItem::from_value(json!({
            "type": "resource",
            "resource": {"uri": "file:///bin", "blob": "AAEC"}
        }));
        let rendered = render_item(&item);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({"uri": "file:///bin", "blob": "AAEC"}));
    }

    #[test]
    fn test_resource_link_summary() {
        let item = ContentItem::from_value(json!({
            "type": "resource_link",
            "uri": "file:///data/notes.txt",
            "name": "notes.txt",
            "description": "file",
            "mimeType": "text/plain"
        }));
        assert_eq!(
            render_item(&item),
            "notes.txt - file - text/plain (file:///data/notes.txt)"
        );
    }

    #[test]
    fn test_resource_link_partial_fields() {
        let only_name = ContentItem::ResourceLink(ResourceLink {
            uri: Some("file:///d".to_string()),
            name: Some("d".to_string()),
            ..ResourceLink::default()
        });
        assert_eq!(render_item(&only_name), "d (file:///d)");

        let only_uri = ContentItem::ResourceLink(ResourceLink {
            uri: Some("file:///x".to_string()),
            ..ResourceLink::default()
        });
        assert_eq!(render_item(&only_uri), "(file:///x)");
    }

    #[test]
    fn test_unknown_item_kind_dumps_json() {
        let raw = json!({"type": "image", "data": "iVBOR", "mimeType": "image/png"});
        let item = ContentItem::from_value(raw.clone());
        assert!(matches!(item, ContentItem::Unknown(_)));
        let parsed: Value = serde_json::from_str(&render_item(&item)).unwrap();
        assert_eq!(parsed, raw);
    }

    #[test]
    fn test_malformed_shapes_never_fail() {
        let shapes = vec![
            json!(null),
            json!(42),
            json!([1, "two", {"type": 3}]),
            json!({"type": "text"}),
            json!({"result": {"content": {"nested": {"deep": true}}}}),
            json!({"result": 7}),
            json!({"something": "else"}),
        ];
        for shape in shapes {
            let env = Envelope::from_value(shape);
            let _ = render_envelope(&env);
        }
    }

    #[test]
    fn test_mixed_items() {
        let env = Envelope::from_value(json!({
            "result": {"content": [
                {"type": "text", "text": "a"},
                {"kind": "mystery"},
                {"type": "resource_link", "name": "b", "uri": "file:///b"}
            ]}
        }));
        assert_eq!(
            render_envelope(&env).text,
            "a\n{\"kind\":\"mystery\"}\nb (file:///b)"
        );
    }

    #[test]
    fn test_exception_envelope() {
        let env = Envelope::from_value(json!({
            "validationException": {"message": "bad arguments"}
        }));
        match &env {
            Envelope::Error(err) => {
                assert_eq!(err.kind.as_deref(), Some("validationException"));
            }
            Envelope::Result(_) => panic!("expected error envelope"),
        }
        assert_eq!(render_envelope(&env), ToolOutput::failure("bad arguments"));
    }

    #[test]
    fn test_error_without_message_uses_fallback() {
        let env = Envelope::from_value(json!({"error": {}}));
        assert_eq!(render_envelope(&env), ToolOutput::failure(UNKNOWN_ERROR));
    }

    #[test]
    fn test_unrecognized_object_dumps_whole() {
        let env = Envelope::from_value(json!({"weird": [1, 2]}));
        assert_eq!(render_envelope(&env).text, "{\"weird\":[1,2]}");
    }

    #[tokio::test]
    async fn test_stream_last_event_wins() {
        let events = vec![
            Ok(Envelope::text("first")),
            Ok(Envelope::text("second")),
            Ok(Envelope::from_value(json!({"error": {"message": "boom"}}))),
        ];
        let out = collect_stream(stream::iter(events)).await.unwrap();
        assert_eq!(out, ToolOutput::failure("boom"));
    }

    #[tokio::test]
    async fn test_stream_empty_results_keep_earlier_output() {
        let events = vec![
            Ok(Envelope::text("real output")),
            Ok(Envelope::Result(ToolResult::from_value(Value::Null))),
            Ok(Envelope::from_value(json!({"content": []}))),
            Ok(Envelope::from_value(json!({"content": ""}))),
        ];
        let out = collect_stream(stream::iter(events)).await.unwrap();
        assert_eq!(out, ToolOutput::success("real output"));
    }

    #[tokio::test]
    async fn test_stream_error_after_output_still_wins() {
        let events = vec![
            Ok(Envelope::text("real output")),
            Ok(Envelope::from_value(json!({"content": []}))),
            Ok(Envelope::from_value(json!({"error": {}}))),
        ];
        let out = collect_stream(stream::iter(events)).await.unwrap();
        assert_eq!(out, ToolOutput::failure(UNKNOWN_ERROR));
    }

    #[test]
    fn test_content_is_empty() {
        assert!(Content::Text(String::new()).is_empty());
        assert!(Content::Items(Vec::new()).is_empty());
        assert!(Content::Other(Value::Null).is_empty());
        assert!(!Content::Text("x".to_string()).is_empty());
        assert!(!Content::Other(json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_stream_later_success_replaces_error() {
        let events = vec![
            Ok(Envelope::error_text("partial failure")),
            Ok(Envelope::text("recovered")),
        ];
        let out = collect_stream(stream::iter(events)).await.unwrap();
        assert_eq!(out, ToolOutput::success("recovered"));
    }

    #[tokio::test]
    async fn test_empty_stream_is_empty_output() {
        let out = collect_stream(stream::iter(Vec::<Result<Envelope>>::new()))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::default());
    }

    #[tokio::test]
    async fn test_stream_transport_error_propagates() {
        let events = vec![
            Ok(Envelope::text("first")),
            Err(SandboxError::transport("connection reset")),
        ];
        let err = collect_stream(stream::iter(events)).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_from_error_prefix() {
        let out = ToolOutput::from_error(&SandboxError::transport("dns"));
        assert!(out.is_error);
        assert_eq!(out.text, "Error: Transport failure: dns");
        assert_eq!(String::from(out), "Error: Transport failure: dns");
    }
}
