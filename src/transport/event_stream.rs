//! Decoder for the binary event-stream framing used by streamed invoke
//! responses.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! total_len:u32 | headers_len:u32 | prelude_crc:u32 | headers | payload | message_crc:u32
//! ```
//!
//! Headers are `name_len:u8 | name | type:u8 | value`. Only string-typed
//! headers are kept; the rest are skipped. CRCs are not verified since TLS
//! already protects the body.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::normalize::{Envelope, RemoteError, ToolResult};

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;

/// Incremental frame decoder; feed it body chunks as they arrive.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

#[derive(Debug)]
struct Frame {
    headers: HashMap<String, String>,
    payload: Bytes,
}

impl EventStreamDecoder {
    /// Appends a chunk and returns every envelope completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Envelope>> {
        self.buffer.extend_from_slice(chunk);
        let mut envelopes = Vec::new();
        while let Some(frame) = self.next_frame()? {
            if let Some(envelope) = frame.into_envelope()? {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    /// True when bytes of an incomplete frame are buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;
        if total_len < MIN_FRAME_LEN || headers_len + MIN_FRAME_LEN > total_len {
            return Err(SandboxError::protocol(format!(
                "malformed event-stream prelude (total {total_len}, headers {headers_len})"
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len).freeze();
        frame.advance(PRELUDE_LEN);
        let mut header_bytes = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - MIN_FRAME_LEN - headers_len);

        Ok(Some(Frame {
            headers: parse_headers(&mut header_bytes)?,
            payload,
        }))
    }
}

impl Frame {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn json_payload(&self) -> Result<serde_json::Value> {
        if self.payload.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    fn into_envelope(self) -> Result<Option<Envelope>> {
        match self.header(":message-type") {
            Some("event") => match self.header(":event-type") {
                Some("result") if self.payload.is_empty() => {
                    debug!("Skipping empty result event");
                    Ok(None)
                }
                Some("result") => Ok(Some(Envelope::Result(ToolResult::from_value(
                    self.json_payload()?,
                )))),
                other => {
                    debug!("Skipping event-stream event {:?}", other);
                    Ok(None)
                }
            },
            Some("exception") => {
                let payload = self.json_payload()?;
                let message = payload
                    .get("message")
                    .or_else(|| payload.get("Message"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);
                Ok(Some(Envelope::Error(RemoteError {
                    kind: self.header(":exception-type").map(str::to_string),
                    message,
                })))
            }
            Some("error") => Ok(Some(Envelope::Error(RemoteError {
                kind: self.header(":error-code").map(str::to_string),
                message: self.header(":error-message").map(str::to_string),
            }))),
            other => Err(SandboxError::protocol(format!(
                "unknown event-stream message type {other:?}"
            ))),
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take(buf: &mut Bytes, n: usize) -> Result<Bytes> {
    if buf.remaining() < n {
        return Err(SandboxError::protocol("truncated event-stream header"));
    }
    Ok(buf.split_to(n))
}

fn take_u8(buf: &mut Bytes) -> Result<u8> {
    Ok(take(buf, 1)?[0])
}

fn take_u16(buf: &mut Bytes) -> Result<usize> {
    let bytes = take(buf, 2)?;
    Ok(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

fn parse_headers(buf: &mut Bytes) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    while buf.has_remaining() {
        let name_len = usize::from(take_u8(buf)?);
        let name = String::from_utf8_lossy(&take(buf, name_len)?).into_owned();
        let kind = take_u8(buf)?;
        match kind {
            // bool true / bool false carry no value bytes
            0 | 1 => {}
            2 => {
                take(buf, 1)?;
            }
            3 => {
                take(buf, 2)?;
            }
            4 => {
                take(buf, 4)?;
            }
            5 | 8 => {
                take(buf, 8)?;
            }
            6 => {
                let len = take_u16(buf)?;
                take(buf, len)?;
            }
            7 => {
                let len = take_u16(buf)?;
                let value = String::from_utf8_lossy(&take(buf, len)?).into_owned();
                headers.insert(name, value);
            }
            9 => {
                take(buf, 16)?;
            }
            other => {
                return Err(SandboxError::protocol(format!(
                    "unknown event-stream header type {other}"
                )))
            }
        }
    }
    Ok(headers)
}
