//! Incremental decoding of run-stream response bodies
//!
//! The backend answers a run with a chunked body of newline-delimited lines.
//! Lines of the form `data: {json}` carry payloads, `data: [DONE]` ends the
//! run, and everything else (comments, keep-alives, blank separators) is
//! ignored. Chunk boundaries are arbitrary: a line or a multi-byte character
//! may be split across any number of chunks.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::conversation::{MessageId, Role, Update};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Turns byte chunks into complete text lines.
///
/// Bytes of a UTF-8 sequence that is cut off at the end of a chunk are held
/// back until the next chunk completes them. Sequences that can never be
/// valid decode to U+FFFD.
#[derive(Debug, Default)]
pub struct LineDecoder {
    undecoded: Vec<u8>,
    buffer: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed (without the `\n`)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.undecoded.extend_from_slice(chunk);
        self.decode_available();

        if !self.buffer.contains('\n') {
            return Vec::new();
        }

        let mut lines: Vec<String> = self.buffer.split('\n').map(str::to_string).collect();
        self.buffer = lines.pop().unwrap_or_default();
        lines
    }

    /// Text received after the last newline
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn decode_available(&mut self) {
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.undecoded.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + len);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes
                            self.undecoded.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// An actionable line
#[derive(Debug)]
pub enum Frame {
    Done,
    Payload(Value),
    Malformed {
        data: String,
        error: serde_json::Error,
    },
}

/// Parse one line. Returns `None` for lines that carry no data.
pub fn parse_line(line: &str) -> Option<Frame> {
    let data = line.strip_prefix(DATA_PREFIX)?.trim();

    if data == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    Some(match serde_json::from_str(data) {
        Ok(value) => Frame::Payload(value),
        Err(error) => Frame::Malformed {
            data: data.to_string(),
            error,
        },
    })
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// Map a parsed payload onto a store update. Unrecognised payloads yield `None`.
pub fn classify(value: Value) -> Option<Update> {
    let payload: RawPayload = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Ignoring non-object payload: {}", e);
            return None;
        }
    };

    match payload.kind.as_deref() {
        Some("assistant") => Some(Update::Assistant {
            id: message_id(&payload.id),
            content: content_text(&payload.content),
        }),
        Some("human") => Some(Update::Append {
            role: Role::Human,
            content: content_text(&payload.content),
        }),
        Some("error") => Some(Update::Append {
            role: Role::Error,
            content: content_text(&payload.content),
        }),
        None if payload.error.is_some() => Some(Update::Append {
            role: Role::Error,
            content: payload.error.as_ref().map(content_text).unwrap_or_default(),
        }),
        other => {
            tracing::debug!("Ignoring payload of type {:?}", other);
            None
        }
    }
}

/// Flatten message content: plain strings, or lists of `{"type":"text"}` blocks
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                Value::String(s) => Some(s.as_str()),
                Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("text") => {
                    map.get("text").and_then(Value::as_str)
                }
                _ => None,
            })
            .collect(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn message_id(id: &Value) -> Option<MessageId> {
    match id {
        Value::Number(n) => n.as_u64().map(MessageId),
        Value::String(s) => s.trim().parse().ok().map(MessageId),
        _ => None,
    }
}

/// Decode a chunked body into store updates, in receipt order.
///
/// The stream ends after `[DONE]` (anything after it is never read), when the
/// body is exhausted, or right after yielding a transport error.
pub fn updates<S, B, E>(chunks: S) -> impl Stream<Item = Result<Update, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    stream! {
        let mut decoder = LineDecoder::new();
        futures::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for line in decoder.push(chunk.as_ref()) {
                match parse_line(&line) {
                    None => {}
                    Some(Frame::Done) => {
                        tracing::debug!("Run stream finished with {}", DONE_SENTINEL);
                        return;
                    }
                    Some(Frame::Malformed { data, error }) => {
                        tracing::warn!("Skipping malformed payload: {} - Line: {}", error, data);
                    }
                    Some(Frame::Payload(value)) => {
                        if let Some(update) = classify(value) {
                            yield Ok(update);
                        }
                    }
                }
            }
        }

        if !decoder.pending().is_empty() {
            tracing::debug!("Discarding unterminated line: {:?}", decoder.pending());
        }
    }
}
