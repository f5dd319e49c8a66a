//! Server-Sent Events (SSE) frame parsing.
//!
//! The detail stream sends blocks of `event:`/`data:` lines separated by a
//! blank line:
//! ```text
//! event: chunk
//! data: {"delta": "Xin "}
//!
//! event: end
//! data: {}
//! ```
//!
//! Parsing is split into a pure, restartable buffer splitter
//! ([`parse_buffer`]), a block parser ([`parse_block`]) and a stream adapter
//! ([`sse_frames`]) that drives both from a transport byte stream.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use itertools::Itertools;
use serde_json::Value;
use tracing::debug;

use crate::client::{ByteStream, ClientError};

const BLOCK_DELIMITER: &str = "\n\n";

/// Event names understood by the stream accumulator.
///
/// The server may send plain names (`chunk`) or qualified enum-style names
/// (`StreamEventType.CHUNK`); both normalize to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseEventType {
    Start,
    Chunk,
    Metadata,
    End,
    Error,
    Unknown,
}

impl SseEventType {
    /// Normalize a raw `event:` value.
    ///
    /// # Example
    /// ```
    /// use tthc_chat::sse::SseEventType;
    ///
    /// assert_eq!(SseEventType::normalize(Some("chunk")), SseEventType::Chunk);
    /// assert_eq!(SseEventType::normalize(Some("StreamEventType.END")), SseEventType::End);
    /// assert_eq!(SseEventType::normalize(None), SseEventType::Unknown);
    /// ```
    pub fn normalize(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return SseEventType::Unknown;
        };
        let name = name.trim();
        let name = name.rsplit('.').next().unwrap_or(name);

        match name.to_ascii_lowercase().as_str() {
            "start" => SseEventType::Start,
            "chunk" => SseEventType::Chunk,
            "metadata" => SseEventType::Metadata,
            "end" => SseEventType::End,
            "error" => SseEventType::Error,
            _ => SseEventType::Unknown,
        }
    }
}

/// One parsed event block.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: SseEventType,
    pub data: Value,
}

/// Complete blocks split off a buffer, plus the unfinished tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBuffer {
    pub blocks: Vec<String>,

    /// Must be prefixed to the next chunk read from the transport.
    pub remainder: String,
}

/// Split a text buffer into complete event blocks and a remainder.
///
/// Restartable: feeding input piecewise, with the remainder carried into the
/// next call, yields the same blocks as parsing everything at once.
///
/// # Example
/// ```
/// use tthc_chat::sse::parse_buffer;
///
/// let parsed = parse_buffer("event: start\ndata: {}\n\nevent: chunk\ndata: {\"de");
/// assert_eq!(parsed.blocks, vec!["event: start\ndata: {}".to_string()]);
/// assert_eq!(parsed.remainder, "event: chunk\ndata: {\"de");
/// ```
pub fn parse_buffer(buffer: &str) -> ParsedBuffer {
    let normalized;
    let buffer = if buffer.contains('\r') {
        normalized = buffer.replace("\r\n", "\n");
        normalized.as_str()
    } else {
        buffer
    };

    let mut segments = buffer.split(BLOCK_DELIMITER).collect_vec();
    let remainder = segments.pop().unwrap_or_default().to_string();

    let blocks = segments
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    ParsedBuffer { blocks, remainder }
}

/// Parse a single block into a frame.
///
/// Returns `None` for blocks without a `data:` line (or with `data: null`) and
/// for blocks whose data is not valid JSON; those are dropped without
/// affecting later blocks.
pub fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event_type = None;
    let mut data = None;

    for line in block.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event_type = Some(name.trim());
        } else if let Some(payload) = line.strip_prefix("data:") {
            match serde_json::from_str::<Value>(payload.trim()) {
                Ok(value) => data = Some(value),
                Err(e) => {
                    debug!("Dropping SSE block with malformed data: {}", e);
                    return None;
                }
            }
        }
    }

    let Some(data) = data.filter(|value| !value.is_null()) else {
        debug!("Dropping SSE block without data");
        return None;
    };

    Some(SseFrame {
        event: SseEventType::normalize(event_type),
        data,
    })
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two transport chunks is held back
/// until its remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, keeping any incomplete trailing sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

struct FrameReader {
    bytes: ByteStream,
    decoder: Utf8Decoder,
    buffer: String,
    ready: VecDeque<SseFrame>,
    finished: bool,
}

impl FrameReader {
    fn push_text(&mut self, text: &str) {
        self.buffer.push_str(text);
        let parsed = parse_buffer(&self.buffer);
        self.buffer = parsed.remainder;
        self.ready
            .extend(parsed.blocks.iter().filter_map(|block| parse_block(block)));
    }

    fn flush(&mut self) {
        let tail = self.decoder.finish();
        self.push_text(&tail);

        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.ready.extend(parse_block(rest.trim()));
        }
    }
}

/// Turn a transport byte stream into a stream of parsed frames.
///
/// A transport error is yielded once and ends the stream. At end of input the
/// unterminated tail is parsed as a final block.
pub fn sse_frames(bytes: ByteStream) -> impl Stream<Item = Result<SseFrame, ClientError>> + Send {
    let reader = FrameReader {
        bytes,
        decoder: Utf8Decoder::new(),
        buffer: String::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(frame) = reader.ready.pop_front() {
                return Some((Ok(frame), reader));
            }
            if reader.finished {
                return None;
            }

            match reader.bytes.next().await {
                Some(Ok(chunk)) => {
                    let text = reader.decoder.decode(&chunk);
                    reader.push_text(&text);
                }
                Some(Err(e)) => {
                    reader.finished = true;
                    return Some((Err(e), reader));
                }
                None => {
                    reader.finished = true;
                    reader.flush();
                }
            }
        }
    })
}
