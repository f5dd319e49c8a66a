//! Stream accumulator: folds SSE frames into one assistant message.
//!
//! [`StreamAccumulator`] is the pure state machine. [`run_stream_session`]
//! drives it against a transport stream and writes every resulting patch
//! back to the store by message id.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientError, Transport};
use crate::model::MessagePatch;
use crate::sse::{sse_frames, SseEventType, SseFrame};
use crate::store::SharedStore;

const STREAM_ERROR_PREFIX: &str = "❌";
const DEFAULT_STREAM_ERROR: &str = "Có lỗi xảy ra trong streaming";
const LOAD_FAILED_PREFIX: &str = "❌ Lỗi tải chi tiết:";

/// Lifecycle of one streaming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frame processed yet.
    Idle,
    Active,
    Complete,
    Failed,
    /// Stopped by cancellation before a terminal frame.
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamState::Idle | StreamState::Active)
    }
}

/// State machine for one message's stream. Terminal states absorb every
/// later frame.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    message_id: String,
    state: StreamState,
}

impl StreamAccumulator {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            state: StreamState::Idle,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Patch applied before the stream request goes out: the placeholder text
    /// is cleared and the message is flagged as streaming.
    pub fn begin(&self) -> MessagePatch {
        MessagePatch::replace("").with_streaming(true)
    }

    /// Fold one frame into the message.
    pub fn apply(&mut self, frame: &SseFrame) -> Option<MessagePatch> {
        if self.is_terminal() {
            debug!("Ignoring {:?} frame for finished message {}", frame.event, self.message_id);
            return None;
        }
        self.state = StreamState::Active;

        match frame.event {
            SseEventType::Start => {
                debug!("Stream started for message {}", self.message_id);
                None
            }
            SseEventType::Chunk => {
                let delta = frame.data.get("delta").and_then(|d| d.as_str())?;
                Some(MessagePatch::append(delta))
            }
            SseEventType::Metadata => {
                debug!("Stream metadata for message {}: {}", self.message_id, frame.data);
                None
            }
            SseEventType::End => {
                self.state = StreamState::Complete;
                Some(MessagePatch::streaming(false))
            }
            SseEventType::Error => {
                self.state = StreamState::Failed;
                let error = frame
                    .data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .filter(|e| !e.is_empty())
                    .unwrap_or(DEFAULT_STREAM_ERROR);
                warn!("Stream error frame for message {}: {}", self.message_id, error);
                Some(
                    MessagePatch::replace(format!("{} {}", STREAM_ERROR_PREFIX, error))
                        .with_streaming(false),
                )
            }
            SseEventType::Unknown => {
                debug!("Ignoring unknown SSE event with data {}", frame.data);
                None
            }
        }
    }

    /// The byte stream ended. Without a terminal frame the message is
    /// considered complete.
    pub fn finish(&mut self) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }
        self.state = StreamState::Complete;
        Some(MessagePatch::streaming(false))
    }

    /// The transport failed before or during the stream.
    pub fn fail(&mut self, error: &ClientError) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }
        self.state = StreamState::Failed;
        Some(
            MessagePatch::replace(format!("{} {}", LOAD_FAILED_PREFIX, error))
                .with_streaming(false),
        )
    }

    /// The session was cancelled. Accumulated text is kept.
    pub fn cancel(&mut self) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }
        self.state = StreamState::Cancelled;
        Some(MessagePatch::streaming(false))
    }
}

/// Message a stream session writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub conversation_id: String,
    pub message_id: String,
    pub endpoint: String,
}

enum Next {
    Cancelled,
    Frame(Option<Result<SseFrame, ClientError>>),
}

/// Write a patch to the target message. `false` means the message no longer
/// exists and the session should stop.
fn write(store: &SharedStore, target: &StreamTarget, patch: &MessagePatch) -> bool {
    match store
        .lock()
        .update_message_by_id(&target.conversation_id, &target.message_id, patch)
    {
        Ok(()) => true,
        Err(e) => {
            debug!("Stopping stream for {}: {}", target.endpoint, e);
            false
        }
    }
}

/// Stream `target.endpoint` into the target message until a terminal frame,
/// end of input, a transport error, or cancellation.
pub async fn run_stream_session<T: Transport + ?Sized>(
    transport: Arc<T>,
    store: SharedStore,
    target: StreamTarget,
    frame_delay: Duration,
    cancel: CancellationToken,
) -> StreamState {
    let mut accumulator = StreamAccumulator::new(target.message_id.clone());
    if !write(&store, &target, &accumulator.begin()) {
        accumulator.cancel();
        return accumulator.state();
    }

    info!("Starting stream from {}", target.endpoint);

    let bytes = tokio::select! {
        _ = cancel.cancelled() => Err(ClientError::StreamCancelled),
        result = transport.get_stream(&target.endpoint) => result,
    };

    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(ClientError::StreamCancelled) => {
            if let Some(patch) = accumulator.cancel() {
                write(&store, &target, &patch);
            }
            return accumulator.state();
        }
        Err(e) => {
            warn!("Stream request to {} failed: {}", target.endpoint, e);
            if let Some(patch) = accumulator.fail(&e) {
                write(&store, &target, &patch);
            }
            return accumulator.state();
        }
    };

    let frames = sse_frames(bytes);
    futures::pin_mut!(frames);
    let mut applied = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Cancelled,
            frame = frames.next() => Next::Frame(frame),
        };

        match next {
            Next::Cancelled => {
                debug!("Stream from {} cancelled", target.endpoint);
                if let Some(patch) = accumulator.cancel() {
                    write(&store, &target, &patch);
                }
                break;
            }
            Next::Frame(None) => {
                if let Some(patch) = accumulator.finish() {
                    write(&store, &target, &patch);
                }
                break;
            }
            Next::Frame(Some(Err(e))) => {
                warn!("Stream from {} failed mid-way: {}", target.endpoint, e);
                if let Some(patch) = accumulator.fail(&e) {
                    write(&store, &target, &patch);
                }
                break;
            }
            Next::Frame(Some(Ok(frame))) => {
                if let Some(patch) = accumulator.apply(&frame) {
                    if !write(&store, &target, &patch) {
                        accumulator.cancel();
                        break;
                    }
                    applied += 1;
                }
                if accumulator.is_terminal() {
                    break;
                }
                if !frame_delay.is_zero() {
                    tokio::time::sleep(frame_delay).await;
                }
            }
        }
    }

    info!(
        "Stream from {} finished as {:?} after {} updates",
        target.endpoint,
        accumulator.state(),
        applied
    );
    accumulator.state()
}
