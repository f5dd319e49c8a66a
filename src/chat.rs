//! Chat turn controller.
//!
//! A turn records the user's message, posts it to the chat endpoint, records
//! the assistant reply and, when the reply asks for it, starts a detail
//! stream into that reply. The stream runs as its own task; `send_turn`
//! returns once the reply has been recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, Transport};
use crate::model::{ChatRequest, ChatResponse, Message};
use crate::options::ChatOptions;
use crate::procedures::detail_prompt;
use crate::store::{SharedStore, StoreError};
use crate::stream::{run_stream_session, StreamState, StreamTarget};
use crate::title::derive_title;

/// Assistant reply recorded when the chat request fails.
pub const FALLBACK_REPLY: &str =
    "Xin lỗi, tôi không thể xử lý yêu cầu của bạn lúc này. Vui lòng thử lại sau.";

/// Result of a turn whose synchronous leg succeeded.
#[derive(Debug)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    /// Detail stream started for the assistant message, if the reply asked for one.
    pub stream: Option<StreamHandle>,
}

/// Handle to a running stream session.
#[derive(Debug)]
pub struct StreamHandle {
    pub conversation_id: String,
    pub message_id: String,
    cancel: CancellationToken,
    task: JoinHandle<StreamState>,
}

impl StreamHandle {
    /// Ask the session to stop. Text received so far is kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end and return its final state.
    pub async fn wait(self) -> StreamState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("Stream task for message {} aborted: {}", self.message_id, e);
                StreamState::Failed
            }
        }
    }
}

#[derive(Debug, Default)]
struct TurnState {
    pending_requests: usize,
    last_error: Option<String>,
}

/// Decrements the pending request count even if the turn future is dropped.
struct PendingGuard<'a>(&'a Mutex<TurnState>);

impl<'a> PendingGuard<'a> {
    fn new(state: &'a Mutex<TurnState>) -> Self {
        let mut guard = state.lock();
        guard.pending_requests += 1;
        guard.last_error = None;
        drop(guard);
        Self(state)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.pending_requests = state.pending_requests.saturating_sub(1);
    }
}

type Sessions = Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>;

/// Drives chat turns against a transport and a conversation store.
///
/// # Example
/// ```ignore
/// let store = ConversationStore::new(StoreOptions::default()).into_shared();
/// let controller = ChatController::new(ApiClient::new(transport_options)?, store, ChatOptions::default());
///
/// if let Some(outcome) = controller.send_turn("Đăng ký doanh nghiệp").await? {
///     if let Some(stream) = outcome.stream {
///         stream.wait().await;
///     }
/// }
/// ```
pub struct ChatController<T: Transport + 'static> {
    transport: Arc<T>,
    store: SharedStore,
    options: ChatOptions,
    state: Mutex<TurnState>,
    sessions: Sessions,
    next_session: AtomicU64,
    shutdown: CancellationToken,
}

impl<T: Transport + 'static> ChatController<T> {
    pub fn new(transport: T, store: SharedStore, options: ChatOptions) -> Self {
        Self::with_transport(Arc::new(transport), store, options)
    }

    pub fn with_transport(transport: Arc<T>, store: SharedStore, options: ChatOptions) -> Self {
        Self {
            transport,
            store,
            options,
            state: Mutex::new(TurnState::default()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Whether a chat request is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.lock().pending_requests > 0
    }

    /// Number of stream sessions still running.
    pub fn active_streams(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Error text from the last failed request, until dismissed or the next turn.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn dismiss_error(&self) {
        self.state.lock().last_error = None;
    }

    /// Send one user turn.
    ///
    /// Blank text is ignored and returns `Ok(None)`. On a failed request the
    /// conversation gets [`FALLBACK_REPLY`], [`Self::last_error`] is set, and
    /// the error is returned.
    pub async fn send_turn(&self, text: &str) -> Result<Option<TurnOutcome>, ClientError> {
        self.send(text, None).await
    }

    /// Ask for the details of a procedure picked from a result list.
    pub async fn send_procedure_turn(
        &self,
        procedure_name: &str,
    ) -> Result<Option<TurnOutcome>, ClientError> {
        self.send(&detail_prompt(procedure_name), Some(procedure_name))
            .await
    }

    async fn send(
        &self,
        text: &str,
        procedure_name: Option<&str>,
    ) -> Result<Option<TurnOutcome>, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring empty message");
            return Ok(None);
        }
        if let Some(max) = self.options.max_message_chars {
            if text.chars().count() > max {
                return Err(ClientError::InvalidInput(format!(
                    "Tin nhắn quá dài (tối đa {} ký tự)",
                    max
                )));
            }
        }

        let (conversation_id, user_message_id) = self.record_user_message(text, procedure_name)?;
        let pending = PendingGuard::new(&self.state);

        info!("Sending message to {}", self.options.endpoints.chat);
        let result = self.request_reply(text).await;
        drop(pending);

        match result {
            Ok(response) => {
                let endpoint = response.stream_directive().map(str::to_string);
                debug!(
                    "Reply intent {:?}, stream endpoint {:?}",
                    response.intent_type, endpoint
                );

                let message = Message::from(response);
                let assistant_message_id = message.id.clone();
                self.store.lock().append_message(&conversation_id, message)?;

                let stream = endpoint.map(|endpoint| {
                    self.start_stream(StreamTarget {
                        conversation_id: conversation_id.clone(),
                        message_id: assistant_message_id.clone(),
                        endpoint,
                    })
                });

                Ok(Some(TurnOutcome {
                    conversation_id,
                    user_message_id,
                    assistant_message_id,
                    stream,
                }))
            }
            Err(e) => {
                error!("Chat request failed: {}", e);
                self.state.lock().last_error = Some(e.user_message());

                if let Err(store_err) = self
                    .store
                    .lock()
                    .append_message(&conversation_id, Message::assistant(FALLBACK_REPLY))
                {
                    warn!("Could not record fallback reply: {}", store_err);
                }
                Err(e)
            }
        }
    }

    /// Select or create the conversation and append the user message.
    fn record_user_message(
        &self,
        text: &str,
        procedure_name: Option<&str>,
    ) -> Result<(String, String), StoreError> {
        let mut store = self.store.lock();
        let conversation_id = match store.current_id() {
            Some(id) => id.to_string(),
            None => store.create_conversation(Some(derive_title(text))),
        };
        let evicted = store.take_evicted();

        let mut message = Message::user(text);
        if let Some(name) = procedure_name {
            message = message.with_procedure_name(name);
        }
        let message_id = message.id.clone();
        let appended = store.append_message(&conversation_id, message);
        drop(store);

        self.cancel_sessions(&evicted);
        appended?;
        Ok((conversation_id, message_id))
    }

    /// Stop the sessions of conversations that no longer exist.
    fn cancel_sessions(&self, conversation_ids: &[String]) {
        let mut sessions = self.sessions.lock();
        for id in conversation_ids {
            if let Some((_, token)) = sessions.remove(id) {
                debug!("Cancelling stream of dropped conversation {}", id);
                token.cancel();
            }
        }
    }

    async fn request_reply(&self, text: &str) -> Result<ChatResponse, ClientError> {
        let body = serde_json::to_value(ChatRequest { message: text })?;
        let value = self
            .transport
            .post(&self.options.endpoints.chat, body)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Spawn a stream session. A session already running in the same
    /// conversation is cancelled first.
    fn start_stream(&self, target: StreamTarget) -> StreamHandle {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        let previous = self
            .sessions
            .lock()
            .insert(target.conversation_id.clone(), (session_id, cancel.clone()));
        if let Some((_, previous)) = previous {
            debug!("Cancelling previous stream in {}", target.conversation_id);
            previous.cancel();
        }

        let conversation_id = target.conversation_id.clone();
        let message_id = target.message_id.clone();
        let transport = self.transport.clone();
        let store = self.store.clone();
        let sessions = self.sessions.clone();
        let frame_delay = self.options.frame_delay;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let conversation_id = target.conversation_id.clone();
            let state = run_stream_session(transport, store, target, frame_delay, token).await;

            let mut sessions = sessions.lock();
            if sessions
                .get(&conversation_id)
                .is_some_and(|(id, _)| *id == session_id)
            {
                sessions.remove(&conversation_id);
            }
            state
        });

        StreamHandle {
            conversation_id,
            message_id,
            cancel,
            task,
        }
    }

    /// Make an existing conversation current. Streams keep running.
    pub fn select_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.store.lock().select(id)
    }

    /// Drop the selection so the next turn starts a new conversation.
    pub fn start_new_conversation(&self) {
        self.store.lock().clear_selection();
    }

    /// Delete a conversation and stop its stream.
    pub fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.cancel_sessions(&[id.to_string()]);
        self.store.lock().delete(id).map(|_| ())
    }

    /// Delete every conversation and stop every stream.
    pub fn clear_all(&self) {
        for (_, (_, token)) in self.sessions.lock().drain() {
            token.cancel();
        }
        self.store.lock().clear_all();
    }

    /// Cancel every running stream.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Probe the health endpoint once.
    pub async fn check_health(&self) -> Result<Value, ClientError> {
        match self.transport.get(&self.options.endpoints.health).await {
            Ok(value) => {
                info!("API health check passed");
                Ok(value)
            }
            Err(e) => {
                error!("API health check failed: {}", e);
                self.state.lock().last_error = Some(e.user_message());
                Err(e)
            }
        }
    }
}

impl<T: Transport + 'static> Drop for ChatController<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use parking_lot::Mutex;
    use serde_json::Value;

    use crate::client::{ByteStream, ClientError, Transport};

    /// Recorded request.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Post(String, Value),
        Get(String),
        Stream(String),
    }

    /// In-memory transport replaying queued replies.
    #[derive(Default)]
    pub struct MockTransport {
        pub calls: Mutex<Vec<Call>>,
        posts: Mutex<VecDeque<Result<Value, ClientError>>>,
        gets: Mutex<VecDeque<Result<Value, ClientError>>>,
        streams: Mutex<VecDeque<Result<Vec<Result<Bytes, ClientError>>, ClientError>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, value: Result<Value, ClientError>) -> Self {
            self.posts.lock().push_back(value);
            self
        }

        pub fn health(self, value: Result<Value, ClientError>) -> Self {
            self.gets.lock().push_back(value);
            self
        }

        /// Queue an SSE body delivered as the given text pieces.
        pub fn stream_text(self, pieces: &[&str]) -> Self {
            let chunks = pieces
                .iter()
                .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
                .collect();
            self.streams.lock().push_back(Ok(chunks));
            self
        }

        pub fn stream_chunks(self, chunks: Vec<Result<Bytes, ClientError>>) -> Self {
            self.streams.lock().push_back(Ok(chunks));
            self
        }

        pub fn stream_error(self, error: ClientError) -> Self {
            self.streams.lock().push_back(Err(error));
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
            self.calls.lock().push(Call::Post(path.to_string(), body));
            self.posts
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Config("no reply queued".to_string())))
        }

        async fn get(&self, path: &str) -> Result<Value, ClientError> {
            self.calls.lock().push(Call::Get(path.to_string()));
            self.gets
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Config("no reply queued".to_string())))
        }

        async fn get_stream(&self, path: &str) -> Result<ByteStream, ClientError> {
            self.calls.lock().push(Call::Stream(path.to_string()));
            let chunks = self
                .streams
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Config("no stream queued".to_string())))?;
            Ok(stream::iter(chunks).boxed())
        }
    }

    /// A stream that never yields, for cancellation tests.
    pub struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn post(&self, _path: &str, _body: Value) -> Result<Value, ClientError> {
            Ok(serde_json::json!({
                "message": "",
                "auto_stream": true,
                "stream_endpoint": "/stalled"
            }))
        }

        async fn get(&self, _path: &str) -> Result<Value, ClientError> {
            Ok(Value::Null)
        }

        async fn get_stream(&self, _path: &str) -> Result<ByteStream, ClientError> {
            let first = stream::iter(vec![Ok(Bytes::from_static(
                b"event: chunk\ndata: {\"delta\": \"A\"}\n\n",
            ))]);
            Ok(first.chain(stream::pending()).boxed())
        }
    }
}
