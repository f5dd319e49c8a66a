//! # tthc-chat - administrative procedures chat client
//!
//! Client core for a chat assistant that answers questions about
//! administrative procedures ("thủ tục hành chính") through a remote HTTP API.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Chat turns with optional auto-streamed detail answers
//! - Restartable Server-Sent Events frame parsing
//! - Conversation store with a persistence hook and configurable history
//! - Transport trait with a reqwest implementation
//!
//! ## Architecture
//!
//! - **`sse`**: splits a text buffer into event blocks and parses them into frames
//! - **`stream`**: the per-message accumulator state machine and the session
//!   that drives it from a byte stream
//! - **`chat`**: the turn controller
//! - **`store`**: conversations, the current selection and the change hook
//! - **`client`** / **`http`**: the transport contract and its HTTP implementation
//!
//! ## Example
//! ```no_run
//! use tthc_chat::chat::ChatController;
//! use tthc_chat::http::ApiClient;
//! use tthc_chat::options::{ChatOptions, HttpTransport, StoreOptions, TransportOptions};
//! use tthc_chat::store::ConversationStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = ApiClient::new(TransportOptions::new(HttpTransport::new("your-api-key")))?;
//!     let store = ConversationStore::new(StoreOptions::default()).into_shared();
//!     let controller = ChatController::new(transport, store, ChatOptions::default());
//!
//!     if let Some(outcome) = controller.send_turn("Đăng ký doanh nghiệp").await? {
//!         if let Some(stream) = outcome.stream {
//!             stream.wait().await;
//!         }
//!         let store = controller.store().lock();
//!         let reply = store
//!             .get(&outcome.conversation_id)
//!             .and_then(|c| c.message(&outcome.assistant_message_id));
//!         println!("{:?}", reply.map(|m| &m.text));
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client;
pub mod http;
pub mod logging;
pub mod model;
pub mod options;
pub mod procedures;
pub mod sse;
pub mod store;
pub mod stream;
pub mod title;

// Re-exports for convenience
pub use chat::{ChatController, StreamHandle, TurnOutcome};
pub use client::{ClientError, Transport};
pub use model::{Conversation, Message, Role};
pub use store::{ConversationStore, SharedStore};
pub use stream::{StreamAccumulator, StreamState};
