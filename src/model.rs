//! Conversation data model shared by the store, the turn controller and the
//! stream pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,

    /// Displayed content. While streaming this is the text accumulated so far.
    pub text: String,

    /// Server tag describing how to interpret `data`
    /// (e.g. "search_procedures", "get_details").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<String>,

    /// Structured payload attached to some intents, such as matched procedures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default)]
    pub is_streaming: bool,

    /// Follow-up stream requested by the server for this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_endpoint: Option<String>,

    /// Procedure the user picked from a result list, if the turn came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_name: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            intent_type: None,
            data: None,
            is_streaming: false,
            stream_endpoint: None,
            procedure_name: None,
            created_at: Utc::now(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Tag a user message with the procedure it asks about.
    pub fn with_procedure_name(mut self, name: impl Into<String>) -> Self {
        self.procedure_name = Some(name.into());
        self
    }

    /// Length of the current text in characters. Diagnostics only.
    pub fn accumulated_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Apply a patch produced by the stream pipeline.
    pub fn apply(&mut self, patch: &MessagePatch) {
        match &patch.text {
            Some(TextPatch::Append(delta)) => self.text.push_str(delta),
            Some(TextPatch::Replace(text)) => self.text.clone_from(text),
            None => {}
        }
        if let Some(streaming) = patch.is_streaming {
            self.is_streaming = streaming;
        }
    }
}

impl From<ChatResponse> for Message {
    fn from(response: ChatResponse) -> Self {
        let stream_endpoint = response.stream_directive().map(str::to_string);
        let mut message = Message::assistant(response.message.unwrap_or_default());
        message.intent_type = response.intent_type;
        message.data = response.data;
        message.stream_endpoint = stream_endpoint;
        message
    }
}

/// Change to a message's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPatch {
    Append(String),
    Replace(String),
}

/// Partial update applied to a message looked up by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub text: Option<TextPatch>,
    pub is_streaming: Option<bool>,
}

impl MessagePatch {
    pub fn append(delta: impl Into<String>) -> Self {
        Self {
            text: Some(TextPatch::Append(delta.into())),
            is_streaming: Some(true),
        }
    }

    pub fn replace(text: impl Into<String>) -> Self {
        Self {
            text: Some(TextPatch::Replace(text.into())),
            is_streaming: None,
        }
    }

    pub fn streaming(is_streaming: bool) -> Self {
        Self {
            text: None,
            is_streaming: Some(is_streaming),
        }
    }

    pub fn with_streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = Some(is_streaming);
        self
    }
}

/// A named, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("chat-{}", Uuid::new_v4().simple()),
            title,
            messages: Vec::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Title shown for this conversation, derived from the first user message
    /// when none was set explicitly.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => crate::title::derive_title(
                self.messages
                    .iter()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.text.as_str())
                    .unwrap_or_default(),
            ),
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The message currently receiving a stream, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming)
    }

    pub(crate) fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

/// Shape of the state a persistence collaborator saves and restores.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub conversations: Vec<Conversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_id: Option<String>,
}

/// Request body of the chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

/// Response body of the chat endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// May be empty or null when the answer arrives through the stream.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub intent_type: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub auto_stream: Option<bool>,
    #[serde(default)]
    pub stream_endpoint: Option<String>,
}

impl ChatResponse {
    /// The endpoint to stream from, when the server asked for auto-streaming.
    pub fn stream_directive(&self) -> Option<&str> {
        match (self.auto_stream, self.stream_endpoint.as_deref()) {
            (Some(true), Some(endpoint)) if !endpoint.is_empty() => Some(endpoint),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_directive_requires_flag_and_endpoint() {
        let response: ChatResponse = serde_json::from_value(json!({
            "message": "",
            "auto_stream": true,
            "stream_endpoint": "/api/v1/procedures/1.001/stream"
        }))
        .unwrap();
        assert_eq!(
            response.stream_directive(),
            Some("/api/v1/procedures/1.001/stream")
        );

        let response: ChatResponse =
            serde_json::from_value(json!({"message": null, "auto_stream": true})).unwrap();
        assert_eq!(response.stream_directive(), None);
        assert_eq!(Message::from(response).text, "");

        let response: ChatResponse = serde_json::from_value(
            json!({"message": "ok", "auto_stream": false, "stream_endpoint": "/x"}),
        )
        .unwrap();
        assert_eq!(response.stream_directive(), None);
    }

    #[test]
    fn test_assistant_message_from_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "message": "Tìm thấy 2 thủ tục",
            "intent_type": "search_procedures",
            "data": {"procedures": [{"ten_thutuc": "Đăng ký khai sinh"}]}
        }))
        .unwrap();

        let message = Message::from(response);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text, "Tìm thấy 2 thủ tục");
        assert_eq!(message.intent_type.as_deref(), Some("search_procedures"));
        assert!(message.data.is_some());
        assert!(message.stream_endpoint.is_none());
        assert!(!message.is_streaming);
    }

    #[test]
    fn test_apply_patches() {
        let mut message = Message::assistant("");
        message.apply(&MessagePatch::append("Xin "));
        message.apply(&MessagePatch::append("chào"));
        assert_eq!(message.text, "Xin chào");
        assert!(message.is_streaming);
        assert_eq!(message.accumulated_len(), 8);

        message.apply(&MessagePatch::replace("❌ lỗi").with_streaming(false));
        assert_eq!(message.text, "❌ lỗi");
        assert!(!message.is_streaming);
    }

    #[test]
    fn test_display_title_falls_back_to_first_user_message() {
        let mut conversation = Conversation::new(None);
        conversation.messages.push(Message::assistant("Xin chào"));
        conversation.messages.push(Message::user("Hỏi gì?"));
        assert_eq!(conversation.display_title(), "Hỏi gì");

        let titled = Conversation::new(Some("Thuế".to_string()));
        assert_eq!(titled.display_title(), "Thuế");
    }

    #[test]
    fn test_persisted_state_serializes_roles_lowercase() {
        let mut conversation = Conversation::new(Some("t".to_string()));
        conversation.messages.push(Message::user("a"));
        let state = PersistedState {
            current_id: Some(conversation.id.clone()),
            conversations: vec![conversation],
        };

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["conversations"][0]["messages"][0]["role"], "user");

        let restored: PersistedState = serde_json::from_value(value).unwrap();
        assert_eq!(restored, state);
    }
}
