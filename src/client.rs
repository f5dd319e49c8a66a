//! Transport trait and error types.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    /// HTTP status of the failed request, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Human-readable text for the error banner.
    pub fn user_message(&self) -> String {
        match self.status() {
            Some(401) => "Không có quyền truy cập. Vui lòng kiểm tra API key.".to_string(),
            Some(403) => "Truy cập bị từ chối.".to_string(),
            Some(404) => "Không tìm thấy dịch vụ.".to_string(),
            Some(429) => "Quá nhiều yêu cầu. Vui lòng thử lại sau.".to_string(),
            Some(500) => "Lỗi server. Vui lòng thử lại sau.".to_string(),
            Some(_) => self
                .server_message()
                .unwrap_or_else(|| "Có lỗi xảy ra khi kết nối đến server.".to_string()),
            None => match self {
                ClientError::Http(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    "Không thể kết nối đến server. Vui lòng kiểm tra kết nối mạng.".to_string()
                }
                other => other.to_string(),
            },
        }
    }

    /// `message` field of a JSON error body.
    fn server_message(&self) -> Option<String> {
        let ClientError::Status { body, .. } = self else {
            return None;
        };
        serde_json::from_str::<Value>(body)
            .ok()?
            .get("message")?
            .as_str()
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }
}

/// Byte stream returned by [`Transport::get_stream`].
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Request/response and byte-stream primitives the chat core runs on.
///
/// [`crate::http::ApiClient`] is the reqwest implementation; tests plug in an
/// in-memory one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and decode the JSON response. Non-2xx is an error.
    async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError>;

    /// GET a JSON document. Non-2xx is an error.
    async fn get(&self, path: &str) -> Result<Value, ClientError>;

    /// GET an event stream and hand back its body as raw bytes.
    async fn get_stream(&self, path: &str) -> Result<ByteStream, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> ClientError {
        ClientError::Status {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_user_message_maps_known_statuses() {
        assert_eq!(
            status(401, "").user_message(),
            "Không có quyền truy cập. Vui lòng kiểm tra API key."
        );
        assert_eq!(status(403, "").user_message(), "Truy cập bị từ chối.");
        assert_eq!(status(404, "").user_message(), "Không tìm thấy dịch vụ.");
        assert_eq!(
            status(429, "").user_message(),
            "Quá nhiều yêu cầu. Vui lòng thử lại sau."
        );
        assert_eq!(
            status(500, "").user_message(),
            "Lỗi server. Vui lòng thử lại sau."
        );
    }

    #[test]
    fn test_user_message_other_status_prefers_server_message() {
        assert_eq!(
            status(502, r#"{"message":"Bảo trì hệ thống"}"#).user_message(),
            "Bảo trì hệ thống"
        );
        assert_eq!(
            status(502, "bad gateway").user_message(),
            "Có lỗi xảy ra khi kết nối đến server."
        );
    }

    #[test]
    fn test_user_message_without_status() {
        let err = ClientError::Config("API key is required".to_string());
        assert_eq!(err.status(), None);
        assert_eq!(err.user_message(), "Configuration error: API key is required");
    }
}
