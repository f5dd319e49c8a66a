//! Configuration for the transport, the turn controller and the store.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::ClientError;

pub const DEFAULT_API_BASE: &str = "https://apttthc.nguyenluan.vn";
pub const DEFAULT_CHAT_ENDPOINT: &str = "/api/v1/chat";
pub const DEFAULT_HEALTH_ENDPOINT: &str = "/api/v1/health";

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Generic transport options containing truly generic transport fields
/// and transport-specific configuration.
///
/// # Example
/// ```rust
/// use tthc_chat::options::{TransportOptions, HttpTransport, SecretString};
/// use std::time::Duration;
///
/// let options = TransportOptions {
///     timeout: Some(Duration::from_secs(30)),
///     provider: HttpTransport {
///         api_key: Some(SecretString::new("key".to_string())),
///         base_url: Some("https://apttthc.nguyenluan.vn".to_string()),
///         proxy: None,
///         extra_headers: None,
///     },
/// };
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Request timeout. Applies to whole requests, so leave it unset for
    /// long-running streams.
    pub timeout: Option<Duration>,

    /// Transport-specific options
    pub provider: T,
}

/// HTTP-specific transport options.
/// Used as the provider field in `TransportOptions<HttpTransport>`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// API key sent as a bearer token
    pub api_key: Option<SecretString>,

    /// Base URL the endpoint paths are appended to
    pub base_url: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl HttpTransport {
    /// Create new HTTP transport options with an API key.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: None,
            proxy: None,
            extra_headers: None,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Base URL without a trailing slash, falling back to the public API.
    pub fn api_base(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }
}

impl<T> TransportOptions<T> {
    /// Create new transport options with transport-specific configuration.
    pub fn new(provider: T) -> Self {
        Self {
            timeout: None,
            provider,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// API paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub chat: String,
    pub health: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat: DEFAULT_CHAT_ENDPOINT.to_string(),
            health: DEFAULT_HEALTH_ENDPOINT.to_string(),
        }
    }
}

/// Turn controller options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub endpoints: Endpoints,

    /// Pause after each applied stream frame so a renderer can keep up.
    /// Zero disables it.
    pub frame_delay: Duration,

    /// Longest message, in characters after trimming, a turn accepts.
    /// Unlimited when unset.
    pub max_message_chars: Option<usize>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            frame_delay: Duration::from_millis(50),
            max_message_chars: None,
        }
    }
}

impl ChatOptions {
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = Some(max);
        self
    }
}

/// How many conversations the store keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryRetention {
    #[default]
    Unlimited,
    /// Keep at most this many; the oldest unselected ones are dropped first.
    /// `Limit(1)` is the single-current-chat mode.
    Limit(usize),
}

/// Conversation store options.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    pub retention: HistoryRetention,
}

/// Everything the binary needs, loaded from `TTHC_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportOptions<HttpTransport>,
    pub endpoints: Endpoints,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = HttpTransport {
            api_key: var("TTHC_API_KEY").map(SecretString::new),
            base_url: Some(var("TTHC_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string())),
            proxy: var("TTHC_PROXY"),
            extra_headers: None,
        };

        let timeout = var("TTHC_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            chat: var("TTHC_API_CHAT_ENDPOINT").unwrap_or(defaults.chat),
            health: var("TTHC_API_HEALTH_ENDPOINT").unwrap_or(defaults.health),
        };

        Self {
            transport: TransportOptions { timeout, provider },
            endpoints,
            log_level: var("TTHC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Check that the required settings are present.
    pub fn validate(&self) -> Result<(), ClientError> {
        let provider = &self.transport.provider;
        if provider.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(ClientError::Config("TTHC_API_BASE_URL is empty".to_string()));
        }
        if provider.api_key.is_none() {
            return Err(ClientError::Config("TTHC_API_KEY is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config.transport.provider.api_base(), DEFAULT_API_BASE);
        assert_eq!(config.endpoints, Endpoints::default());
        assert_eq!(config.log_level, "info");
        assert!(config.transport.timeout.is_none());
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_config_from_env_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TTHC_API_BASE_URL", "http://localhost:8000/"),
            ("TTHC_API_KEY", "secret"),
            ("TTHC_API_CHAT_ENDPOINT", "/v2/chat"),
            ("TTHC_TIMEOUT_SECS", "15"),
            ("TTHC_LOG_LEVEL", ""),
        ]));

        assert_eq!(config.transport.provider.api_base(), "http://localhost:8000");
        assert_eq!(config.endpoints.chat, "/v2/chat");
        assert_eq!(config.endpoints.health, DEFAULT_HEALTH_ENDPOINT);
        assert_eq!(config.transport.timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_is_redacted() {
        let transport = HttpTransport::new("super-secret");
        let debug = format!("{:?}", transport);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
