//! HTTP transport for the knowledge-base API.
//!
//! This module provides the reqwest client construction, request building
//! and the [`ApiClient`] implementation of [`Transport`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::client::{ByteStream, ClientError, Transport};
use crate::options::{HttpTransport, TransportOptions};

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build()
}

/// Add extra headers to a request if specified in transport options.
///
/// # Example
/// ```ignore
/// let mut req = client.post(url);
/// req = add_extra_headers(req, &transport_options.provider.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    options: TransportOptions<HttpTransport>,
}

impl ApiClient {
    pub fn new(options: TransportOptions<HttpTransport>) -> Result<Self, ClientError> {
        let http = build_http_client(&options)?;
        Ok(Self { http, options })
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.options.provider.api_base(),
            path.trim_start_matches('/')
        )
    }

    /// Attach authentication, content type and extra headers.
    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request.header(CONTENT_TYPE, "application/json");
        if let Some(api_key) = &self.options.provider.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()));
        }
        add_extra_headers(request, &self.options.provider.extra_headers)
    }

    /// Send a request, turning non-2xx statuses into [`ClientError::Status`].
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        debug!("Response status {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("API error response {}: {}", status, body);
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        let url = self.url(path);
        info!("POST {}", url);

        let request = self.prepare(self.http.post(&url)).json(&body);
        let response = self.send(request).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.url(path);
        info!("GET {}", url);

        let response = self.send(self.prepare(self.http.get(&url))).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream, ClientError> {
        let url = self.url(path);
        info!("GET {} (event stream)", url);

        let request = self
            .prepare(self.http.get(&url))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let response = self.send(request).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SecretString;
    use std::time::Duration;

    #[test]
    fn test_build_http_client() {
        let transport_options = TransportOptions {
            timeout: Some(Duration::from_secs(30)),
            provider: HttpTransport {
                api_key: Some(SecretString::new("test".to_string())),
                base_url: None,
                proxy: None,
                extra_headers: None,
            },
        };

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        let transport_options = TransportOptions {
            timeout: None,
            provider: HttpTransport {
                api_key: None,
                base_url: None,
                proxy: Some("http://proxy.example.com:8080".to_string()),
                extra_headers: None,
            },
        };

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let options = TransportOptions::new(
            HttpTransport::new("k").with_base_url("http://localhost:8000/".to_string()),
        );
        let client = ApiClient::new(options).unwrap();
        assert_eq!(client.url("/api/v1/chat"), "http://localhost:8000/api/v1/chat");
        assert_eq!(client.url("api/v1/health"), "http://localhost:8000/api/v1/health");

        let client = ApiClient::new(TransportOptions::new(HttpTransport::default())).unwrap();
        assert_eq!(client.url("/x"), "https://apttthc.nguyenluan.vn/x");
    }
}
