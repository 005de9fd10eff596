//! HTTP transport port for webhook delivery.
//!
//! The engine never talks to an HTTP client directly; it hands an
//! [`OutboundRequest`] to a [`WebhookTransport`]. `ReqwestTransport` is the
//! production implementation, `MockTransport` the scripted test double.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Signature header.
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
/// Event type header.
pub const HEADER_EVENT: &str = "X-Webhook-Event";
/// Delivery id header. Receivers de-duplicate on it.
pub const HEADER_DELIVERY_ID: &str = "X-Webhook-Delivery-ID";
/// Present only on manual dead-letter replays.
pub const HEADER_REPLAY: &str = "X-Webhook-Replay";

/// A POST to a subscriber.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Exact bytes the signature was computed over.
    pub body: String,
    pub timeout: Duration,
    /// Maximum response body bytes to keep.
    pub body_limit: usize,
}

impl OutboundRequest {
    /// Returns the first header with `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Body, truncated to the request's limit.
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure: no HTTP response was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// DNS failure or connection refused.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other client error.
    #[error("{0}")]
    Request(String),
}

/// Sends webhook requests.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// Truncates `bytes` to `limit` and decodes lossily.
pub(crate) fn capped_body(bytes: &[u8], limit: usize) -> String {
    let end = bytes.len().min(limit);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Transport backed by `reqwest`. Redirects are not followed.
#[cfg(feature = "http-client")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();

        // Stop reading once the cap is reached.
        let mut body = Vec::new();
        while body.len() < request.body_limit {
            match response.chunk().await? {
                Some(chunk) => body.extend_from_slice(&chunk),
                None => break,
            }
        }

        Ok(TransportResponse {
            status,
            body: capped_body(&body, request.body_limit),
        })
    }
}

/// Scripted transport for tests.
///
/// Responses are returned in the order they were pushed; once the script is
/// exhausted every request gets `200 OK`. Every request is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Result<TransportResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<OutboundRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one response.
    pub async fn push_response(&self, status: u16, body: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(Ok(TransportResponse::new(status, body)));
    }

    /// Queues the same response `times` times.
    pub async fn push_responses(&self, status: u16, body: &str, times: usize) {
        let mut script = self.script.lock().await;
        for _ in 0..times {
            script.push_back(Ok(TransportResponse::new(status, body)));
        }
    }

    /// Queues one network failure.
    pub async fn push_error(&self, error: TransportError) {
        self.script.lock().await.push_back(Err(error));
    }

    /// Returns every request received so far.
    pub async fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl WebhookTransport for MockTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let limit = request.body_limit;
        self.requests.lock().await.push(request);

        let next = self.script.lock().await.pop_front();
        match next {
            Some(Ok(response)) => Ok(TransportResponse {
                status: response.status,
                body: capped_body(response.body.as_bytes(), limit),
            }),
            Some(Err(e)) => Err(e),
            None => Ok(TransportResponse::new(200, "OK")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OutboundRequest {
        OutboundRequest {
            url: "https://example.com/hook".to_string(),
            headers: vec![(HEADER_EVENT.to_string(), "clip.approved".to_string())],
            body: "{}".to_string(),
            timeout: Duration::from_secs(10),
            body_limit: 4,
        }
    }

    #[test]
    fn test_capped_body() {
        assert_eq!(capped_body(b"hello world", 5), "hello");
        assert_eq!(capped_body(b"hi", 5), "hi");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        assert_eq!(request().header("x-webhook-event"), Some("clip.approved"));
        assert_eq!(request().header(HEADER_REPLAY), None);
    }

    #[tokio::test]
    async fn test_mock_follows_script() {
        let mock = MockTransport::new();
        mock.push_response(500, "internal").await;
        mock.push_error(TransportError::Timeout).await;

        let first = mock.send(request()).await.unwrap();
        assert_eq!(first.status, 500);
        assert_eq!(first.body, "inte");
        assert!(!first.is_success());

        assert_eq!(mock.send(request()).await, Err(TransportError::Timeout));
        assert!(mock.send(request()).await.unwrap().is_success());
        assert_eq!(mock.request_count().await, 3);
    }
}
