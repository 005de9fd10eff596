//! Webhook pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::ExponentialBackoff;

/// Webhook system configuration.
///
/// Deserializable so the worker can read it from the `[webhooks]` table of
/// its config file; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Maximum delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Backoff base delay in seconds.
    pub base_delay_secs: u64,
    /// Backoff ceiling in seconds.
    pub max_delay_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum response body bytes kept per attempt.
    pub response_body_limit: usize,
    /// User-Agent sent with every delivery.
    pub user_agent: String,
    /// Due items fetched per scheduler tick.
    pub batch_size: usize,
    /// Scheduler interval in seconds.
    pub poll_interval_secs: u64,
    /// Maximum replays of a failed inbound event.
    pub inbound_max_retries: u32,
    /// Delay before the first inbound replay, in seconds.
    pub inbound_initial_delay_secs: u64,
    /// Whether plain `http://` subscription URLs are accepted.
    pub allow_http: bool,
    /// Random extra delay added to each backoff step, as a fraction of it (0.0 to 1.0).
    pub retry_jitter: f64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            request_timeout_secs: 10,
            response_body_limit: 10 * 1024,
            user_agent: "Clipper-Webhooks/1.0".to_string(),
            batch_size: 100,
            poll_interval_secs: 30,
            inbound_max_retries: 3,
            inbound_initial_delay_secs: 30,
            allow_http: true,
            retry_jitter: 0.0,
        }
    }
}

impl WebhookConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum delivery attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the backoff base delay.
    pub fn base_delay_secs(mut self, secs: u64) -> Self {
        self.base_delay_secs = secs;
        self
    }

    /// Sets the backoff ceiling.
    pub fn max_delay_secs(mut self, secs: u64) -> Self {
        self.max_delay_secs = secs;
        self
    }

    /// Sets the per-request timeout.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Sets the response body cap.
    pub fn response_body_limit(mut self, bytes: usize) -> Self {
        self.response_body_limit = bytes;
        self
    }

    /// Sets the scheduler batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the scheduler interval.
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Sets the maximum inbound replays.
    pub fn inbound_max_retries(mut self, max: u32) -> Self {
        self.inbound_max_retries = max;
        self
    }

    /// Sets whether `http://` URLs are accepted.
    pub fn allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Sets the backoff jitter fraction.
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Backoff policy for outbound deliveries.
    pub fn delivery_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new()
            .base(Duration::from_secs(self.base_delay_secs))
            .max_delay(Duration::from_secs(self.max_delay_secs))
            .max_attempts(self.max_attempts)
            .jitter(self.retry_jitter)
    }

    /// Backoff policy for inbound replays. Same curve, fewer attempts.
    pub fn inbound_backoff(&self) -> ExponentialBackoff {
        self.delivery_backoff().max_attempts(self.inbound_max_retries)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn inbound_initial_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.inbound_initial_delay_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryStrategy;

    #[test]
    fn test_defaults() {
        let config = WebhookConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.response_body_limit, 10240);
        assert_eq!(config.user_agent, "Clipper-Webhooks/1.0");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"max_attempts": 8, "allow_http": false}"#).unwrap();
        assert_eq!(config.max_attempts, 8);
        assert!(!config.allow_http);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_backoff_policies() {
        let config = WebhookConfig::default();
        assert_eq!(config.delivery_backoff().max_attempts, 5);
        assert_eq!(config.inbound_backoff().max_attempts, 3);
        assert_eq!(
            config.inbound_backoff().next_delay(1),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.inbound_backoff().next_delay(3), None);
    }

    #[test]
    fn test_jitter_reaches_backoff() {
        let config = WebhookConfig::default().retry_jitter(0.5);
        let backoff = config.delivery_backoff();
        assert_eq!(backoff.jitter, 0.5);

        for _ in 0..20 {
            let delay = backoff.next_delay(1).unwrap();
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(90));
        }
    }
}
