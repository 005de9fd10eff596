//! Webhook error types.

use clipper_core::CoreError;
use clipper_events::EventError;
use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The URL is malformed, uses a forbidden scheme or is too long.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL targets an internal address.
    #[error("URL blocked: {0}")]
    SsrfBlocked(String),

    /// A request field failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Event name outside the supported registry.
    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// Subscription missing or not owned by the caller.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Subscription exists but is inactive.
    #[error("Subscription is inactive: {0}")]
    SubscriptionInactive(String),

    /// Dead-letter entry not found.
    #[error("Dead-letter entry not found: {0}")]
    DeadLetterNotFound(String),

    /// A manual dead-letter replay did not get a 2xx response.
    #[error("Replay failed: {0}")]
    ReplayFailed(String),

    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Signing failed.
    #[error("Signature error: {0}")]
    Signature(String),

    /// Store error.
    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Returns the HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidUrl(_)
            | Self::SsrfBlocked(_)
            | Self::Validation(_)
            | Self::UnsupportedEvent(_)
            | Self::InvalidPayload(_) => 400,
            Self::SubscriptionNotFound(_) | Self::DeadLetterNotFound(_) => 404,
            Self::SubscriptionInactive(_) => 409,
            Self::ReplayFailed(_) => 502,
            Self::Storage(CoreError::NotFound { .. }) => 404,
            Self::Storage(_) | Self::Signature(_) | Self::ConfigError(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if the request was rejected synchronously and never queued.
    pub fn is_validation(&self) -> bool {
        self.status_code() == 400
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

impl From<EventError> for WebhookError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::UnknownEventType(name) => WebhookError::UnsupportedEvent(name),
            other => WebhookError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(WebhookError::SsrfBlocked("127.0.0.1".into()).status_code(), 400);
        assert_eq!(WebhookError::SubscriptionNotFound("x".into()).status_code(), 404);
        assert_eq!(WebhookError::SubscriptionInactive("x".into()).status_code(), 409);
        assert_eq!(WebhookError::ReplayFailed("HTTP 500".into()).status_code(), 502);
        assert_eq!(WebhookError::from(CoreError::unavailable("down")).status_code(), 500);
    }

    #[test]
    fn test_unknown_event_maps_to_validation() {
        let err: WebhookError = EventError::UnknownEventType("clip.deleted".into()).into();
        assert!(matches!(err, WebhookError::UnsupportedEvent(ref n) if n == "clip.deleted"));
        assert!(err.is_validation());
    }
}
