//! Sign, POST and classify. Shared by scheduled deliveries and manual replays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clipper_core::{Subscription, SupportedEvent};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::WebhookResult;
use crate::signature::WebhookSigner;
use crate::transport::{
    OutboundRequest, WebhookTransport, HEADER_DELIVERY_ID, HEADER_EVENT, HEADER_REPLAY,
    HEADER_SIGNATURE,
};

/// Classified result of one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx response.
    Delivered { status: u16, body: String },
    /// Any other response.
    Rejected { status: u16, body: String },
    /// No response: timeout, DNS failure, refused connection.
    Unreachable { error: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Delivered { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptOutcome::Delivered { status, .. } | AttemptOutcome::Rejected { status, .. } => Some(*status),
            AttemptOutcome::Unreachable { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Delivered { body, .. } | AttemptOutcome::Rejected { body, .. } => Some(body),
            AttemptOutcome::Unreachable { .. } => None,
        }
    }

    /// Error text recorded on the delivery. `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            AttemptOutcome::Delivered { .. } => None,
            AttemptOutcome::Rejected { status, body } => Some(format!("HTTP {status}: {body}")),
            AttemptOutcome::Unreachable { error } => Some(format!("network error: {error}")),
        }
    }
}

/// Builds and sends signed requests.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    user_agent: String,
    timeout: Duration,
    body_limit: usize,
}

impl Dispatcher {
    pub(crate) fn new(transport: Arc<dyn WebhookTransport>, config: &WebhookConfig) -> Self {
        Self {
            transport,
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout(),
            body_limit: config.response_body_limit,
        }
    }

    /// Signs `payload` with the subscription's current secret and POSTs it.
    ///
    /// Only signing failures are errors; every network or HTTP failure is
    /// an [`AttemptOutcome`].
    pub(crate) async fn dispatch(
        &self,
        subscription: &Subscription,
        delivery_id: Uuid,
        event_type: SupportedEvent,
        payload: &str,
        replay: bool,
    ) -> WebhookResult<(AttemptOutcome, Duration)> {
        let signature = WebhookSigner::sign(payload.as_bytes(), &subscription.secret)?;

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
            (HEADER_SIGNATURE.to_string(), signature),
            (HEADER_EVENT.to_string(), event_type.as_str().to_string()),
            (HEADER_DELIVERY_ID.to_string(), delivery_id.to_string()),
        ];
        if replay {
            headers.push((HEADER_REPLAY.to_string(), "true".to_string()));
        }

        let request = OutboundRequest {
            url: subscription.url.clone(),
            headers,
            body: payload.to_string(),
            timeout: self.timeout,
            body_limit: self.body_limit,
        };

        let start = Instant::now();
        let outcome = match self.transport.send(request).await {
            Ok(resp) if resp.is_success() => AttemptOutcome::Delivered {
                status: resp.status,
                body: resp.body,
            },
            Ok(resp) => AttemptOutcome::Rejected {
                status: resp.status,
                body: resp.body,
            },
            Err(e) => AttemptOutcome::Unreachable {
                error: e.to_string(),
            },
        };
        let elapsed = start.elapsed();

        tracing::debug!(
            delivery_id = %delivery_id,
            subscription_id = %subscription.id,
            event_type = %event_type,
            status = ?outcome.status(),
            replay,
            elapsed_ms = elapsed.as_millis() as u64,
            "Webhook request completed"
        );

        Ok((outcome, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};

    fn subscription() -> Subscription {
        Subscription::new(
            Uuid::new_v4(),
            "https://example.com/hook".to_string(),
            "secret".to_string(),
            [SupportedEvent::ClipApproved].into_iter().collect(),
            None,
        )
    }

    #[tokio::test]
    async fn test_headers_and_signature() {
        let mock = MockTransport::new();
        let dispatcher = Dispatcher::new(Arc::new(mock.clone()), &WebhookConfig::default());
        let sub = subscription();
        let id = Uuid::new_v4();
        let payload = r#"{"event":"clip.approved"}"#;

        let (outcome, _) = dispatcher
            .dispatch(&sub, id, SupportedEvent::ClipApproved, payload, false)
            .await
            .unwrap();
        assert!(outcome.is_success());

        let requests = mock.requests().await;
        let req = &requests[0];
        assert_eq!(req.url, "https://example.com/hook");
        assert_eq!(req.body, payload);
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.header("User-Agent"), Some("Clipper-Webhooks/1.0"));
        assert_eq!(req.header(HEADER_EVENT), Some("clip.approved"));
        assert_eq!(req.header(HEADER_DELIVERY_ID), Some(id.to_string().as_str()));
        assert_eq!(req.header(HEADER_REPLAY), None);
        assert!(WebhookSigner::verify(
            payload.as_bytes(),
            "secret",
            req.header(HEADER_SIGNATURE).unwrap()
        ));
    }

    #[tokio::test]
    async fn test_replay_marker() {
        let mock = MockTransport::new();
        let dispatcher = Dispatcher::new(Arc::new(mock.clone()), &WebhookConfig::default());

        dispatcher
            .dispatch(&subscription(), Uuid::new_v4(), SupportedEvent::ClipApproved, "{}", true)
            .await
            .unwrap();

        assert_eq!(mock.requests().await[0].header(HEADER_REPLAY), Some("true"));
    }

    #[tokio::test]
    async fn test_classification() {
        let mock = MockTransport::new();
        mock.push_response(503, "unavailable").await;
        mock.push_error(TransportError::Timeout).await;
        let dispatcher = Dispatcher::new(Arc::new(mock), &WebhookConfig::default());
        let sub = subscription();

        let (rejected, _) = dispatcher
            .dispatch(&sub, Uuid::new_v4(), SupportedEvent::ClipApproved, "{}", false)
            .await
            .unwrap();
        assert_eq!(rejected.status(), Some(503));
        assert_eq!(rejected.error_message().unwrap(), "HTTP 503: unavailable");

        let (unreachable, _) = dispatcher
            .dispatch(&sub, Uuid::new_v4(), SupportedEvent::ClipApproved, "{}", false)
            .await
            .unwrap();
        assert_eq!(unreachable.status(), None);
        assert_eq!(unreachable.error_message().unwrap(), "network error: request timed out");
    }
}
