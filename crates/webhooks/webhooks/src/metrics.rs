//! Observability port for the delivery pipeline.
//!
//! Services receive an `Arc<dyn DeliveryMetrics>` at construction instead of
//! writing to process-global registries. [`MetricsFacade`] forwards to the
//! `metrics` crate for production; [`RecordingMetrics`] captures observations
//! for assertions.

use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Success,
    /// Failed and rescheduled.
    Retry,
    /// Failed and dead-lettered.
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::Retry => "retry",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

/// Why an item was moved to a dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    SubscriptionInactive,
    SubscriptionMissing,
    MaxRetriesNetworkError,
    MaxRetriesClientError,
    MaxRetriesServerError,
    MaxRetriesHttpError,
    InboundParseError,
    InboundMaxRetries,
    InboundUpdateFailed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::SubscriptionInactive => "subscription_inactive",
            DeadLetterReason::SubscriptionMissing => "subscription_missing",
            DeadLetterReason::MaxRetriesNetworkError => "max_retries_network_error",
            DeadLetterReason::MaxRetriesClientError => "max_retries_client_error",
            DeadLetterReason::MaxRetriesServerError => "max_retries_server_error",
            DeadLetterReason::MaxRetriesHttpError => "max_retries_http_error",
            DeadLetterReason::InboundParseError => "inbound_parse_error",
            DeadLetterReason::InboundMaxRetries => "inbound_max_retries",
            DeadLetterReason::InboundUpdateFailed => "inbound_update_failed",
        }
    }

    /// Classifies an exhausted delivery by its last HTTP status.
    pub fn for_exhausted(status: Option<u16>) -> Self {
        match status {
            None => DeadLetterReason::MaxRetriesNetworkError,
            Some(400..=499) => DeadLetterReason::MaxRetriesClientError,
            Some(500..=599) => DeadLetterReason::MaxRetriesServerError,
            Some(_) => DeadLetterReason::MaxRetriesHttpError,
        }
    }
}

/// Which queue a depth gauge refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Outbound,
    Inbound,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Outbound => "outbound",
            QueueKind::Inbound => "inbound",
        }
    }
}

/// Sink for delivery observations. Every method defaults to a no-op.
pub trait DeliveryMetrics: Send + Sync {
    fn record_delivery(&self, _event_type: &str, _outcome: DeliveryOutcome, _duration: Duration) {}

    fn record_http_status(&self, _event_type: &str, _status: u16) {}

    fn record_retry(&self, _event_type: &str, _attempt: u32) {}

    fn record_dead_letter(&self, _event_type: &str, _reason: DeadLetterReason) {}

    fn record_subscription_health(&self, _subscription_id: Uuid, _outcome: DeliveryOutcome) {}

    /// One more failed attempt in a row for this subscription.
    fn record_consecutive_failure(&self, _subscription_id: Uuid, _event_type: &str) {}

    /// A delivery to this subscription succeeded.
    fn reset_consecutive_failures(&self, _subscription_id: Uuid, _event_type: &str) {}

    /// Failed attempts a delivery needed before it succeeded.
    fn record_retry_attempts(&self, _event_type: &str, _failed_attempts: u32) {}

    /// Time from creation to success of a delivery that needed retries.
    fn record_time_to_success(&self, _event_type: &str, _elapsed: Duration) {}

    fn set_active_subscriptions(&self, _count: usize) {}

    fn set_queue_depth(&self, _queue: QueueKind, _pending: usize, _dead_letters: usize) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl DeliveryMetrics for NoopMetrics {}

/// Forwards to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacade;

impl DeliveryMetrics for MetricsFacade {
    fn record_delivery(&self, event_type: &str, outcome: DeliveryOutcome, duration: Duration) {
        ::metrics::counter!(
            "webhook_delivery_total",
            "event_type" => event_type.to_string(),
            "status" => outcome.as_str()
        )
        .increment(1);
        ::metrics::histogram!(
            "webhook_delivery_duration_seconds",
            "event_type" => event_type.to_string(),
            "status" => outcome.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn record_http_status(&self, event_type: &str, status: u16) {
        ::metrics::counter!(
            "webhook_http_status_total",
            "event_type" => event_type.to_string(),
            "status_code" => status.to_string()
        )
        .increment(1);
    }

    fn record_retry(&self, event_type: &str, attempt: u32) {
        ::metrics::counter!(
            "webhook_retry_total",
            "event_type" => event_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    fn record_dead_letter(&self, event_type: &str, reason: DeadLetterReason) {
        ::metrics::counter!(
            "webhook_dlq_movements_total",
            "event_type" => event_type.to_string(),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    fn record_subscription_health(&self, subscription_id: Uuid, outcome: DeliveryOutcome) {
        ::metrics::counter!(
            "webhook_subscription_health_total",
            "subscription_id" => subscription_id.to_string(),
            "status" => outcome.as_str()
        )
        .increment(1);
    }

    fn record_consecutive_failure(&self, subscription_id: Uuid, event_type: &str) {
        ::metrics::gauge!(
            "webhook_consecutive_failures",
            "subscription_id" => subscription_id.to_string(),
            "event_type" => event_type.to_string()
        )
        .increment(1.0);
    }

    fn reset_consecutive_failures(&self, subscription_id: Uuid, event_type: &str) {
        ::metrics::gauge!(
            "webhook_consecutive_failures",
            "subscription_id" => subscription_id.to_string(),
            "event_type" => event_type.to_string()
        )
        .set(0.0);
    }

    fn record_retry_attempts(&self, event_type: &str, failed_attempts: u32) {
        ::metrics::histogram!(
            "webhook_retry_attempts",
            "event_type" => event_type.to_string(),
            "status" => "success"
        )
        .record(f64::from(failed_attempts));
    }

    fn record_time_to_success(&self, event_type: &str, elapsed: Duration) {
        ::metrics::histogram!("webhook_time_to_success_seconds", "event_type" => event_type.to_string())
            .record(elapsed.as_secs_f64());
    }

    fn set_active_subscriptions(&self, count: usize) {
        ::metrics::gauge!("webhook_subscriptions_active").set(count as f64);
    }

    fn set_queue_depth(&self, queue: QueueKind, pending: usize, dead_letters: usize) {
        ::metrics::gauge!("webhook_queue_pending", "queue" => queue.as_str()).set(pending as f64);
        ::metrics::gauge!("webhook_queue_dead_letters", "queue" => queue.as_str()).set(dead_letters as f64);
    }
}

/// A single captured observation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Delivery {
        event_type: String,
        outcome: DeliveryOutcome,
    },
    HttpStatus {
        event_type: String,
        status: u16,
    },
    Retry {
        event_type: String,
        attempt: u32,
    },
    DeadLetter {
        event_type: String,
        reason: DeadLetterReason,
    },
    SubscriptionHealth {
        subscription_id: Uuid,
        outcome: DeliveryOutcome,
    },
    ConsecutiveFailure {
        subscription_id: Uuid,
    },
    ConsecutiveFailuresReset {
        subscription_id: Uuid,
    },
    RetryAttempts {
        event_type: String,
        failed_attempts: u32,
    },
    TimeToSuccess {
        event_type: String,
    },
    ActiveSubscriptions(usize),
    QueueDepth {
        queue: QueueKind,
        pending: usize,
        dead_letters: usize,
    },
}

/// Captures every observation in order.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    /// Returns a copy of everything recorded so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Counts delivery observations with `outcome`.
    pub fn deliveries(&self, outcome: DeliveryOutcome) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MetricEvent::Delivery { outcome: o, .. } if *o == outcome))
            .count()
    }

    /// Returns the reasons of every dead-letter movement.
    pub fn dead_letter_reasons(&self) -> Vec<DeadLetterReason> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::DeadLetter { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    /// Failures recorded for `subscription_id` since its last reset.
    pub fn consecutive_failures(&self, subscription_id: Uuid) -> usize {
        let mut count = 0;
        for event in self.events() {
            match event {
                MetricEvent::ConsecutiveFailure { subscription_id: id } if id == subscription_id => count += 1,
                MetricEvent::ConsecutiveFailuresReset { subscription_id: id } if id == subscription_id => count = 0,
                _ => {}
            }
        }
        count
    }

    /// Returns the last active-subscription gauge value.
    pub fn active_subscriptions(&self) -> Option<usize> {
        self.events().into_iter().rev().find_map(|e| match e {
            MetricEvent::ActiveSubscriptions(n) => Some(n),
            _ => None,
        })
    }
}

impl DeliveryMetrics for RecordingMetrics {
    fn record_delivery(&self, event_type: &str, outcome: DeliveryOutcome, _duration: Duration) {
        self.push(MetricEvent::Delivery {
            event_type: event_type.to_string(),
            outcome,
        });
    }

    fn record_http_status(&self, event_type: &str, status: u16) {
        self.push(MetricEvent::HttpStatus {
            event_type: event_type.to_string(),
            status,
        });
    }

    fn record_retry(&self, event_type: &str, attempt: u32) {
        self.push(MetricEvent::Retry {
            event_type: event_type.to_string(),
            attempt,
        });
    }

    fn record_dead_letter(&self, event_type: &str, reason: DeadLetterReason) {
        self.push(MetricEvent::DeadLetter {
            event_type: event_type.to_string(),
            reason,
        });
    }

    fn record_subscription_health(&self, subscription_id: Uuid, outcome: DeliveryOutcome) {
        self.push(MetricEvent::SubscriptionHealth {
            subscription_id,
            outcome,
        });
    }

    fn record_consecutive_failure(&self, subscription_id: Uuid, _event_type: &str) {
        self.push(MetricEvent::ConsecutiveFailure { subscription_id });
    }

    fn reset_consecutive_failures(&self, subscription_id: Uuid, _event_type: &str) {
        self.push(MetricEvent::ConsecutiveFailuresReset { subscription_id });
    }

    fn record_retry_attempts(&self, event_type: &str, failed_attempts: u32) {
        self.push(MetricEvent::RetryAttempts {
            event_type: event_type.to_string(),
            failed_attempts,
        });
    }

    fn record_time_to_success(&self, event_type: &str, _elapsed: Duration) {
        self.push(MetricEvent::TimeToSuccess {
            event_type: event_type.to_string(),
        });
    }

    fn set_active_subscriptions(&self, count: usize) {
        self.push(MetricEvent::ActiveSubscriptions(count));
    }

    fn set_queue_depth(&self, queue: QueueKind, pending: usize, dead_letters: usize) {
        self.push(MetricEvent::QueueDepth {
            queue,
            pending,
            dead_letters,
        });
    }
}
