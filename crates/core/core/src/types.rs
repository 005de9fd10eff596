//! Core records for the webhook pipeline.
//!
//! This module defines the persisted shapes: `Subscription`, `Delivery`,
//! `DeadLetterEntry` for the outbound side and `InboundRetryItem`,
//! `InboundDeadLetter` for the inbound side.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use clipper_events::SupportedEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A third-party endpoint subscribed to a set of events.
///
/// # Example
///
/// ```rust
/// use clipper_core::Subscription;
/// use clipper_events::SupportedEvent;
/// use uuid::Uuid;
///
/// let sub = Subscription::new(
///     Uuid::new_v4(),
///     "https://example.com/hook".to_string(),
///     "a".repeat(64),
///     [SupportedEvent::ClipApproved].into_iter().collect(),
///     None,
/// );
/// assert!(sub.is_active);
/// assert!(sub.is_subscribed_to(SupportedEvent::ClipApproved));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning user.
    pub user_id: Uuid,

    /// Target URL deliveries are POSTed to.
    pub url: String,

    /// Signing secret. Never serialized into API responses.
    #[serde(skip_serializing, default)]
    pub secret: String,

    /// Subscribed event types.
    pub events: BTreeSet<SupportedEvent>,

    /// Inactive subscriptions receive no new deliveries.
    pub is_active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Time of the last successful delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Creates a new active subscription.
    pub fn new(
        user_id: Uuid,
        url: String,
        secret: String,
        events: BTreeSet<SupportedEvent>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            url,
            secret,
            events,
            is_active: true,
            description,
            created_at: now,
            updated_at: now,
            last_delivery_at: None,
        }
    }

    /// Returns true if this subscription listens for `event`.
    pub fn is_subscribed_to(&self, event: SupportedEvent) -> bool {
        self.events.contains(&event)
    }

    /// Returns true if `user_id` owns this subscription.
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

/// Delivery lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued and due immediately.
    Pending,
    /// Failed at least once; due at `next_attempt_at`.
    Retrying,
    /// Delivered with a 2xx response.
    Succeeded,
    /// Attempts exhausted or subscription unusable; moved to the dead-letter queue.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Succeeded => "succeeded",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Succeeded | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event sent to one subscription, with its retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: SupportedEvent,
    /// Identifier of the domain event that triggered this delivery.
    pub event_id: String,
    /// Serialized wire payload. Signed and sent byte for byte.
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// `None` once the delivery is terminal.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub http_status_code: Option<u16>,
    /// Response body of the last attempt, capped by the transport.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Creates a pending delivery due immediately.
    pub fn new(
        subscription_id: Uuid,
        event_type: SupportedEvent,
        event_id: impl Into<String>,
        payload: String,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_type,
            event_id: event_id.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts,
            next_attempt_at: Some(now),
            http_status_code: None,
            response_body: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Returns true if the delivery should be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Returns true if every attempt has been used.
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Records a 2xx outcome. Terminal.
    pub fn mark_succeeded(&mut self, status_code: u16, body: Option<String>) {
        let now = Utc::now();
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.status = DeliveryStatus::Succeeded;
        self.http_status_code = Some(status_code);
        self.response_body = body;
        self.error_message = None;
        self.next_attempt_at = None;
        self.delivered_at = Some(now);
        self.updated_at = now;
    }

    /// Records a failed attempt and schedules the next one.
    pub fn schedule_retry(&mut self, next_attempt_at: DateTime<Utc>) {
        self.status = DeliveryStatus::Retrying;
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = Utc::now();
    }

    /// Records the outcome details of a failed attempt.
    pub fn record_failure(&mut self, status_code: Option<u16>, body: Option<String>, error: impl Into<String>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.http_status_code = status_code;
        self.response_body = body;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Marks the delivery terminally failed. Terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.error_message = Some(error.into());
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
    }
}

/// Terminal snapshot of a delivery that could not be completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub delivery_id: Uuid,
    pub event_type: SupportedEvent,
    pub event_id: String,
    pub payload: String,
    pub error_message: String,
    pub http_status_code: Option<u16>,
    pub attempt_count: u32,
    pub original_created_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
    /// Set on every manual replay.
    pub replayed_at: Option<DateTime<Utc>>,
    /// `None` until replayed; afterwards the outcome of the latest replay.
    pub replay_succeeded: Option<bool>,
}

impl DeadLetterEntry {
    /// Snapshots a terminally failed delivery.
    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: delivery.subscription_id,
            delivery_id: delivery.id,
            event_type: delivery.event_type,
            event_id: delivery.event_id.clone(),
            payload: delivery.payload.clone(),
            error_message: delivery
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
            http_status_code: delivery.http_status_code,
            attempt_count: delivery.attempt_count,
            original_created_at: delivery.created_at,
            moved_at: Utc::now(),
            replayed_at: None,
            replay_succeeded: None,
        }
    }

    /// Stamps the outcome of a manual replay.
    pub fn record_replay(&mut self, succeeded: bool) {
        self.replayed_at = Some(Utc::now());
        self.replay_succeeded = Some(succeeded);
    }
}

/// An inbound provider event that failed synchronous processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRetryItem {
    pub id: Uuid,
    /// Provider-assigned id. Unique within the queue.
    pub provider_event_id: String,
    pub event_type: String,
    /// Raw payload as received.
    pub payload: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundRetryItem {
    pub fn new(
        provider_event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        error: Option<String>,
        max_retries: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_event_id: provider_event_id.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            retry_count: 0,
            max_retries,
            next_retry_at,
            last_error: error,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// An inbound event that will not be retried again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundDeadLetter {
    pub id: Uuid,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub error: String,
    pub retry_count: u32,
    pub original_created_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
}

impl InboundDeadLetter {
    pub fn from_item(item: &InboundRetryItem, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_event_id: item.provider_event_id.clone(),
            event_type: item.event_type.clone(),
            payload: item.payload.clone(),
            error: error.into(),
            retry_count: item.retry_count,
            original_created_at: item.created_at,
            moved_at: Utc::now(),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of records across all pages.
    pub total: usize,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, page: usize, limit: usize) -> Self {
        Self {
            items,
            total,
            page,
            limit,
        }
    }

    /// Row offset for a 1-based page number. Page 0 is treated as page 1.
    pub fn offset(page: usize, limit: usize) -> usize {
        page.saturating_sub(1).saturating_mul(limit)
    }

    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }
}
