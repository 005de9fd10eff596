//! Webhook delivery engine.
//!
//! Drives each [`Delivery`] through its state machine:
//!
//! ```text
//! pending ──► retrying ──► succeeded
//!    │           │
//!    └───────────┴──────► failed (dead-lettered)
//! ```
//!
//! A triggered event fans out to one delivery per active subscription. The
//! scheduler then calls [`DeliveryEngine::process_due`], which attempts each
//! due delivery independently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clipper_core::{
    DeadLetterEntry, DeadLetterStore, Delivery, DeliveryStatus, DeliveryStore, Page, Subscription,
    SubscriptionStore, SupportedEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::dispatch::{AttemptOutcome, Dispatcher};
use crate::error::{WebhookError, WebhookResult};
use crate::metrics::{DeadLetterReason, DeliveryMetrics, DeliveryOutcome, QueueKind};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::scheduler::{BatchReport, ScheduledJob};
use crate::stores::WebhookStores;
use crate::transport::WebhookTransport;

/// Largest page size for delivery history.
pub const MAX_PAGE_SIZE: usize = 100;

/// Body POSTed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: SupportedEvent,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// What happened to one delivery in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDisposition {
    Succeeded,
    Retried,
    DeadLettered,
    /// Already terminal; nothing done.
    Skipped,
}

/// Counts of deliveries that finished recently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecentDeliveries {
    pub succeeded: usize,
    pub failed: usize,
}

/// Snapshot of the outbound pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub active_subscriptions: usize,
    pub pending_deliveries: usize,
    pub dead_letters: usize,
    /// Deliveries that reached a terminal state in the last hour.
    pub recent: RecentDeliveries,
}

/// Webhook delivery engine.
pub struct DeliveryEngine {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    dispatcher: Dispatcher,
    retry_strategy: ExponentialBackoff,
    metrics: Arc<dyn DeliveryMetrics>,
    max_attempts: u32,
}

impl DeliveryEngine {
    /// Creates a new delivery engine.
    pub fn new(
        stores: &WebhookStores,
        transport: Arc<dyn WebhookTransport>,
        metrics: Arc<dyn DeliveryMetrics>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            subscriptions: stores.subscriptions.clone(),
            deliveries: stores.deliveries.clone(),
            dead_letters: stores.dead_letters.clone(),
            dispatcher: Dispatcher::new(transport, config),
            retry_strategy: config.delivery_backoff(),
            metrics,
            max_attempts: config.max_attempts,
        }
    }

    /// Queues one delivery per active subscription to `event_type`.
    ///
    /// Returns the created deliveries; zero matching subscriptions is not an
    /// error. A failure to queue one delivery does not stop the others; the
    /// call fails only if nothing could be queued.
    pub async fn trigger(
        &self,
        event_type: SupportedEvent,
        event_id: &str,
        data: Value,
    ) -> WebhookResult<Vec<Delivery>> {
        let subscriptions = self
            .subscriptions
            .list_active_subscriptions_for_event(event_type)
            .await?;

        if subscriptions.is_empty() {
            tracing::debug!(event_type = %event_type, event_id, "No subscriptions for event");
            return Ok(Vec::new());
        }

        let payload = serde_json::to_string(&WebhookPayload {
            event: event_type,
            timestamp: Utc::now(),
            data,
        })?;

        let mut created = Vec::with_capacity(subscriptions.len());
        let mut first_error = None;

        for subscription in &subscriptions {
            let delivery = Delivery::new(
                subscription.id,
                event_type,
                event_id,
                payload.clone(),
                self.max_attempts,
            );

            match self.deliveries.create_delivery(&delivery).await {
                Ok(d) => created.push(d),
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        event_type = %event_type,
                        event_id,
                        error = %e,
                        "Failed to queue webhook delivery"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(
            event_type = %event_type,
            event_id,
            queued = created.len(),
            subscriptions = subscriptions.len(),
            "Queued webhook deliveries"
        );

        match first_error {
            Some(e) if created.is_empty() => Err(e.into()),
            _ => Ok(created),
        }
    }

    /// Attempts up to `batch_size` due deliveries.
    ///
    /// Each delivery is handled independently: an error on one is logged,
    /// counted and leaves that delivery in its persisted state.
    pub async fn process_due(&self, batch_size: usize) -> WebhookResult<BatchReport> {
        let due = self
            .deliveries
            .fetch_due_deliveries(Utc::now(), batch_size)
            .await?;

        let mut report = BatchReport {
            fetched: due.len(),
            ..Default::default()
        };

        for delivery in due {
            let delivery_id = delivery.id;
            match self.attempt_delivery(delivery).await {
                Ok(AttemptDisposition::Succeeded) => report.succeeded += 1,
                Ok(AttemptDisposition::Retried) => report.retried += 1,
                Ok(AttemptDisposition::DeadLettered) => report.dead_lettered += 1,
                Ok(AttemptDisposition::Skipped) => {}
                Err(e) => {
                    report.errored += 1;
                    tracing::error!(
                        delivery_id = %delivery_id,
                        error = %e,
                        "Failed to process webhook delivery"
                    );
                }
            }
        }

        self.refresh_queue_depth().await;
        Ok(report)
    }

    /// Attempts a single delivery and persists the resulting state.
    pub async fn attempt_delivery(&self, mut delivery: Delivery) -> WebhookResult<AttemptDisposition> {
        if delivery.status.is_terminal() {
            return Ok(AttemptDisposition::Skipped);
        }

        // Every attempt is spent: migrate without sending again.
        if delivery.is_exhausted() {
            let error = delivery
                .error_message
                .clone()
                .unwrap_or_else(|| "max attempts reached".to_string());
            let reason = DeadLetterReason::for_exhausted(delivery.http_status_code);
            return self.dead_letter(delivery, error, reason).await;
        }

        let subscription = match self.subscriptions.get_subscription(delivery.subscription_id).await? {
            Some(sub) if sub.is_active => sub,
            Some(_) => {
                return self
                    .dead_letter(delivery, "subscription inactive", DeadLetterReason::SubscriptionInactive)
                    .await;
            }
            None => {
                return self
                    .dead_letter(delivery, "subscription not found", DeadLetterReason::SubscriptionMissing)
                    .await;
            }
        };

        let (outcome, elapsed) = self
            .dispatcher
            .dispatch(&subscription, delivery.id, delivery.event_type, &delivery.payload, false)
            .await?;

        let event_type = delivery.event_type.as_str();
        if let Some(status) = outcome.status() {
            self.metrics.record_http_status(event_type, status);
        }

        match outcome {
            AttemptOutcome::Delivered { status, body } => {
                let failed_attempts = delivery.attempt_count;
                delivery.mark_succeeded(status, Some(body));
                self.deliveries.update_delivery(&delivery).await?;
                self.touch_subscription(&subscription, delivery.delivered_at).await;

                self.metrics.record_delivery(event_type, DeliveryOutcome::Success, elapsed);
                self.metrics
                    .record_subscription_health(subscription.id, DeliveryOutcome::Success);
                self.metrics.reset_consecutive_failures(subscription.id, event_type);
                self.metrics.record_retry_attempts(event_type, failed_attempts);
                if failed_attempts > 0 {
                    let since_created = (Utc::now() - delivery.created_at).to_std().unwrap_or_default();
                    self.metrics.record_time_to_success(event_type, since_created);
                }

                tracing::info!(
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    event_type,
                    status,
                    attempt = delivery.attempt_count,
                    "Webhook delivered"
                );
                Ok(AttemptDisposition::Succeeded)
            }
            failed => {
                let error = failed.error_message().unwrap_or_default();
                delivery.record_failure(failed.status(), failed.body().map(str::to_string), error.clone());
                let now = Utc::now();
                let next = if delivery.is_exhausted() {
                    None
                } else {
                    self.retry_strategy.next_attempt_at(delivery.attempt_count, now)
                };

                if let Some(next) = next {
                    delivery.schedule_retry(next);
                    self.deliveries.update_delivery(&delivery).await?;

                    self.metrics.record_delivery(event_type, DeliveryOutcome::Retry, elapsed);
                    self.metrics.record_retry(event_type, delivery.attempt_count);
                    self.metrics
                        .record_subscription_health(subscription.id, DeliveryOutcome::Retry);
                    self.metrics.record_consecutive_failure(subscription.id, event_type);

                    tracing::warn!(
                        delivery_id = %delivery.id,
                        subscription_id = %subscription.id,
                        event_type,
                        attempt = delivery.attempt_count,
                        max_attempts = delivery.max_attempts,
                        next_attempt_at = %next,
                        error = %error,
                        "Webhook delivery failed, retry scheduled"
                    );
                    Ok(AttemptDisposition::Retried)
                } else {
                    // The policy may stop before the row's own limit.
                    delivery.max_attempts = delivery.max_attempts.min(delivery.attempt_count);
                    // Persist the spent attempt first; if the migration below fails,
                    // the next pass sees an exhausted row and only migrates it.
                    delivery.schedule_retry(now);
                    self.deliveries.update_delivery(&delivery).await?;
                    self.metrics.record_consecutive_failure(subscription.id, event_type);

                    let reason = DeadLetterReason::for_exhausted(delivery.http_status_code);
                    self.dead_letter(delivery, error, reason).await
                }
            }
        }
    }

    /// Marks the delivery failed and moves it to the dead-letter queue in one store call.
    async fn dead_letter(
        &self,
        mut delivery: Delivery,
        error: impl Into<String>,
        reason: DeadLetterReason,
    ) -> WebhookResult<AttemptDisposition> {
        delivery.mark_failed(error);
        let entry = DeadLetterEntry::from_delivery(&delivery);

        self.deliveries.dead_letter_delivery(&delivery, &entry).await?;

        let event_type = delivery.event_type.as_str();
        self.metrics.record_dead_letter(event_type, reason);
        self.metrics
            .record_delivery(event_type, DeliveryOutcome::Failed, std::time::Duration::ZERO);
        self.metrics
            .record_subscription_health(delivery.subscription_id, DeliveryOutcome::Failed);

        tracing::warn!(
            delivery_id = %delivery.id,
            dead_letter_id = %entry.id,
            subscription_id = %delivery.subscription_id,
            event_type,
            attempt = delivery.attempt_count,
            reason = reason.as_str(),
            error = %entry.error_message,
            "Webhook delivery moved to dead-letter queue"
        );
        Ok(AttemptDisposition::DeadLettered)
    }

    async fn touch_subscription(&self, subscription: &Subscription, at: Option<DateTime<Utc>>) {
        let at = at.unwrap_or_else(Utc::now);
        if let Err(e) = self.subscriptions.touch_last_delivery(subscription.id, at).await {
            tracing::warn!(
                subscription_id = %subscription.id,
                error = %e,
                "Failed to record last delivery time"
            );
        }
    }

    async fn refresh_queue_depth(&self) {
        let pending = self.deliveries.count_pending_deliveries().await;
        let dead = self.dead_letters.count_dead_letters().await;
        match (pending, dead) {
            (Ok(pending), Ok(dead)) => self.metrics.set_queue_depth(QueueKind::Outbound, pending, dead),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to refresh outbound queue depth");
            }
        }
    }

    /// Lists delivery history for a subscription the caller owns, newest first.
    pub async fn list_deliveries(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        page: usize,
        limit: usize,
    ) -> WebhookResult<Page<Delivery>> {
        match self.subscriptions.get_subscription(subscription_id).await? {
            Some(sub) if sub.is_owned_by(user_id) => {}
            _ => return Err(WebhookError::SubscriptionNotFound(subscription_id.to_string())),
        }

        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let items = self
            .deliveries
            .list_deliveries_by_subscription(subscription_id, Page::<Delivery>::offset(page, limit), limit)
            .await?;
        let total = self
            .deliveries
            .count_deliveries_by_subscription(subscription_id)
            .await?;

        Ok(Page::new(items, total, page, limit))
    }

    /// Returns a snapshot of the outbound pipeline.
    pub async fn stats(&self) -> WebhookResult<DeliveryStats> {
        let since = Utc::now() - ChronoDuration::hours(1);

        let stats = DeliveryStats {
            active_subscriptions: self.subscriptions.count_active_subscriptions().await?,
            pending_deliveries: self.deliveries.count_pending_deliveries().await?,
            dead_letters: self.dead_letters.count_dead_letters().await?,
            recent: RecentDeliveries {
                succeeded: self
                    .deliveries
                    .count_deliveries_since(DeliveryStatus::Succeeded, since)
                    .await?,
                failed: self
                    .deliveries
                    .count_deliveries_since(DeliveryStatus::Failed, since)
                    .await?,
            },
        };

        self.metrics.set_active_subscriptions(stats.active_subscriptions);
        self.metrics
            .set_queue_depth(QueueKind::Outbound, stats.pending_deliveries, stats.dead_letters);
        Ok(stats)
    }
}

#[async_trait]
impl ScheduledJob for DeliveryEngine {
    fn name(&self) -> &str {
        "outbound-deliveries"
    }

    async fn run_once(&self, batch_size: usize) -> WebhookResult<BatchReport> {
        self.process_due(batch_size).await
    }
}
