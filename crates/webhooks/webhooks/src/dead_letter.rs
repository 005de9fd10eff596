//! Operator access to dead-lettered deliveries.
//!
//! Replay is a one-shot, out-of-band resend. It never deletes the entry and
//! never re-enqueues a [`clipper_core::Delivery`]; only the replay outcome is
//! stamped on the entry.

use std::sync::Arc;

use clipper_core::{DeadLetterEntry, DeadLetterStore, Page, SubscriptionStore};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::delivery::MAX_PAGE_SIZE;
use crate::dispatch::Dispatcher;
use crate::error::{WebhookError, WebhookResult};
use crate::metrics::DeliveryMetrics;
use crate::stores::WebhookStores;
use crate::transport::WebhookTransport;

/// Lists, replays and purges dead-letter entries.
pub struct DeadLetterManager {
    subscriptions: Arc<dyn SubscriptionStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    dispatcher: Dispatcher,
    metrics: Arc<dyn DeliveryMetrics>,
}

impl DeadLetterManager {
    pub fn new(
        stores: &WebhookStores,
        transport: Arc<dyn WebhookTransport>,
        metrics: Arc<dyn DeliveryMetrics>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            subscriptions: stores.subscriptions.clone(),
            dead_letters: stores.dead_letters.clone(),
            dispatcher: Dispatcher::new(transport, config),
            metrics,
        }
    }

    /// Lists entries, newest first. `page` is 1-based.
    pub async fn list(&self, page: usize, limit: usize) -> WebhookResult<Page<DeadLetterEntry>> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let items = self
            .dead_letters
            .list_dead_letters(Page::<DeadLetterEntry>::offset(page, limit), limit)
            .await?;
        let total = self.dead_letters.count_dead_letters().await?;
        Ok(Page::new(items, total, page, limit))
    }

    pub async fn get(&self, id: Uuid) -> WebhookResult<DeadLetterEntry> {
        self.dead_letters
            .get_dead_letter(id)
            .await?
            .ok_or_else(|| WebhookError::DeadLetterNotFound(id.to_string()))
    }

    /// Resends the entry's payload to its subscription's current URL.
    ///
    /// Fails without sending if the subscription is gone or inactive.
    /// A non-2xx or network failure is recorded on the entry and returned as
    /// [`WebhookError::ReplayFailed`].
    pub async fn replay(&self, id: Uuid) -> WebhookResult<DeadLetterEntry> {
        let mut entry = self.get(id).await?;

        let subscription = match self.subscriptions.get_subscription(entry.subscription_id).await? {
            Some(sub) if sub.is_active => sub,
            Some(sub) => return Err(WebhookError::SubscriptionInactive(sub.id.to_string())),
            None => return Err(WebhookError::SubscriptionNotFound(entry.subscription_id.to_string())),
        };

        let (outcome, _) = self
            .dispatcher
            .dispatch(&subscription, entry.delivery_id, entry.event_type, &entry.payload, true)
            .await?;

        if let Some(status) = outcome.status() {
            self.metrics.record_http_status(entry.event_type.as_str(), status);
        }

        let succeeded = outcome.is_success();
        entry.record_replay(succeeded);
        let entry = self.dead_letters.update_dead_letter(&entry).await?;

        if succeeded {
            tracing::info!(
                dead_letter_id = %entry.id,
                delivery_id = %entry.delivery_id,
                subscription_id = %subscription.id,
                status = ?outcome.status(),
                "Dead-letter replay delivered"
            );
            Ok(entry)
        } else {
            let error = outcome.error_message().unwrap_or_default();
            tracing::warn!(
                dead_letter_id = %entry.id,
                delivery_id = %entry.delivery_id,
                subscription_id = %subscription.id,
                error = %error,
                "Dead-letter replay failed"
            );
            Err(WebhookError::ReplayFailed(error))
        }
    }

    /// Permanently removes an entry.
    pub async fn delete(&self, id: Uuid) -> WebhookResult<()> {
        self.get(id).await?;
        self.dead_letters.delete_dead_letter(id).await?;
        tracing::info!(dead_letter_id = %id, "Dead-letter entry deleted");
        Ok(())
    }
}
