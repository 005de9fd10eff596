//! Subscription management.
//!
//! Every operation that takes a `user_id` is scoped to that owner. A
//! subscription owned by someone else is reported exactly like one that does
//! not exist.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use clipper_core::{Subscription, SubscriptionStore, SupportedEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WebhookError, WebhookResult};
use crate::metrics::DeliveryMetrics;
use crate::signature::WebhookSigner;
use crate::ssrf::SsrfGuard;

/// Maximum events per subscription.
pub const MAX_EVENTS: usize = 10;
/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Request to create a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscription {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubscription {
    #[serde(default)]
    pub url: Option<String>,
    /// `Some(vec![])` is rejected; omit the field to keep the current events.
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Creates, updates and deletes subscriptions.
pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    guard: SsrfGuard,
    metrics: Arc<dyn DeliveryMetrics>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn SubscriptionStore>, guard: SsrfGuard, metrics: Arc<dyn DeliveryMetrics>) -> Self {
        Self { store, guard, metrics }
    }

    /// Validates and persists a new active subscription with a fresh secret.
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        request: CreateSubscription,
    ) -> WebhookResult<Subscription> {
        let events = parse_events(&request.events)?;
        validate_description(request.description.as_deref())?;
        let url = self.guard.validate(&request.url).await?;

        let subscription = Subscription::new(
            user_id,
            url.to_string(),
            WebhookSigner::generate_secret(),
            events,
            request.description,
        );
        let subscription = self.store.create_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %user_id,
            events = subscription.events.len(),
            "Webhook subscription created"
        );

        self.refresh_active_gauge().await;
        Ok(subscription)
    }

    /// Gets a subscription the caller owns.
    pub async fn get_subscription(&self, id: Uuid, user_id: Uuid) -> WebhookResult<Subscription> {
        self.load_owned(id, user_id).await
    }

    /// Lists the caller's subscriptions, oldest first.
    pub async fn list_subscriptions(&self, user_id: Uuid) -> WebhookResult<Vec<Subscription>> {
        Ok(self.store.list_subscriptions_by_user(user_id).await?)
    }

    /// Lists active subscriptions to `event`.
    pub async fn list_subscriptions_for_event(&self, event: SupportedEvent) -> WebhookResult<Vec<Subscription>> {
        Ok(self.store.list_active_subscriptions_for_event(event).await?)
    }

    /// Applies a partial update, re-validating any URL or events given.
    pub async fn update_subscription(
        &self,
        id: Uuid,
        user_id: Uuid,
        patch: UpdateSubscription,
    ) -> WebhookResult<Subscription> {
        let mut subscription = self.load_owned(id, user_id).await?;

        if let Some(events) = &patch.events {
            subscription.events = parse_events(events)?;
        }
        if let Some(description) = patch.description {
            validate_description(Some(&description))?;
            subscription.description = Some(description);
        }
        if let Some(url) = &patch.url {
            subscription.url = self.guard.validate(url).await?.to_string();
        }
        let toggled = patch
            .is_active
            .is_some_and(|active| active != subscription.is_active);
        if let Some(active) = patch.is_active {
            subscription.is_active = active;
        }
        subscription.updated_at = Utc::now();

        let subscription = self.store.update_subscription(&subscription).await?;
        tracing::info!(subscription_id = %id, is_active = subscription.is_active, "Webhook subscription updated");

        if toggled {
            self.refresh_active_gauge().await;
        }
        Ok(subscription)
    }

    /// Replaces the signing secret. Deliveries already sent keep their old signature.
    pub async fn regenerate_secret(&self, id: Uuid, user_id: Uuid) -> WebhookResult<String> {
        let mut subscription = self.load_owned(id, user_id).await?;

        subscription.secret = WebhookSigner::generate_secret();
        subscription.updated_at = Utc::now();
        self.store.update_subscription(&subscription).await?;

        tracing::info!(subscription_id = %id, "Webhook secret regenerated");
        Ok(subscription.secret)
    }

    /// Hard-deletes a subscription the caller owns.
    pub async fn delete_subscription(&self, id: Uuid, user_id: Uuid) -> WebhookResult<()> {
        self.load_owned(id, user_id).await?;
        self.store.delete_subscription(id).await?;

        tracing::info!(subscription_id = %id, user_id = %user_id, "Webhook subscription deleted");
        self.refresh_active_gauge().await;
        Ok(())
    }

    async fn load_owned(&self, id: Uuid, user_id: Uuid) -> WebhookResult<Subscription> {
        match self.store.get_subscription(id).await? {
            Some(sub) if sub.is_owned_by(user_id) => Ok(sub),
            _ => Err(WebhookError::SubscriptionNotFound(id.to_string())),
        }
    }

    async fn refresh_active_gauge(&self) {
        match self.store.count_active_subscriptions().await {
            Ok(count) => self.metrics.set_active_subscriptions(count),
            Err(e) => tracing::warn!(error = %e, "Failed to refresh active subscription gauge"),
        }
    }
}

fn parse_events(names: &[String]) -> WebhookResult<BTreeSet<SupportedEvent>> {
    if names.is_empty() {
        return Err(WebhookError::Validation("at least one event is required".to_string()));
    }
    if names.len() > MAX_EVENTS {
        return Err(WebhookError::Validation(format!(
            "at most {MAX_EVENTS} events are allowed"
        )));
    }
    Ok(SupportedEvent::parse_all(names)?.into_iter().collect())
}

fn validate_description(description: Option<&str>) -> WebhookResult<()> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LENGTH => Err(WebhookError::Validation(format!(
            "description exceeds {MAX_DESCRIPTION_LENGTH} characters"
        ))),
        _ => Ok(()),
    }
}
