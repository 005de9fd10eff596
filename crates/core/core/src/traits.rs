//! Store traits for the webhook pipeline.
//!
//! These are the persistence collaborators the services are written against.
//! Adapters implement them; the in-memory adapter is the reference
//! implementation used by tests and the worker binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipper_events::SupportedEvent;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::types::{
    DeadLetterEntry, Delivery, DeliveryStatus, InboundDeadLetter, InboundRetryItem, Subscription,
};

/// Persistence for webhook subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Creates a new subscription.
    async fn create_subscription(&self, subscription: &Subscription) -> CoreResult<Subscription>;

    /// Gets a subscription by ID.
    async fn get_subscription(&self, id: Uuid) -> CoreResult<Option<Subscription>>;

    /// Lists every subscription owned by a user, oldest first.
    async fn list_subscriptions_by_user(&self, user_id: Uuid) -> CoreResult<Vec<Subscription>>;

    /// Lists active subscriptions whose event set contains `event`.
    async fn list_active_subscriptions_for_event(
        &self,
        event: SupportedEvent,
    ) -> CoreResult<Vec<Subscription>>;

    /// Replaces an existing subscription.
    async fn update_subscription(&self, subscription: &Subscription) -> CoreResult<Subscription>;

    /// Hard-deletes a subscription.
    async fn delete_subscription(&self, id: Uuid) -> CoreResult<()>;

    /// Stamps the time of the last successful delivery.
    async fn touch_last_delivery(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()>;

    /// Counts active subscriptions.
    async fn count_active_subscriptions(&self) -> CoreResult<usize>;
}

/// Persistence for the outbound delivery queue.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Inserts a new delivery.
    async fn create_delivery(&self, delivery: &Delivery) -> CoreResult<Delivery>;

    /// Gets a delivery by ID.
    async fn get_delivery(&self, id: Uuid) -> CoreResult<Option<Delivery>>;

    /// Replaces an existing delivery.
    async fn update_delivery(&self, delivery: &Delivery) -> CoreResult<Delivery>;

    /// Fetches up to `limit` non-terminal deliveries due at `now`, oldest due first.
    async fn fetch_due_deliveries(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<Delivery>>;

    /// Lists deliveries for a subscription, newest first.
    async fn list_deliveries_by_subscription(
        &self,
        subscription_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> CoreResult<Vec<Delivery>>;

    /// Counts deliveries for a subscription.
    async fn count_deliveries_by_subscription(&self, subscription_id: Uuid) -> CoreResult<usize>;

    /// Counts deliveries still pending or retrying.
    async fn count_pending_deliveries(&self) -> CoreResult<usize>;

    /// Counts deliveries with `status` updated at or after `since`.
    async fn count_deliveries_since(&self, status: DeliveryStatus, since: DateTime<Utc>) -> CoreResult<usize>;

    /// Persists the terminal delivery and inserts its dead-letter entry as one unit.
    ///
    /// Either both writes happen or neither does.
    async fn dead_letter_delivery(&self, delivery: &Delivery, entry: &DeadLetterEntry) -> CoreResult<()>;
}

/// Persistence for the outbound dead-letter queue.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Gets a dead-letter entry by ID.
    async fn get_dead_letter(&self, id: Uuid) -> CoreResult<Option<DeadLetterEntry>>;

    /// Lists entries, most recently moved first.
    async fn list_dead_letters(&self, offset: usize, limit: usize) -> CoreResult<Vec<DeadLetterEntry>>;

    /// Counts entries.
    async fn count_dead_letters(&self) -> CoreResult<usize>;

    /// Replaces an existing entry.
    async fn update_dead_letter(&self, entry: &DeadLetterEntry) -> CoreResult<DeadLetterEntry>;

    /// Purges an entry.
    async fn delete_dead_letter(&self, id: Uuid) -> CoreResult<()>;
}

/// Persistence for the inbound retry queue.
#[async_trait]
pub trait InboundRetryStore: Send + Sync {
    /// Inserts an item unless its provider event id is already queued.
    ///
    /// Returns `false` if an item with the same provider event id exists.
    async fn enqueue_inbound(&self, item: &InboundRetryItem) -> CoreResult<bool>;

    /// Fetches up to `limit` items due at `now`, oldest due first.
    async fn fetch_due_inbound(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<InboundRetryItem>>;

    /// Replaces an existing item.
    async fn update_inbound(&self, item: &InboundRetryItem) -> CoreResult<InboundRetryItem>;

    /// Removes an item after successful processing.
    async fn remove_inbound(&self, id: Uuid) -> CoreResult<()>;

    /// Removes the item and inserts its dead letter as one unit.
    async fn dead_letter_inbound(&self, item_id: Uuid, entry: &InboundDeadLetter) -> CoreResult<()>;

    /// Lists inbound dead letters, most recently moved first.
    async fn list_inbound_dead_letters(&self, offset: usize, limit: usize) -> CoreResult<Vec<InboundDeadLetter>>;

    /// Counts queued items.
    async fn count_pending_inbound(&self) -> CoreResult<usize>;

    /// Counts inbound dead letters.
    async fn count_inbound_dead_letters(&self) -> CoreResult<usize>;
}
