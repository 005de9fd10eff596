//! # Clipper Memory Adapter
//!
//! An in-memory implementation of every Clipper store trait, primarily
//! intended for testing and development purposes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clipper_adapter_memory::MemoryAdapter;
//!
//! let adapter = MemoryAdapter::new();
//! let system = WebhookSystem::builder()
//!     .stores(adapter)
//!     .build();
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipper_core::error::{CoreError, CoreResult};
use clipper_core::traits::{DeadLetterStore, DeliveryStore, InboundRetryStore, SubscriptionStore};
use clipper_core::types::{
    DeadLetterEntry, Delivery, DeliveryStatus, InboundDeadLetter, InboundRetryItem, Subscription,
};
use clipper_core::SupportedEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory storage for a single entity type.
type Store<T> = Arc<RwLock<HashMap<Uuid, T>>>;

/// In-memory store adapter.
///
/// This adapter stores all data in memory and is suitable for
/// testing and development. Data is lost when the process exits.
///
/// Switches simulate infrastructure failures: [`set_unavailable`] fails
/// every operation, [`set_dead_letter_failures`] fails only the dead-letter
/// migrations and [`set_inbound_update_failures`] fails only inbound
/// rescheduling.
///
/// [`set_unavailable`]: MemoryAdapter::set_unavailable
/// [`set_dead_letter_failures`]: MemoryAdapter::set_dead_letter_failures
/// [`set_inbound_update_failures`]: MemoryAdapter::set_inbound_update_failures
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    subscriptions: Store<Subscription>,
    deliveries: Store<Delivery>,
    dead_letters: Store<DeadLetterEntry>,
    inbound: Store<InboundRetryItem>,
    inbound_dead_letters: Store<InboundDeadLetter>,
    unavailable: Arc<AtomicBool>,
    fail_dead_letters: Arc<AtomicBool>,
    fail_inbound_updates: Arc<AtomicBool>,
}

impl MemoryAdapter {
    /// Creates a new in-memory adapter.
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            deliveries: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(RwLock::new(HashMap::new())),
            inbound: Arc::new(RwLock::new(HashMap::new())),
            inbound_dead_letters: Arc::new(RwLock::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            fail_dead_letters: Arc::new(AtomicBool::new(false)),
            fail_inbound_updates: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent operation fail with `CoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes dead-letter migrations fail while other operations succeed.
    pub fn set_dead_letter_failures(&self, fail: bool) {
        self.fail_dead_letters.store(fail, Ordering::SeqCst);
    }

    /// Makes inbound retry updates fail while other operations succeed.
    pub fn set_inbound_update_failures(&self, fail: bool) {
        self.fail_inbound_updates.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of subscriptions stored.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Returns the number of deliveries stored, in any state.
    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.len()
    }

    /// Returns the number of outbound dead-letter entries stored.
    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.read().await.len()
    }

    /// Returns every delivery, oldest first.
    pub async fn all_deliveries(&self) -> Vec<Delivery> {
        let mut all: Vec<Delivery> = self.deliveries.read().await.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        all
    }

    fn check(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::unavailable("memory adapter switched off"));
        }
        Ok(())
    }

    fn check_dead_letter(&self) -> CoreResult<()> {
        self.check()?;
        if self.fail_dead_letters.load(Ordering::SeqCst) {
            return Err(CoreError::database("dead-letter insert rejected"));
        }
        Ok(())
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn page<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl SubscriptionStore for MemoryAdapter {
    async fn create_subscription(&self, subscription: &Subscription) -> CoreResult<Subscription> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write().await;

        if subscriptions.contains_key(&subscription.id) {
            return Err(CoreError::duplicate("subscription", "id", subscription.id.to_string()));
        }

        subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    async fn get_subscription(&self, id: Uuid) -> CoreResult<Option<Subscription>> {
        self.check()?;
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn list_subscriptions_by_user(&self, user_id: Uuid) -> CoreResult<Vec<Subscription>> {
        self.check()?;
        let mut owned: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);
        Ok(owned)
    }

    async fn list_active_subscriptions_for_event(
        &self,
        event: SupportedEvent,
    ) -> CoreResult<Vec<Subscription>> {
        self.check()?;
        let mut matching: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.is_active && s.is_subscribed_to(event))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }

    async fn update_subscription(&self, subscription: &Subscription) -> CoreResult<Subscription> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write().await;

        if !subscriptions.contains_key(&subscription.id) {
            return Err(CoreError::not_found("subscription", "id", subscription.id.to_string()));
        }

        subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, id: Uuid) -> CoreResult<()> {
        self.check()?;
        // Deliveries are kept as history; the engine dead-letters any that are still queued.
        self.subscriptions.write().await.remove(&id);
        Ok(())
    }

    async fn touch_last_delivery(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        self.check()?;
        if let Some(sub) = self.subscriptions.write().await.get_mut(&id) {
            sub.last_delivery_at = Some(at);
        }
        Ok(())
    }

    async fn count_active_subscriptions(&self) -> CoreResult<usize> {
        self.check()?;
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.is_active)
            .count())
    }
}

#[async_trait]
impl DeliveryStore for MemoryAdapter {
    async fn create_delivery(&self, delivery: &Delivery) -> CoreResult<Delivery> {
        self.check()?;
        let mut deliveries = self.deliveries.write().await;

        if deliveries.contains_key(&delivery.id) {
            return Err(CoreError::duplicate("delivery", "id", delivery.id.to_string()));
        }

        deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery.clone())
    }

    async fn get_delivery(&self, id: Uuid) -> CoreResult<Option<Delivery>> {
        self.check()?;
        Ok(self.deliveries.read().await.get(&id).cloned())
    }

    async fn update_delivery(&self, delivery: &Delivery) -> CoreResult<Delivery> {
        self.check()?;
        let mut deliveries = self.deliveries.write().await;

        if !deliveries.contains_key(&delivery.id) {
            return Err(CoreError::not_found("delivery", "id", delivery.id.to_string()));
        }

        deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery.clone())
    }

    async fn fetch_due_deliveries(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<Delivery>> {
        self.check()?;
        let mut due: Vec<Delivery> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|d| (d.next_attempt_at, d.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn list_deliveries_by_subscription(
        &self,
        subscription_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> CoreResult<Vec<Delivery>> {
        self.check()?;
        let mut history: Vec<Delivery> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.subscription_id == subscription_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(history, offset, limit))
    }

    async fn count_deliveries_by_subscription(&self, subscription_id: Uuid) -> CoreResult<usize> {
        self.check()?;
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.subscription_id == subscription_id)
            .count())
    }

    async fn count_pending_deliveries(&self) -> CoreResult<usize> {
        self.check()?;
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| !d.status.is_terminal())
            .count())
    }

    async fn count_deliveries_since(&self, status: DeliveryStatus, since: DateTime<Utc>) -> CoreResult<usize> {
        self.check()?;
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.status == status && d.updated_at >= since)
            .count())
    }

    async fn dead_letter_delivery(&self, delivery: &Delivery, entry: &DeadLetterEntry) -> CoreResult<()> {
        self.check_dead_letter()?;
        // Lock order: deliveries before dead_letters.
        let mut deliveries = self.deliveries.write().await;
        let mut dead_letters = self.dead_letters.write().await;

        if !deliveries.contains_key(&delivery.id) {
            return Err(CoreError::not_found("delivery", "id", delivery.id.to_string()));
        }
        if dead_letters.values().any(|e| e.delivery_id == delivery.id) {
            return Err(CoreError::duplicate("dead_letter", "delivery_id", delivery.id.to_string()));
        }

        deliveries.insert(delivery.id, delivery.clone());
        dead_letters.insert(entry.id, entry.clone());
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryAdapter {
    async fn get_dead_letter(&self, id: Uuid) -> CoreResult<Option<DeadLetterEntry>> {
        self.check()?;
        Ok(self.dead_letters.read().await.get(&id).cloned())
    }

    async fn list_dead_letters(&self, offset: usize, limit: usize) -> CoreResult<Vec<DeadLetterEntry>> {
        self.check()?;
        let mut entries: Vec<DeadLetterEntry> = self.dead_letters.read().await.values().cloned().collect();
        entries.sort_by(|a, b| b.moved_at.cmp(&a.moved_at));
        Ok(page(entries, offset, limit))
    }

    async fn count_dead_letters(&self) -> CoreResult<usize> {
        self.check()?;
        Ok(self.dead_letters.read().await.len())
    }

    async fn update_dead_letter(&self, entry: &DeadLetterEntry) -> CoreResult<DeadLetterEntry> {
        self.check()?;
        let mut dead_letters = self.dead_letters.write().await;

        if !dead_letters.contains_key(&entry.id) {
            return Err(CoreError::not_found("dead_letter", "id", entry.id.to_string()));
        }

        dead_letters.insert(entry.id, entry.clone());
        Ok(entry.clone())
    }

    async fn delete_dead_letter(&self, id: Uuid) -> CoreResult<()> {
        self.check()?;
        if self.dead_letters.write().await.remove(&id).is_none() {
            return Err(CoreError::not_found("dead_letter", "id", id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InboundRetryStore for MemoryAdapter {
    async fn enqueue_inbound(&self, item: &InboundRetryItem) -> CoreResult<bool> {
        self.check()?;
        let mut inbound = self.inbound.write().await;

        if inbound
            .values()
            .any(|i| i.provider_event_id == item.provider_event_id)
        {
            return Ok(false);
        }

        inbound.insert(item.id, item.clone());
        Ok(true)
    }

    async fn fetch_due_inbound(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<InboundRetryItem>> {
        self.check()?;
        let mut due: Vec<InboundRetryItem> = self
            .inbound
            .read()
            .await
            .values()
            .filter(|i| i.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|i| (i.next_retry_at, i.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn update_inbound(&self, item: &InboundRetryItem) -> CoreResult<InboundRetryItem> {
        self.check()?;
        if self.fail_inbound_updates.load(Ordering::SeqCst) {
            return Err(CoreError::database("inbound update rejected"));
        }
        let mut inbound = self.inbound.write().await;

        if !inbound.contains_key(&item.id) {
            return Err(CoreError::not_found("inbound_retry", "id", item.id.to_string()));
        }

        inbound.insert(item.id, item.clone());
        Ok(item.clone())
    }

    async fn remove_inbound(&self, id: Uuid) -> CoreResult<()> {
        self.check()?;
        self.inbound.write().await.remove(&id);
        Ok(())
    }

    async fn dead_letter_inbound(&self, item_id: Uuid, entry: &InboundDeadLetter) -> CoreResult<()> {
        self.check_dead_letter()?;
        // Lock order: inbound before inbound_dead_letters.
        let mut inbound = self.inbound.write().await;
        let mut dead_letters = self.inbound_dead_letters.write().await;

        if inbound.remove(&item_id).is_none() {
            return Err(CoreError::not_found("inbound_retry", "id", item_id.to_string()));
        }

        dead_letters.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn list_inbound_dead_letters(&self, offset: usize, limit: usize) -> CoreResult<Vec<InboundDeadLetter>> {
        self.check()?;
        let mut entries: Vec<InboundDeadLetter> = self
            .inbound_dead_letters
            .read()
            .await
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.moved_at.cmp(&a.moved_at));
        Ok(page(entries, offset, limit))
    }

    async fn count_pending_inbound(&self) -> CoreResult<usize> {
        self.check()?;
        Ok(self.inbound.read().await.len())
    }

    async fn count_inbound_dead_letters(&self) -> CoreResult<usize> {
        self.check()?;
        Ok(self.inbound_dead_letters.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(events: &[SupportedEvent], active: bool) -> Subscription {
        let mut sub = Subscription::new(
            Uuid::new_v4(),
            "https://example.com/hook".to_string(),
            "s".repeat(64),
            events.iter().copied().collect(),
            None,
        );
        sub.is_active = active;
        sub
    }

    fn delivery() -> Delivery {
        Delivery::new(Uuid::new_v4(), SupportedEvent::ClipApproved, "E1", "{}".into(), 5)
    }

    #[tokio::test]
    async fn test_active_subscriptions_for_event() {
        let adapter = MemoryAdapter::new();
        adapter
            .create_subscription(&subscription(&[SupportedEvent::ClipApproved], true))
            .await
            .unwrap();
        adapter
            .create_subscription(&subscription(&[SupportedEvent::ClipApproved], false))
            .await
            .unwrap();
        adapter
            .create_subscription(&subscription(&[SupportedEvent::ClipRejected], true))
            .await
            .unwrap();

        let matching = adapter
            .list_active_subscriptions_for_event(SupportedEvent::ClipApproved)
            .await
            .unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(adapter.count_active_subscriptions().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_due_orders_oldest_first_and_limits() {
        let adapter = MemoryAdapter::new();
        let now = Utc::now();

        let mut later = delivery();
        later.next_attempt_at = Some(now - Duration::seconds(10));
        let mut earlier = delivery();
        earlier.next_attempt_at = Some(now - Duration::seconds(60));
        let mut future = delivery();
        future.next_attempt_at = Some(now + Duration::seconds(60));

        for d in [&later, &earlier, &future] {
            adapter.create_delivery(d).await.unwrap();
        }

        let due = adapter.fetch_due_deliveries(now, 10).await.unwrap();
        assert_eq!(due.iter().map(|d| d.id).collect::<Vec<_>>(), vec![earlier.id, later.id]);

        let due = adapter.fetch_due_deliveries(now, 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, earlier.id);
    }

    #[tokio::test]
    async fn test_dead_letter_delivery_is_all_or_nothing() {
        let adapter = MemoryAdapter::new();
        let mut d = delivery();
        adapter.create_delivery(&d).await.unwrap();

        d.record_failure(Some(500), None, "HTTP 500: down");
        d.mark_failed("HTTP 500: down");
        let entry = DeadLetterEntry::from_delivery(&d);

        adapter.set_dead_letter_failures(true);
        assert!(adapter.dead_letter_delivery(&d, &entry).await.is_err());
        let stored = adapter.get_delivery(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(adapter.dead_letter_count().await, 0);

        adapter.set_dead_letter_failures(false);
        adapter.dead_letter_delivery(&d, &entry).await.unwrap();
        let stored = adapter.get_delivery(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(adapter.dead_letter_count().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_inbound_ignores_duplicates() {
        let adapter = MemoryAdapter::new();
        let first = InboundRetryItem::new("evt_1", "invoice.paid", "{}", None, 3, Utc::now());
        let again = InboundRetryItem::new("evt_1", "invoice.paid", "{}", None, 3, Utc::now());

        assert!(adapter.enqueue_inbound(&first).await.unwrap());
        assert!(!adapter.enqueue_inbound(&again).await.unwrap());
        assert_eq!(adapter.count_pending_inbound().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_inbound_update_failures_leave_dead_letters_working() {
        let adapter = MemoryAdapter::new();
        let item = InboundRetryItem::new("evt_1", "invoice.paid", "{}", None, 3, Utc::now());
        adapter.enqueue_inbound(&item).await.unwrap();

        adapter.set_inbound_update_failures(true);
        assert!(adapter.update_inbound(&item).await.is_err());

        let entry = InboundDeadLetter::from_item(&item, "gave up");
        adapter.dead_letter_inbound(item.id, &entry).await.unwrap();
        assert_eq!(adapter.count_pending_inbound().await.unwrap(), 0);
        assert_eq!(adapter.count_inbound_dead_letters().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let adapter = MemoryAdapter::new();
        adapter.set_unavailable(true);

        let err = adapter.count_dead_letters().await.unwrap_err();
        assert!(err.is_transient());
        assert!(adapter.create_delivery(&delivery()).await.is_err());

        adapter.set_unavailable(false);
        assert_eq!(adapter.count_dead_letters().await.unwrap(), 0);
    }
}
