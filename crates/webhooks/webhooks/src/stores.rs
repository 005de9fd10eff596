//! Store handles shared by the webhook services.

use std::sync::Arc;

use clipper_core::{DeadLetterStore, DeliveryStore, InboundRetryStore, SubscriptionStore};

/// The four persistence collaborators, as trait objects.
#[derive(Clone)]
pub struct WebhookStores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub inbound: Arc<dyn InboundRetryStore>,
}

impl WebhookStores {
    /// Uses one adapter for every store.
    pub fn from_adapter<A>(adapter: A) -> Self
    where
        A: SubscriptionStore + DeliveryStore + DeadLetterStore + InboundRetryStore + 'static,
    {
        let adapter = Arc::new(adapter);
        Self {
            subscriptions: adapter.clone(),
            deliveries: adapter.clone(),
            dead_letters: adapter.clone(),
            inbound: adapter,
        }
    }
}

impl std::fmt::Debug for WebhookStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookStores").finish_non_exhaustive()
    }
}
