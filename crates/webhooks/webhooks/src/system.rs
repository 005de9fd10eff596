//! Webhook system - main entry point.

use std::sync::Arc;

use clipper_core::{Delivery, SupportedEvent};
use clipper_events::{EventHandler, TaskRunner};
use serde_json::Value;

use crate::config::WebhookConfig;
use crate::dead_letter::DeadLetterManager;
use crate::delivery::DeliveryEngine;
use crate::error::{WebhookError, WebhookResult};
use crate::inbound::InboundRetryProcessor;
use crate::metrics::{DeliveryMetrics, NoopMetrics};
use crate::scheduler::RetryScheduler;
use crate::ssrf::{HostResolver, SsrfGuard, SystemResolver};
use crate::stores::WebhookStores;
use crate::subscription::SubscriptionManager;
use crate::transport::WebhookTransport;

/// Builder for [`WebhookSystem`].
pub struct WebhookSystemBuilder {
    stores: WebhookStores,
    config: WebhookConfig,
    transport: Option<Arc<dyn WebhookTransport>>,
    metrics: Arc<dyn DeliveryMetrics>,
    resolver: Arc<dyn HostResolver>,
    inbound_handler: Option<Arc<dyn EventHandler>>,
}

impl WebhookSystemBuilder {
    pub fn new(stores: WebhookStores) -> Self {
        Self {
            stores,
            config: WebhookConfig::default(),
            transport: None,
            metrics: Arc::new(NoopMetrics),
            resolver: Arc::new(SystemResolver),
            inbound_handler: None,
        }
    }

    pub fn config(mut self, config: WebhookConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP transport. Defaults to reqwest when the `http-client` feature is on.
    pub fn transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn DeliveryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the DNS resolver used by the SSRF guard.
    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enables the inbound retry processor with `handler`.
    pub fn inbound_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.inbound_handler = Some(handler);
        self
    }

    pub fn build(self) -> WebhookResult<WebhookSystem> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let guard = SsrfGuard::with_resolver(self.resolver, self.config.allow_http);

        let subscriptions = SubscriptionManager::new(self.stores.subscriptions.clone(), guard, self.metrics.clone());
        let engine = Arc::new(DeliveryEngine::new(
            &self.stores,
            transport.clone(),
            self.metrics.clone(),
            &self.config,
        ));
        let dead_letters = DeadLetterManager::new(&self.stores, transport, self.metrics.clone(), &self.config);
        let inbound = self.inbound_handler.map(|handler| {
            Arc::new(InboundRetryProcessor::new(
                self.stores.inbound.clone(),
                handler,
                self.metrics.clone(),
                &self.config,
            ))
        });

        Ok(WebhookSystem {
            config: self.config,
            subscriptions,
            engine,
            dead_letters,
            inbound,
        })
    }
}

#[cfg(feature = "http-client")]
fn default_transport() -> WebhookResult<Arc<dyn WebhookTransport>> {
    let transport = crate::transport::ReqwestTransport::new()
        .map_err(|e| WebhookError::ConfigError(format!("failed to build HTTP client: {e}")))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http-client"))]
fn default_transport() -> WebhookResult<Arc<dyn WebhookTransport>> {
    Err(WebhookError::ConfigError(
        "no transport configured and the http-client feature is disabled".to_string(),
    ))
}

/// The main webhook system.
pub struct WebhookSystem {
    config: WebhookConfig,
    subscriptions: SubscriptionManager,
    engine: Arc<DeliveryEngine>,
    dead_letters: DeadLetterManager,
    inbound: Option<Arc<InboundRetryProcessor>>,
}

impl WebhookSystem {
    pub fn builder(stores: WebhookStores) -> WebhookSystemBuilder {
        WebhookSystemBuilder::new(stores)
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn dead_letters(&self) -> &DeadLetterManager {
        &self.dead_letters
    }

    /// The inbound processor, if a handler was configured.
    pub fn inbound(&self) -> Option<&Arc<InboundRetryProcessor>> {
        self.inbound.as_ref()
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Builds a scheduler driving outbound deliveries and, if enabled, inbound retries.
    pub fn scheduler(&self) -> RetryScheduler {
        let mut scheduler =
            RetryScheduler::new(self.config.poll_interval(), self.config.batch_size).with_job(self.engine.clone());
        if let Some(inbound) = &self.inbound {
            scheduler = scheduler.with_job(inbound.clone());
        }
        scheduler
    }

    /// Queues deliveries for an event given by name.
    pub async fn trigger_event(&self, event_type: &str, event_id: &str, data: Value) -> WebhookResult<Vec<Delivery>> {
        let event: SupportedEvent = event_type.parse()?;
        self.engine.trigger(event, event_id, data).await
    }

    /// Queues deliveries in the background. The caller never waits on or
    /// fails because of fan-out; failures go to the runner's channel.
    pub fn trigger_detached(
        &self,
        runner: &TaskRunner,
        event_type: SupportedEvent,
        event_id: impl Into<String>,
        data: Value,
    ) {
        let engine = self.engine.clone();
        let event_id = event_id.into();
        runner.submit(format!("webhook-fanout:{event_type}"), async move {
            engine.trigger(event_type, &event_id, data).await.map(|_| ())
        });
    }
}

impl std::fmt::Debug for WebhookSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSystem")
            .field("config", &self.config)
            .field("inbound", &self.inbound.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssrf::StaticResolver;
    use crate::subscription::CreateSubscription;
    use crate::transport::MockTransport;
    use clipper_adapter_memory::MemoryAdapter;
    use clipper_events::{FnHandler, HandlerFuture, InboundEvent};
    use uuid::Uuid;

    fn system(adapter: &MemoryAdapter, with_inbound: bool) -> WebhookSystem {
        let resolver = StaticResolver::new().with_host("example.com", vec!["93.184.216.34".parse().unwrap()]);
        let mut builder = WebhookSystem::builder(WebhookStores::from_adapter(adapter.clone()))
            .transport(Arc::new(MockTransport::new()))
            .resolver(Arc::new(resolver));
        if with_inbound {
            let handler = FnHandler::new("noop", |_event: InboundEvent| -> HandlerFuture { Box::pin(async { Ok(()) }) });
            builder = builder.inbound_handler(Arc::new(handler));
        }
        builder.build().unwrap()
    }

    async fn subscribe(system: &WebhookSystem) {
        system
            .subscriptions()
            .create_subscription(
                Uuid::new_v4(),
                CreateSubscription {
                    url: "https://example.com/hook".to_string(),
                    events: vec!["clip.approved".to_string()],
                    description: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_jobs() {
        let adapter = MemoryAdapter::new();
        assert_eq!(system(&adapter, false).scheduler().job_names(), vec!["outbound-deliveries"]);
        assert_eq!(
            system(&adapter, true).scheduler().job_names(),
            vec!["outbound-deliveries", "inbound-retries"]
        );
    }

    #[tokio::test]
    async fn test_trigger_event_by_name() {
        let adapter = MemoryAdapter::new();
        let system = system(&adapter, false);
        subscribe(&system).await;

        let created = system.trigger_event("clip.approved", "E1", Value::Null).await.unwrap();
        assert_eq!(created.len(), 1);

        assert!(matches!(
            system.trigger_event("clip.deleted", "E2", Value::Null).await,
            Err(WebhookError::UnsupportedEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_detached_reports_failures() {
        let adapter = MemoryAdapter::new();
        let system = system(&adapter, false);
        subscribe(&system).await;
        let (runner, mut failures) = TaskRunner::new();

        adapter.set_unavailable(true);
        system.trigger_detached(&runner, SupportedEvent::ClipApproved, "E1", Value::Null);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.task, "webhook-fanout:clip.approved");
        assert!(failure.error.contains("Storage error"));
    }

    #[tokio::test]
    async fn test_trigger_detached_queues_deliveries() {
        let adapter = MemoryAdapter::new();
        let system = system(&adapter, false);
        subscribe(&system).await;
        let (runner, _failures) = TaskRunner::new();

        system.trigger_detached(&runner, SupportedEvent::ClipApproved, "E1", Value::Null);

        for _ in 0..100 {
            if adapter.delivery_count().await == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("delivery was never queued");
    }
}
