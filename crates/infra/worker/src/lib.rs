//! # Clipper Worker
//!
//! Runs the webhook retry scheduler as a standalone process: outbound
//! deliveries are retried and dead-lettered, and inbound provider events that
//! failed synchronous handling are replayed.

mod config;

pub use config::{config_path, load_config, ConfigError, WorkerConfig, WorkerSettings, CONFIG_ENV};

use std::sync::Arc;

use clipper_adapter_memory::MemoryAdapter;
use clipper_events::{EventHandler, FnHandler, HandlerFuture, InboundEvent};
use clipper_webhooks::{
    DeliveryMetrics, MetricsFacade, WebhookResult, WebhookStores, WebhookSystem, WebhookTransport,
};
use tokio::sync::watch;

/// The worker process.
pub struct Worker {
    config: WorkerConfig,
    system: WebhookSystem,
}

impl Worker {
    /// Builds a worker over the in-memory store with the default HTTP transport.
    pub fn new(config: WorkerConfig) -> WebhookResult<Self> {
        Self::with_parts(config, WebhookStores::from_adapter(MemoryAdapter::new()), None)
    }

    /// Builds a worker over the given stores, optionally overriding the transport.
    pub fn with_parts(
        config: WorkerConfig,
        stores: WebhookStores,
        transport: Option<Arc<dyn WebhookTransport>>,
    ) -> WebhookResult<Self> {
        let metrics: Arc<dyn DeliveryMetrics> = Arc::new(MetricsFacade);
        let mut builder = WebhookSystem::builder(stores)
            .config(config.webhooks.clone())
            .metrics(metrics);
        if let Some(transport) = transport {
            builder = builder.transport(transport);
        }
        if config.worker.inbound_retries {
            builder = builder.inbound_handler(logging_handler());
        }

        Ok(Self {
            system: builder.build()?,
            config,
        })
    }

    pub fn system(&self) -> &WebhookSystem {
        &self.system
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs the scheduler until `shutdown` flips to `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.webhooks.batch_size,
            poll_interval_secs = self.config.webhooks.poll_interval_secs,
            max_attempts = self.config.webhooks.max_attempts,
            "Starting Clipper worker"
        );
        self.system.scheduler().run(shutdown).await;
    }
}

/// Inbound handler that accepts every well-formed event.
///
/// Stands in for the billing service until it is wired in.
fn logging_handler() -> Arc<dyn EventHandler> {
    Arc::new(FnHandler::new("inbound-logger", |event: InboundEvent| -> HandlerFuture {
        Box::pin(async move {
            tracing::info!(event_id = %event.id, event_type = %event.event_type, "Replayed inbound event");
            Ok(())
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_webhooks::MockTransport;
    use std::time::Duration;

    fn worker(inbound: bool) -> Worker {
        let mut config = WorkerConfig::default();
        config.worker.inbound_retries = inbound;
        Worker::with_parts(
            config,
            WebhookStores::from_adapter(MemoryAdapter::new()),
            Some(Arc::new(MockTransport::new())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_jobs_follow_settings() {
        assert_eq!(
            worker(true).system().scheduler().job_names(),
            vec!["outbound-deliveries", "inbound-retries"]
        );
        assert_eq!(worker(false).system().scheduler().job_names(), vec!["outbound-deliveries"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let worker = Arc::new(worker(true));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
