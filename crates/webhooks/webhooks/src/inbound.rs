//! Retry queue for inbound provider events that failed synchronous handling.
//!
//! Uses the same backoff and max-attempts-then-dead-letter transition as
//! outbound delivery. The one difference: a payload that cannot be parsed
//! goes straight to the dead-letter queue without consuming a retry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clipper_core::{InboundDeadLetter, InboundRetryItem, InboundRetryStore, Page};
use clipper_events::{EventHandler, InboundEvent};
use serde::Serialize;

use crate::config::WebhookConfig;
use crate::delivery::MAX_PAGE_SIZE;
use crate::error::WebhookResult;
use crate::metrics::{DeadLetterReason, DeliveryMetrics, QueueKind};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::scheduler::{BatchReport, ScheduledJob};

/// Snapshot of the inbound queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InboundQueueStats {
    pub pending: usize,
    pub dead_letters: usize,
}

/// What happened to one inbound item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    Handled,
    Retried,
    DeadLettered,
}

/// Replays queued inbound events through an [`EventHandler`].
pub struct InboundRetryProcessor {
    store: Arc<dyn InboundRetryStore>,
    handler: Arc<dyn EventHandler>,
    metrics: Arc<dyn DeliveryMetrics>,
    backoff: ExponentialBackoff,
    max_retries: u32,
    initial_delay: chrono::Duration,
}

impl InboundRetryProcessor {
    pub fn new(
        store: Arc<dyn InboundRetryStore>,
        handler: Arc<dyn EventHandler>,
        metrics: Arc<dyn DeliveryMetrics>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            store,
            handler,
            metrics,
            backoff: config.inbound_backoff(),
            max_retries: config.inbound_max_retries,
            initial_delay: config.inbound_initial_delay(),
        }
    }

    /// Queues an event that failed synchronous processing.
    ///
    /// Returns `false` if `provider_event_id` is already queued.
    pub async fn enqueue(
        &self,
        provider_event_id: &str,
        event_type: &str,
        payload: &str,
        error: Option<String>,
    ) -> WebhookResult<bool> {
        let now = Utc::now();
        let next_retry_at = now.checked_add_signed(self.initial_delay).unwrap_or(now);
        let item = InboundRetryItem::new(
            provider_event_id,
            event_type,
            payload,
            error,
            self.max_retries,
            next_retry_at,
        );

        let inserted = self.store.enqueue_inbound(&item).await?;
        if inserted {
            tracing::info!(
                provider_event_id,
                event_type,
                next_retry_at = %next_retry_at,
                "Queued inbound event for retry"
            );
        } else {
            tracing::debug!(provider_event_id, "Inbound event already queued");
        }
        Ok(inserted)
    }

    /// Processes up to `batch_size` due items; one failing item never aborts the batch.
    pub async fn process_due(&self, batch_size: usize) -> WebhookResult<BatchReport> {
        let due = self.store.fetch_due_inbound(Utc::now(), batch_size).await?;

        let mut report = BatchReport {
            fetched: due.len(),
            ..Default::default()
        };

        for item in due {
            let item_id = item.id;
            match self.process_item(item).await {
                Ok(InboundDisposition::Handled) => report.succeeded += 1,
                Ok(InboundDisposition::Retried) => report.retried += 1,
                Ok(InboundDisposition::DeadLettered) => report.dead_lettered += 1,
                Err(e) => {
                    report.errored += 1;
                    tracing::error!(item_id = %item_id, error = %e, "Failed to process inbound retry");
                }
            }
        }

        if let Err(e) = self.stats().await {
            tracing::warn!(error = %e, "Failed to refresh inbound queue depth");
        }
        Ok(report)
    }

    /// Handles one item and persists the outcome.
    pub async fn process_item(&self, mut item: InboundRetryItem) -> WebhookResult<InboundDisposition> {
        let event = match InboundEvent::from_payload(&item.payload) {
            Ok(event) => event,
            Err(e) => {
                let error = format!("unparseable payload: {e}");
                return self
                    .dead_letter(&item, error, DeadLetterReason::InboundParseError)
                    .await;
            }
        };

        match self.handler.handle(&event).await {
            Ok(()) => {
                self.store.remove_inbound(item.id).await?;
                tracing::info!(
                    provider_event_id = %item.provider_event_id,
                    event_type = %item.event_type,
                    retry_count = item.retry_count,
                    "Inbound event handled on retry"
                );
                Ok(InboundDisposition::Handled)
            }
            Err(e) => {
                item.retry_count += 1;
                item.last_error = Some(e.to_string());
                item.updated_at = Utc::now();

                let next = if item.is_exhausted() {
                    None
                } else {
                    self.backoff.next_attempt_at(item.retry_count, Utc::now())
                };
                let Some(next) = next else {
                    return self
                        .dead_letter(&item, e.to_string(), DeadLetterReason::InboundMaxRetries)
                        .await;
                };

                item.next_retry_at = next;
                if let Err(update_err) = self.store.update_inbound(&item).await {
                    // A row that cannot be rescheduled stays due; park it instead of replaying every tick.
                    tracing::error!(
                        provider_event_id = %item.provider_event_id,
                        error = %update_err,
                        "Failed to reschedule inbound event"
                    );
                    let error = format!("failed to reschedule: {update_err}; original error: {e}");
                    return self
                        .dead_letter(&item, error, DeadLetterReason::InboundUpdateFailed)
                        .await;
                }
                self.metrics.record_retry(&item.event_type, item.retry_count);

                tracing::warn!(
                    provider_event_id = %item.provider_event_id,
                    event_type = %item.event_type,
                    retry_count = item.retry_count,
                    max_retries = item.max_retries,
                    next_retry_at = %item.next_retry_at,
                    error = %e,
                    "Inbound event failed, retry scheduled"
                );
                Ok(InboundDisposition::Retried)
            }
        }
    }

    async fn dead_letter(
        &self,
        item: &InboundRetryItem,
        error: String,
        reason: DeadLetterReason,
    ) -> WebhookResult<InboundDisposition> {
        let entry = InboundDeadLetter::from_item(item, error);
        self.store.dead_letter_inbound(item.id, &entry).await?;
        self.metrics.record_dead_letter(&item.event_type, reason);

        tracing::error!(
            provider_event_id = %item.provider_event_id,
            event_type = %item.event_type,
            retry_count = item.retry_count,
            reason = reason.as_str(),
            error = %entry.error,
            "Inbound event moved to dead-letter queue"
        );
        Ok(InboundDisposition::DeadLettered)
    }

    /// Lists inbound dead letters, newest first.
    pub async fn list_dead_letters(&self, page: usize, limit: usize) -> WebhookResult<Page<InboundDeadLetter>> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let items = self
            .store
            .list_inbound_dead_letters(Page::<InboundDeadLetter>::offset(page, limit), limit)
            .await?;
        let total = self.store.count_inbound_dead_letters().await?;
        Ok(Page::new(items, total, page, limit))
    }

    /// Returns queue sizes and pushes them to the metrics port.
    pub async fn stats(&self) -> WebhookResult<InboundQueueStats> {
        let stats = InboundQueueStats {
            pending: self.store.count_pending_inbound().await?,
            dead_letters: self.store.count_inbound_dead_letters().await?,
        };
        self.metrics
            .set_queue_depth(QueueKind::Inbound, stats.pending, stats.dead_letters);
        Ok(stats)
    }
}

#[async_trait]
impl ScheduledJob for InboundRetryProcessor {
    fn name(&self) -> &str {
        "inbound-retries"
    }

    async fn run_once(&self, batch_size: usize) -> WebhookResult<BatchReport> {
        self.process_due(batch_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricEvent, RecordingMetrics};
    use clipper_adapter_memory::MemoryAdapter;
    use clipper_events::{EventError, FnHandler, HandlerFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID: &str = r#"{"id":"evt_1","type":"invoice.paid","data":{"amount":500},"created":1700000000}"#;

    /// Fails the first `failures` calls, then succeeds.
    fn flaky_handler(failures: usize) -> (Arc<dyn EventHandler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = FnHandler::new("flaky", move |_event: InboundEvent| -> HandlerFuture {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(EventError::HandlerFailed("db timeout".into()))
                } else {
                    Ok(())
                }
            })
        });
        (Arc::new(handler), calls)
    }

    fn processor(adapter: &MemoryAdapter, handler: Arc<dyn EventHandler>) -> (InboundRetryProcessor, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let processor = InboundRetryProcessor::new(
            Arc::new(adapter.clone()),
            handler,
            metrics.clone(),
            &WebhookConfig::default(),
        );
        (processor, metrics)
    }

    async fn make_due(adapter: &MemoryAdapter) {
        for mut item in adapter
            .fetch_due_inbound(Utc::now() + chrono::Duration::days(1), 100)
            .await
            .unwrap()
        {
            item.next_retry_at = Utc::now() - chrono::Duration::seconds(1);
            adapter.update_inbound(&item).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let adapter = MemoryAdapter::new();
        let (processor, _) = processor(&adapter, flaky_handler(0).0);

        assert!(processor.enqueue("evt_1", "invoice.paid", VALID, None).await.unwrap());
        assert!(!processor.enqueue("evt_1", "invoice.paid", VALID, None).await.unwrap());
        assert_eq!(processor.stats().await.unwrap().pending, 1);

        // Not due until the initial delay has passed.
        assert_eq!(processor.process_due(10).await.unwrap().fetched, 0);
    }

    #[tokio::test]
    async fn test_success_removes_item() {
        let adapter = MemoryAdapter::new();
        let (handler, calls) = flaky_handler(0);
        let (processor, _) = processor(&adapter, handler);
        processor.enqueue("evt_1", "invoice.paid", VALID, None).await.unwrap();
        make_due(&adapter).await;

        let report = processor.process_due(10).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.stats().await.unwrap(), InboundQueueStats::default());
    }

    #[tokio::test]
    async fn test_parse_error_skips_retries() {
        let adapter = MemoryAdapter::new();
        let (handler, calls) = flaky_handler(0);
        let (processor, metrics) = processor(&adapter, handler);
        processor.enqueue("evt_bad", "invoice.paid", "not json", None).await.unwrap();
        make_due(&adapter).await;

        let report = processor.process_due(10).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let dead = processor.list_dead_letters(1, 10).await.unwrap();
        assert_eq!(dead.total, 1);
        assert_eq!(dead.items[0].retry_count, 0);
        assert!(dead.items[0].error.starts_with("unparseable payload"));
        assert_eq!(metrics.dead_letter_reasons(), vec![DeadLetterReason::InboundParseError]);
    }

    #[tokio::test]
    async fn test_handler_failures_back_off_then_dead_letter() {
        let adapter = MemoryAdapter::new();
        let (handler, calls) = flaky_handler(usize::MAX);
        let (processor, metrics) = processor(&adapter, handler);
        processor.enqueue("evt_1", "invoice.paid", VALID, None).await.unwrap();

        make_due(&adapter).await;
        let before = Utc::now();
        assert_eq!(processor.process_due(10).await.unwrap().retried, 1);

        let item = &adapter.fetch_due_inbound(Utc::now() + chrono::Duration::days(1), 10).await.unwrap()[0];
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("Handler failed: db timeout"));
        let wait = (item.next_retry_at - before).num_seconds();
        assert!((55..=65).contains(&wait), "waited {wait}s");

        make_due(&adapter).await;
        assert_eq!(processor.process_due(10).await.unwrap().retried, 1);
        make_due(&adapter).await;
        assert_eq!(processor.process_due(10).await.unwrap().dead_lettered, 1);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = processor.stats().await.unwrap();
        assert_eq!(stats, InboundQueueStats { pending: 0, dead_letters: 1 });
        assert_eq!(metrics.dead_letter_reasons(), vec![DeadLetterReason::InboundMaxRetries]);
        assert!(metrics.events().contains(&MetricEvent::QueueDepth {
            queue: QueueKind::Inbound,
            pending: 0,
            dead_letters: 1,
        }));
    }

    #[tokio::test]
    async fn test_reschedule_failure_parks_item() {
        let adapter = MemoryAdapter::new();
        let (handler, calls) = flaky_handler(usize::MAX);
        let (processor, metrics) = processor(&adapter, handler);
        processor.enqueue("evt_1", "invoice.paid", VALID, None).await.unwrap();
        make_due(&adapter).await;

        adapter.set_inbound_update_failures(true);
        let report = processor.process_due(10).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Nothing left to replay on the next tick.
        assert_eq!(processor.process_due(10).await.unwrap().fetched, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let dead = processor.list_dead_letters(1, 10).await.unwrap();
        assert_eq!(dead.total, 1);
        assert_eq!(dead.items[0].retry_count, 1);
        assert!(dead.items[0].error.starts_with("failed to reschedule"));
        assert!(dead.items[0].error.ends_with("Handler failed: db timeout"));
        assert_eq!(metrics.dead_letter_reasons(), vec![DeadLetterReason::InboundUpdateFailed]);
    }

    #[tokio::test]
    async fn test_job_name() {
        let adapter = MemoryAdapter::new();
        let (processor, _) = processor(&adapter, flaky_handler(0).0);
        assert_eq!(processor.name(), "inbound-retries");
    }
}
