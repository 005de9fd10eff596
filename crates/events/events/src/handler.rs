//! Event handler trait and types.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use crate::error::EventError;
use crate::event::InboundEvent;

/// Boxed future returned by function-based handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), EventError>> + Send>>;

/// Trait for inbound event handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns a unique identifier for this handler.
    fn id(&self) -> &str {
        "anonymous"
    }

    /// Handles an event.
    async fn handle(&self, event: &InboundEvent) -> Result<(), EventError>;
}

/// Wrapper for function-based handlers.
pub struct FnHandler<F>
where
    F: Fn(InboundEvent) -> HandlerFuture + Send + Sync,
{
    id: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(InboundEvent) -> HandlerFuture + Send + Sync,
{
    /// Creates a new function handler.
    pub fn new(id: impl Into<String>, handler: F) -> Self {
        Self {
            id: id.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(InboundEvent) -> HandlerFuture + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, event: &InboundEvent) -> Result<(), EventError> {
        (self.handler)(event.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = FnHandler::new("counter", move |event: InboundEvent| {
            let counter = counter.clone();
            Box::pin(async move {
                if event.event_type == "boom" {
                    return Err(EventError::HandlerFailed("boom".into()));
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as HandlerFuture
        });

        assert_eq!(handler.id(), "counter");

        let ok = InboundEvent::new("evt_1", "invoice.paid", serde_json::json!({}));
        handler.handle(&ok).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let bad = InboundEvent::new("evt_2", "boom", serde_json::json!({}));
        assert!(handler.handle(&bad).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
