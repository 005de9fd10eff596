//! # Clipper Webhooks
//!
//! Webhook delivery for the Clipper backend:
//! - Subscription management with SSRF-checked target URLs
//! - HMAC-SHA256 signed delivery with exponential backoff
//! - Atomic dead-letter migration, listing and manual replay
//! - A retry processor for inbound provider events
//! - A scheduler that drives both retry queues
//!
//! ## Example
//!
//! ```rust,ignore
//! use clipper_webhooks::{CreateSubscription, WebhookStores, WebhookSystem};
//!
//! let system = WebhookSystem::builder(WebhookStores::from_adapter(adapter)).build()?;
//!
//! system.subscriptions().create_subscription(user_id, CreateSubscription {
//!     url: "https://example.com/hook".into(),
//!     events: vec!["clip.approved".into()],
//!     description: None,
//! }).await?;
//!
//! system.trigger_event("clip.approved", "clip-123", serde_json::json!({"clip_id": "123"})).await?;
//!
//! let (tx, rx) = tokio::sync::watch::channel(false);
//! system.scheduler().run(rx).await;
//! ```

mod config;
mod dead_letter;
mod delivery;
mod dispatch;
mod error;
mod inbound;
mod retry;
mod signature;
mod stores;
mod subscription;
mod system;
pub mod metrics;
pub mod scheduler;
pub mod ssrf;
pub mod transport;

pub use config::WebhookConfig;
pub use dead_letter::DeadLetterManager;
pub use delivery::{
    AttemptDisposition, DeliveryEngine, DeliveryStats, RecentDeliveries, WebhookPayload, MAX_PAGE_SIZE,
};
pub use dispatch::AttemptOutcome;
pub use error::{WebhookError, WebhookResult};
pub use inbound::{InboundDisposition, InboundQueueStats, InboundRetryProcessor};
pub use metrics::{DeadLetterReason, DeliveryMetrics, DeliveryOutcome, MetricsFacade, NoopMetrics, QueueKind};
pub use retry::{ExponentialBackoff, RetryStrategy};
pub use scheduler::{BatchReport, RetryScheduler, ScheduledJob};
pub use signature::{SignatureError, WebhookSigner};
pub use ssrf::{HostResolver, SsrfGuard};
pub use stores::WebhookStores;
pub use subscription::{CreateSubscription, SubscriptionManager, UpdateSubscription, MAX_DESCRIPTION_LENGTH, MAX_EVENTS};
pub use system::{WebhookSystem, WebhookSystemBuilder};
pub use transport::{MockTransport, TransportError, TransportResponse, WebhookTransport};

#[cfg(feature = "http-client")]
pub use transport::ReqwestTransport;
