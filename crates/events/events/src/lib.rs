//! # Clipper Events
//!
//! Event primitives shared by the webhook pipeline:
//! - The closed registry of event types webhooks can subscribe to
//! - The shape of inbound provider events and the handler trait they are replayed through
//! - Best-effort background task submission with explicit failure reporting
//!
//! ## Example
//!
//! ```rust,ignore
//! use clipper_events::{SupportedEvent, TaskRunner};
//!
//! let event: SupportedEvent = "clip.approved".parse()?;
//!
//! let tasks = TaskRunner::with_log_sink();
//! tasks.submit("refresh-cache", async move { refresh().await });
//! ```

mod error;
mod event;
mod handler;
mod registry;
mod tasks;

pub use error::{EventError, EventResult};
pub use event::InboundEvent;
pub use handler::{EventHandler, FnHandler, HandlerFuture};
pub use registry::{SupportedEvent, CLIP_APPROVED, CLIP_REJECTED, CLIP_SUBMITTED};
pub use tasks::{TaskFailure, TaskFailures, TaskRunner};
