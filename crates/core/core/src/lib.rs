//! # Clipper Core
//!
//! This crate provides the foundational records and traits for the Clipper
//! webhook pipeline. It defines the persisted shapes (`Subscription`,
//! `Delivery`, `DeadLetterEntry`, inbound queue items), the error type, and the
//! store traits that adapters must implement.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{CoreError, CoreResult};
pub use traits::{DeadLetterStore, DeliveryStore, InboundRetryStore, SubscriptionStore};
pub use types::{
    DeadLetterEntry, Delivery, DeliveryStatus, InboundDeadLetter, InboundRetryItem, Page,
    Subscription,
};

// Re-export event primitives
pub use clipper_events as events;
pub use clipper_events::SupportedEvent;
