//! # Flow Events
//!
//! Broadcast notifications for lifecycle and phase changes. Subscribers are
//! optional; publishing with no listeners is a no-op, not an error.

pub mod publisher;

pub use publisher::{EventPublisher, FlowEventKind, FlowLifecycleEvent};
