//! Event handlers and the per-type dispatch registry.
//!
//! Delivery is explicit message passing: the processor looks up the
//! handlers registered for an event's type and invokes them directly.
//! There is no implicit broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::OutboxEvent;
use thiserror::Error;

/// A handler failure. Failures are retried by the processor with backoff;
/// they never unwind the business mutation the event describes.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A side-effect handler for one or more event types (confirmation email,
/// analytics, warehouse dispatch, ...).
///
/// Delivery is at-least-once: a handler can see the same event again after
/// a partial failure, so side effects should be idempotent where feasible.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, used in logs and failure records.
    fn name(&self) -> &'static str;

    /// Processes one event.
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError>;
}

/// Registry mapping event types to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type. Multiple handlers per type
    /// are invoked in registration order.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    /// The handlers registered for an event type.
    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of registered (event type, handler) pairs.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl EventHandler for Nop {
        fn name(&self) -> &'static str {
            "nop"
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = HandlerRegistry::new();
        registry.register("order.created", Arc::new(Nop));
        registry.register("order.created", Arc::new(Nop));
        registry.register("order.status_changed", Arc::new(Nop));

        assert_eq!(registry.handlers_for("order.created").len(), 2);
        assert_eq!(registry.handlers_for("order.status_changed").len(), 1);
        assert!(registry.handlers_for("unknown").is_empty());
        assert_eq!(registry.len(), 3);
    }
}
