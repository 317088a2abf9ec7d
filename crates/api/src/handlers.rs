//! Default event handlers for local wiring.
//!
//! The real side-effect integrations (email, analytics, warehouse) live
//! outside this core; these handlers log the dispatch so the pipeline is
//! observable end to end without them.

use async_trait::async_trait;
use domain::OutboxEvent;
use outbox::{EventHandler, HandlerError};

/// Logs every event it receives under a fixed handler name.
pub struct LogHandler {
    name: &'static str,
}

impl LogHandler {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl EventHandler for LogHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        tracing::info!(
            handler = self.name,
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "event dispatched"
        );
        Ok(())
    }
}
