//! Transactional outbox for the checkout-to-order core.
//!
//! Events are staged with [`enqueue`] inside the caller's open unit of
//! work, so a row exists exactly when the business mutation commits. The
//! [`OutboxProcessor`] polls staged rows on an interval (one active pass
//! at a time), dispatches them to the registered handlers, retries with
//! jittered exponential backoff, and moves exhausted events to the
//! dead-letter queue. [`OutboxService`] carries the operator operations:
//! DLQ replay, retention purge, and the health snapshot.
//!
//! The retry loop only ever re-attempts the side effect; the business
//! mutation an event describes has already committed and is never re-run.

pub mod backoff;
pub mod config;
pub mod error;
pub mod handler;
pub mod processor;
pub mod service;

pub use backoff::{backoff_delay, backoff_delay_with_jitter};
pub use config::OutboxConfig;
pub use error::OutboxError;
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use processor::{OutboxProcessor, ProcessingReport};
pub use service::{NewOutboxEvent, OutboxService, enqueue, enqueue_at};
