//! Staging events and the operator-facing maintenance operations.

use chrono::{DateTime, Utc};
use common::DlqEntryId;
use domain::{AggregateKind, OutboxEvent, OutboxStats};
use storage::{Storage, UnitOfWork};
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::{OutboxError, Result};

/// An event to stage, before the outbox assigns id/status/timing.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: Uuid,
    pub aggregate_kind: AggregateKind,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
}

impl NewOutboxEvent {
    /// Describes an event for an aggregate.
    pub fn new(
        aggregate_id: Uuid,
        aggregate_kind: AggregateKind,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_kind,
            event_type: event_type.into(),
            payload,
            idempotency_key: None,
        }
    }

    /// Attaches an idempotency key; staging the same key twice returns the
    /// already-staged event instead of inserting a duplicate.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Stages an event inside the caller's open unit of work.
///
/// The insert commits or rolls back together with the business mutation
/// that caused it, which is the outbox pattern's whole guarantee.
pub async fn enqueue(uow: &mut dyn UnitOfWork, event: NewOutboxEvent) -> Result<OutboxEvent> {
    enqueue_at(uow, event, Utc::now()).await
}

/// [`enqueue`] with an explicit clock.
pub async fn enqueue_at(
    uow: &mut dyn UnitOfWork,
    event: NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<OutboxEvent> {
    if let Some(key) = &event.idempotency_key
        && let Some(existing) = uow.outbox_event_by_idempotency_key(key).await?
    {
        tracing::debug!(
            idempotency_key = %key,
            event_id = %existing.id,
            "event already staged, returning existing row"
        );
        return Ok(existing);
    }

    let row = OutboxEvent::new(
        event.aggregate_id,
        event.aggregate_kind,
        event.event_type,
        event.payload,
        event.idempotency_key,
        now,
    );
    uow.insert_outbox_event(&row).await?;
    metrics::counter!("outbox_enqueued_total").increment(1);
    Ok(row)
}

/// Operator-facing outbox operations: DLQ replay, retention purge, health.
pub struct OutboxService<S: Storage> {
    storage: S,
    config: OutboxConfig,
}

impl<S: Storage> OutboxService<S> {
    /// Creates a service over the given storage.
    pub fn new(storage: S, config: OutboxConfig) -> Self {
        Self { storage, config }
    }

    /// Replays a dead-letter entry: re-inserts its payload as a fresh
    /// pending event with a reset retry count and marks the entry
    /// reprocessed. A second replay of the same entry is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn replay_dlq(&self, id: DlqEntryId) -> Result<OutboxEvent> {
        self.replay_dlq_at(id, Utc::now()).await
    }

    /// [`Self::replay_dlq`] with an explicit clock.
    pub async fn replay_dlq_at(&self, id: DlqEntryId, now: DateTime<Utc>) -> Result<OutboxEvent> {
        let mut uow = self.storage.begin().await?;
        let mut entry = uow
            .dlq_entry_for_update(id)
            .await?
            .ok_or(OutboxError::DlqEntryNotFound(id))?;
        if entry.reprocessed {
            return Err(OutboxError::AlreadyReprocessed(id));
        }

        let fresh = entry.to_fresh_event(now);
        uow.insert_outbox_event(&fresh).await?;
        entry.mark_reprocessed(now);
        uow.update_dlq_entry(&entry).await?;
        uow.commit().await?;

        metrics::counter!("outbox_dlq_replayed_total").increment(1);
        tracing::info!(dlq_entry = %id, event_id = %fresh.id, "dead-letter entry replayed");
        Ok(fresh)
    }

    /// Purges processed events older than the retention horizon.
    #[tracing::instrument(skip(self))]
    pub async fn purge_processed(&self) -> Result<u64> {
        self.purge_processed_at(Utc::now()).await
    }

    /// [`Self::purge_processed`] with an explicit clock.
    pub async fn purge_processed_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let horizon = now
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        let mut uow = self.storage.begin().await?;
        let purged = uow.purge_processed_outbox_events(horizon).await?;
        uow.commit().await?;
        if purged > 0 {
            tracing::info!(purged, "purged processed outbox events");
        }
        Ok(purged)
    }

    /// Derives the outbox health snapshot.
    pub async fn stats(&self) -> Result<OutboxStats> {
        Ok(self.storage.outbox_stats(Utc::now()).await?)
    }
}
