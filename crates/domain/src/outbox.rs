//! Outbox and dead-letter rows.
//!
//! An outbox event is created in the same transaction as the business
//! mutation it describes, so it is never lost if the mutation commits and
//! never observed if it rolls back. Delivery mechanics (polling, backoff,
//! dead-lettering) live in the `outbox` crate; these are the rows.

use chrono::{DateTime, Utc};
use common::{DlqEntryId, InvalidEnumValue, OutboxEventId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which aggregate an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Order,
    OrderLineItem,
}

impl AggregateKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Order => "order",
            AggregateKind::OrderLineItem => "order_line_item",
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AggregateKind {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(AggregateKind::Order),
            "order_line_item" => Ok(AggregateKind::OrderLineItem),
            other => Err(InvalidEnumValue::new("aggregate kind", other)),
        }
    }
}

/// Delivery status of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Written, not yet picked up.
    Pending,
    /// Claimed by a processing pass.
    Processing,
    /// All handlers succeeded.
    Processed,
    /// At least one handler failed; will be retried after backoff.
    Failed,
}

impl OutboxStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(InvalidEnumValue::new("outbox status", other)),
        }
    }
}

/// One failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub occurred_at: DateTime<Utc>,
    pub message: String,
}

/// A durably staged domain event awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub aggregate_id: Uuid,
    pub aggregate_kind: AggregateKind,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    /// Earliest moment the event becomes eligible for (re)delivery.
    pub next_retry_at: DateTime<Utc>,
    /// Guards against staging the same logical event twice.
    pub idempotency_key: Option<String>,
    /// One record per failed attempt, carried into the DLQ verbatim.
    pub failure_log: Vec<FailureRecord>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Stages a new pending event, eligible immediately.
    pub fn new(
        aggregate_id: Uuid,
        aggregate_kind: AggregateKind,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxEventId::new(),
            aggregate_id,
            aggregate_kind,
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: now,
            idempotency_key,
            failure_log: Vec::new(),
            created_at: now,
            processed_at: None,
        }
    }

    /// Marks the event claimed by a processing pass.
    pub fn mark_processing(&mut self) {
        self.status = OutboxStatus::Processing;
    }

    /// Marks the event delivered.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(now);
    }

    /// Records a failed attempt and schedules the retry.
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = OutboxStatus::Failed;
        self.retry_count += 1;
        self.next_retry_at = retry_at;
        self.failure_log.push(FailureRecord {
            occurred_at: now,
            message: message.into(),
        });
    }

    /// Returns true once at least one delivery attempt failed.
    pub fn needed_retry(&self) -> bool {
        self.retry_count > 0
    }
}

/// Terminal copy of an event that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxDlqEntry {
    pub id: DlqEntryId,
    /// The live event this entry was moved from.
    pub event_id: OutboxEventId,
    pub aggregate_id: Uuid,
    pub aggregate_kind: AggregateKind,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub failure_log: Vec<FailureRecord>,
    /// Set once the entry has been replayed; a second replay is rejected.
    pub reprocessed: bool,
    pub created_at: DateTime<Utc>,
    pub reprocessed_at: Option<DateTime<Utc>>,
}

impl OutboxDlqEntry {
    /// Copies an exhausted event verbatim into the DLQ.
    pub fn from_event(event: &OutboxEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: DlqEntryId::new(),
            event_id: event.id,
            aggregate_id: event.aggregate_id,
            aggregate_kind: event.aggregate_kind,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            retry_count: event.retry_count,
            failure_log: event.failure_log.clone(),
            reprocessed: false,
            created_at: now,
            reprocessed_at: None,
        }
    }

    /// Stamps the single allowed replay.
    pub fn mark_reprocessed(&mut self, now: DateTime<Utc>) {
        self.reprocessed = true;
        self.reprocessed_at = Some(now);
    }

    /// Rebuilds a fresh pending event from this entry for replay.
    pub fn to_fresh_event(&self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent::new(
            self.aggregate_id,
            self.aggregate_kind,
            self.event_type.clone(),
            self.payload.clone(),
            None,
            now,
        )
    }
}

/// Read-only health snapshot of the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
    pub dlq_size: u64,
    /// Mean creation-to-processed latency over retained processed events.
    pub avg_processing_millis: Option<f64>,
    /// Fraction of observed events that needed at least one retry.
    pub retried_fraction: f64,
    /// Age of the oldest event still awaiting delivery ("lag").
    pub oldest_pending_age_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent::new(
            Uuid::new_v4(),
            AggregateKind::Order,
            "order.created",
            serde_json::json!({"order_id": "x"}),
            Some("order-created-x".to_string()),
            now,
        )
    }

    #[test]
    fn new_event_is_immediately_eligible() {
        let now = Utc::now();
        let event = event(now);
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.next_retry_at, now);
        assert!(!event.needed_retry());
    }

    #[test]
    fn failures_accumulate_history() {
        let now = Utc::now();
        let mut event = event(now);
        event.record_failure("smtp timeout", now + chrono::Duration::seconds(5), now);
        event.record_failure("smtp refused", now + chrono::Duration::seconds(20), now);

        assert_eq!(event.status, OutboxStatus::Failed);
        assert_eq!(event.retry_count, 2);
        assert_eq!(event.failure_log.len(), 2);
        assert!(event.needed_retry());
    }

    #[test]
    fn dlq_entry_carries_history_verbatim() {
        let now = Utc::now();
        let mut event = event(now);
        event.record_failure("boom", now, now);
        let entry = OutboxDlqEntry::from_event(&event, now);

        assert_eq!(entry.event_id, event.id);
        assert_eq!(entry.failure_log, event.failure_log);
        assert_eq!(entry.payload, event.payload);
        assert!(!entry.reprocessed);
    }

    #[test]
    fn replayed_entry_yields_reset_event() {
        let now = Utc::now();
        let mut event = event(now);
        event.record_failure("boom", now, now);
        let entry = OutboxDlqEntry::from_event(&event, now);

        let later = now + chrono::Duration::hours(1);
        let fresh = entry.to_fresh_event(later);
        assert_ne!(fresh.id, event.id);
        assert_eq!(fresh.retry_count, 0);
        assert_eq!(fresh.status, OutboxStatus::Pending);
        assert_eq!(fresh.payload, event.payload);
        assert!(fresh.failure_log.is_empty());
    }
}
