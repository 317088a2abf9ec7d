//! The storage traits: explicit transaction contexts over the core's
//! tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutSessionId, DlqEntryId, LineItemId, OrderId, OutboxEventId, VariantId};
use domain::{
    CheckoutSession, Order, OrderLineItem, OrderStatusTransition, OutboxDlqEntry, OutboxEvent,
    OutboxStats, StockLevel,
};

use crate::Result;

/// Hands out transaction contexts and answers lock-free reads.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Opens a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Reads a checkout session without locking.
    async fn checkout_session(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>>;

    /// Reads an order without locking.
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Reads a line item without locking.
    async fn line_item(&self, id: LineItemId) -> Result<Option<OrderLineItem>>;

    /// Reads all line items of an order without locking.
    async fn line_items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>>;

    /// Reads the audit trail of a line item, oldest first.
    async fn status_transitions_for_item(
        &self,
        item_id: LineItemId,
    ) -> Result<Vec<OrderStatusTransition>>;

    /// Reads a stock ledger row without locking.
    async fn stock_level(&self, variant_id: VariantId) -> Result<Option<StockLevel>>;

    /// Reads a live outbox event without locking.
    async fn outbox_event(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>>;

    /// Reads a dead-letter entry without locking.
    async fn dlq_entry(&self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>>;

    /// Lists dead-letter entries, oldest first.
    async fn dlq_entries(&self) -> Result<Vec<OutboxDlqEntry>>;

    /// Derives the outbox health snapshot.
    async fn outbox_stats(&self, now: DateTime<Utc>) -> Result<OutboxStats>;
}

/// One transaction over the core's tables.
///
/// `*_for_update` reads take an exclusive row lock held until commit or
/// rollback; concurrent writers to the same row serialize behind it.
/// Dropping the unit of work without committing rolls everything back.
#[async_trait]
pub trait UnitOfWork: Send {
    // -- checkout sessions --

    async fn insert_checkout_session(&mut self, session: &CheckoutSession) -> Result<()>;

    async fn checkout_session_for_update(
        &mut self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>>;

    async fn update_checkout_session(&mut self, session: &CheckoutSession) -> Result<()>;

    // -- orders --

    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>>;

    async fn update_order(&mut self, order: &Order) -> Result<()>;

    /// Draws the next value from the order-number sequence.
    ///
    /// Sequence draws survive rollback, which is exactly what keeps
    /// concurrently generated order numbers collision-free.
    async fn next_order_number(&mut self) -> Result<u64>;

    // -- line items --

    async fn insert_line_item(&mut self, item: &OrderLineItem) -> Result<()>;

    async fn line_item_for_update(&mut self, id: LineItemId) -> Result<Option<OrderLineItem>>;

    async fn update_line_item(&mut self, item: &OrderLineItem) -> Result<()>;

    async fn line_items_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLineItem>>;

    // -- audit (append-only) --

    async fn insert_status_transition(&mut self, transition: &OrderStatusTransition)
    -> Result<()>;

    // -- outbox --

    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<()>;

    async fn outbox_event_by_idempotency_key(&mut self, key: &str)
    -> Result<Option<OutboxEvent>>;

    /// Events eligible for delivery: `pending` or `failed` with
    /// `next_retry_at <= now`, oldest first, locked for this transaction
    /// (skipping rows another processor already claimed).
    async fn ready_outbox_events(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>>;

    async fn update_outbox_event(&mut self, event: &OutboxEvent) -> Result<()>;

    async fn delete_outbox_event(&mut self, id: OutboxEventId) -> Result<()>;

    /// Deletes processed events older than the horizon; returns how many.
    async fn purge_processed_outbox_events(&mut self, older_than: DateTime<Utc>) -> Result<u64>;

    // -- dead letters --

    async fn insert_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()>;

    async fn dlq_entry_for_update(&mut self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>>;

    async fn update_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()>;

    // -- stock ledger --

    async fn insert_stock_level(&mut self, level: &StockLevel) -> Result<()>;

    async fn stock_level_for_update(&mut self, variant_id: VariantId)
    -> Result<Option<StockLevel>>;

    async fn update_stock_level(&mut self, level: &StockLevel) -> Result<()>;

    // -- transaction boundary --

    /// Commits all writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all writes. Dropping without commit has the same effect.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
