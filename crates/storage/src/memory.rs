//! In-memory storage backend.
//!
//! A single mutex over the whole table set serializes transactions, which
//! gives the same pessimistic-locking semantics as the PostgreSQL backend
//! at the coarsest possible granularity. Each unit of work stages a copy
//! of the tables and writes it back on commit, so dropping an uncommitted
//! unit of work is a rollback.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutSessionId, DlqEntryId, LineItemId, OrderId, OutboxEventId, VariantId};
use domain::{
    CheckoutSession, Order, OrderLineItem, OrderStatusTransition, OutboxDlqEntry, OutboxEvent,
    OutboxStats, OutboxStatus, StockLevel,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::Result;
use crate::uow::{Storage, UnitOfWork};

#[derive(Clone, Default)]
struct Tables {
    checkout_sessions: HashMap<CheckoutSessionId, CheckoutSession>,
    orders: HashMap<OrderId, Order>,
    line_items: HashMap<LineItemId, OrderLineItem>,
    transitions: Vec<OrderStatusTransition>,
    outbox: HashMap<OutboxEventId, OutboxEvent>,
    dlq: HashMap<DlqEntryId, OutboxDlqEntry>,
    stock: HashMap<VariantId, StockLevel>,
}

/// In-memory storage for tests and single-process wiring.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
    // Kept outside the tables so draws survive rollback, like a database
    // sequence.
    order_number_seq: Arc<AtomicU64>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stock ledger row outside any transaction (test setup).
    pub async fn seed_stock(&self, level: StockLevel) {
        self.tables
            .lock()
            .await
            .stock
            .insert(level.variant_id, level);
    }

    /// Returns the number of live outbox rows (test inspection).
    pub async fn outbox_len(&self) -> usize {
        self.tables.lock().await.outbox.len()
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    order_number_seq: Arc<AtomicU64>,
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged,
            order_number_seq: Arc::clone(&self.order_number_seq),
        }))
    }

    async fn checkout_session(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>> {
        Ok(self.tables.lock().await.checkout_sessions.get(&id).cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn line_item(&self, id: LineItemId) -> Result<Option<OrderLineItem>> {
        Ok(self.tables.lock().await.line_items.get(&id).cloned())
    }

    async fn line_items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let tables = self.tables.lock().await;
        Ok(items_for_order(&tables, order_id))
    }

    async fn status_transitions_for_item(
        &self,
        item_id: LineItemId,
    ) -> Result<Vec<OrderStatusTransition>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transitions
            .iter()
            .filter(|t| t.line_item_id == item_id)
            .cloned()
            .collect())
    }

    async fn stock_level(&self, variant_id: VariantId) -> Result<Option<StockLevel>> {
        Ok(self.tables.lock().await.stock.get(&variant_id).cloned())
    }

    async fn outbox_event(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        Ok(self.tables.lock().await.outbox.get(&id).cloned())
    }

    async fn dlq_entry(&self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>> {
        Ok(self.tables.lock().await.dlq.get(&id).cloned())
    }

    async fn dlq_entries(&self) -> Result<Vec<OutboxDlqEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<_> = tables.dlq.values().cloned().collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn outbox_stats(&self, now: DateTime<Utc>) -> Result<OutboxStats> {
        let tables = self.tables.lock().await;
        let count = |status: OutboxStatus| {
            tables.outbox.values().filter(|e| e.status == status).count() as u64
        };

        let latencies: Vec<i64> = tables
            .outbox
            .values()
            .filter_map(|e| {
                e.processed_at
                    .map(|done| (done - e.created_at).num_milliseconds())
            })
            .collect();
        let avg_processing_millis = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<i64>() as f64 / latencies.len() as f64)
        };

        let live_total = tables.outbox.len() as u64;
        let dlq_size = tables.dlq.len() as u64;
        let retried_live = tables.outbox.values().filter(|e| e.needed_retry()).count() as u64;
        let observed = live_total + dlq_size;
        let retried_fraction = if observed == 0 {
            0.0
        } else {
            (retried_live + dlq_size) as f64 / observed as f64
        };

        let oldest_pending_age_secs = tables
            .outbox
            .values()
            .filter(|e| matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed))
            .map(|e| e.created_at)
            .min()
            .map(|oldest| (now - oldest).num_seconds());

        Ok(OutboxStats {
            pending: count(OutboxStatus::Pending),
            processing: count(OutboxStatus::Processing),
            processed: count(OutboxStatus::Processed),
            failed: count(OutboxStatus::Failed),
            dlq_size,
            avg_processing_millis,
            retried_fraction,
            oldest_pending_age_secs,
        })
    }
}

fn items_for_order(tables: &Tables, order_id: OrderId) -> Vec<OrderLineItem> {
    let mut items: Vec<_> = tables
        .line_items
        .values()
        .filter(|i| i.order_id == order_id)
        .cloned()
        .collect();
    items.sort_by_key(|i| (i.created_at, i.id));
    items
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_checkout_session(&mut self, session: &CheckoutSession) -> Result<()> {
        self.staged
            .checkout_sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn checkout_session_for_update(
        &mut self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>> {
        Ok(self.staged.checkout_sessions.get(&id).cloned())
    }

    async fn update_checkout_session(&mut self, session: &CheckoutSession) -> Result<()> {
        self.staged
            .checkout_sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn next_order_number(&mut self) -> Result<u64> {
        Ok(self.order_number_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_line_item(&mut self, item: &OrderLineItem) -> Result<()> {
        self.staged.line_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn line_item_for_update(&mut self, id: LineItemId) -> Result<Option<OrderLineItem>> {
        Ok(self.staged.line_items.get(&id).cloned())
    }

    async fn update_line_item(&mut self, item: &OrderLineItem) -> Result<()> {
        self.staged.line_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn line_items_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        Ok(items_for_order(&self.staged, order_id))
    }

    async fn insert_status_transition(
        &mut self,
        transition: &OrderStatusTransition,
    ) -> Result<()> {
        self.staged.transitions.push(transition.clone());
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        self.staged.outbox.insert(event.id, event.clone());
        Ok(())
    }

    async fn outbox_event_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<OutboxEvent>> {
        Ok(self
            .staged
            .outbox
            .values()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn ready_outbox_events(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        let mut ready: Vec<_> = self
            .staged
            .outbox
            .values()
            .filter(|e| {
                matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && e.next_retry_at <= now
            })
            .cloned()
            .collect();
        ready.sort_by_key(|e| (e.created_at, e.id));
        ready.truncate(limit);
        Ok(ready)
    }

    async fn update_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        self.staged.outbox.insert(event.id, event.clone());
        Ok(())
    }

    async fn delete_outbox_event(&mut self, id: OutboxEventId) -> Result<()> {
        self.staged.outbox.remove(&id);
        Ok(())
    }

    async fn purge_processed_outbox_events(&mut self, older_than: DateTime<Utc>) -> Result<u64> {
        let before = self.staged.outbox.len();
        self.staged.outbox.retain(|_, e| {
            !(e.status == OutboxStatus::Processed && e.created_at < older_than)
        });
        Ok((before - self.staged.outbox.len()) as u64)
    }

    async fn insert_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()> {
        self.staged.dlq.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn dlq_entry_for_update(&mut self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>> {
        Ok(self.staged.dlq.get(&id).cloned())
    }

    async fn update_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()> {
        self.staged.dlq.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn insert_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        self.staged.stock.insert(level.variant_id, level.clone());
        Ok(())
    }

    async fn stock_level_for_update(
        &mut self,
        variant_id: VariantId,
    ) -> Result<Option<StockLevel>> {
        Ok(self.staged.stock.get(&variant_id).cloned())
    }

    async fn update_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        self.staged.stock.insert(level.variant_id, level.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUnitOfWork {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Dropping the staged copy and the guard discards everything.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::AggregateKind;
    use uuid::Uuid;

    fn event(now: DateTime<Utc>, kind: &str) -> OutboxEvent {
        OutboxEvent::new(
            Uuid::new_v4(),
            AggregateKind::Order,
            kind,
            serde_json::json!({}),
            None,
            now,
        )
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let level = StockLevel::new(VariantId::new(), 5, true, now);

        let mut uow = store.begin().await.unwrap();
        uow.insert_stock_level(&level).await.unwrap();
        uow.commit().await.unwrap();

        let read = store.stock_level(level.variant_id).await.unwrap().unwrap();
        assert_eq!(read.on_hand, 5);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let level = StockLevel::new(VariantId::new(), 5, true, now);

        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_stock_level(&level).await.unwrap();
            // No commit.
        }

        assert!(store.stock_level(level.variant_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_rollback_discards_writes() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let event = event(now, "order.created");

        let mut uow = store.begin().await.unwrap();
        uow.insert_outbox_event(&event).await.unwrap();
        uow.rollback().await.unwrap();

        assert!(store.outbox_event(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sequence_survives_rollback() {
        let store = InMemoryStorage::new();

        let mut uow = store.begin().await.unwrap();
        let first = uow.next_order_number().await.unwrap();
        uow.rollback().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let second = uow.next_order_number().await.unwrap();
        uow.commit().await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn ready_events_are_oldest_first_and_limited() {
        let store = InMemoryStorage::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let mut old = event(now - Duration::minutes(10), "a");
        let mid = event(now - Duration::minutes(5), "b");
        let future = {
            let mut e = event(now - Duration::minutes(1), "c");
            e.next_retry_at = now + Duration::minutes(5);
            e
        };
        old.record_failure("boom", now - Duration::minutes(1), now - Duration::minutes(9));
        uow.insert_outbox_event(&old).await.unwrap();
        uow.insert_outbox_event(&mid).await.unwrap();
        uow.insert_outbox_event(&future).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let ready = uow.ready_outbox_events(10, now).await.unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].id, old.id, "failed rows poll by creation time");
        assert_eq!(ready[1].id, mid.id);

        let just_one = uow.ready_outbox_events(1, now).await.unwrap();
        assert_eq!(just_one.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_old_processed_rows() {
        let store = InMemoryStorage::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let mut old_processed = event(now - Duration::days(40), "a");
        old_processed.mark_processed(now - Duration::days(40));
        let mut new_processed = event(now - Duration::days(2), "b");
        new_processed.mark_processed(now - Duration::days(2));
        let old_pending = event(now - Duration::days(40), "c");
        uow.insert_outbox_event(&old_processed).await.unwrap();
        uow.insert_outbox_event(&new_processed).await.unwrap();
        uow.insert_outbox_event(&old_pending).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let purged = uow
            .purge_processed_outbox_events(now - Duration::days(30))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(purged, 1);
        assert!(store.outbox_event(old_processed.id).await.unwrap().is_none());
        assert!(store.outbox_event(new_processed.id).await.unwrap().is_some());
        assert!(store.outbox_event(old_pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_reflect_outbox_state() {
        let store = InMemoryStorage::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let pending = event(now - Duration::seconds(90), "a");
        let mut processed = event(now - Duration::seconds(60), "b");
        processed.mark_processed(now - Duration::seconds(30));
        let mut failed = event(now - Duration::seconds(45), "c");
        failed.record_failure("boom", now + Duration::seconds(10), now);
        uow.insert_outbox_event(&pending).await.unwrap();
        uow.insert_outbox_event(&processed).await.unwrap();
        uow.insert_outbox_event(&failed).await.unwrap();
        uow.commit().await.unwrap();

        let stats = store.outbox_stats(now).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dlq_size, 0);
        assert_eq!(stats.avg_processing_millis, Some(30_000.0));
        assert!((stats.retried_fraction - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.oldest_pending_age_secs, Some(90));
    }
}
