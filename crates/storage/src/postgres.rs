//! PostgreSQL storage backend.
//!
//! Uses runtime-bound sqlx queries with `FOR UPDATE` row locks inside the
//! unit-of-work transaction, and `FOR UPDATE SKIP LOCKED` for the outbox
//! poll so concurrent processors never double-claim a row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CheckoutSessionId, DlqEntryId, LineItemId, OrderId, OrderNumber, OutboxEventId, VariantId,
};
use domain::{
    CheckoutSession, Order, OrderLineItem, OrderStatusTransition, OutboxDlqEntry, OutboxEvent,
    OutboxStats, OutboxStatus, StockLevel,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::Result;
use crate::uow::{Storage, UnitOfWork};

/// PostgreSQL-backed storage.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new PostgreSQL storage over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

const SESSION_COLUMNS: &str = "id, owner, contact_email, cart, shipping_address, \
     billing_address, totals, payment_method, promo_codes, status, expires_at, order_id, \
     created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, owner, currency, subtotal, tax, shipping, \
     discount, total, payment_status, status, checkout_session_id, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, merchant_id, variant_id, product_name, kind, quantity, \
     unit_price, line_total, currency, status, fulfillment, history, created_at, updated_at";

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_kind, event_type, payload, status, \
     retry_count, next_retry_at, idempotency_key, failure_log, created_at, processed_at";

const DLQ_COLUMNS: &str = "id, event_id, aggregate_id, aggregate_kind, event_type, payload, \
     retry_count, failure_log, reprocessed, created_at, reprocessed_at";

fn row_to_session(row: &PgRow) -> Result<CheckoutSession> {
    let payment_method: Option<String> = row.try_get("payment_method")?;
    Ok(CheckoutSession {
        id: CheckoutSessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        owner: serde_json::from_value(row.try_get("owner")?)?,
        contact_email: row.try_get("contact_email")?,
        cart: serde_json::from_value(row.try_get("cart")?)?,
        shipping_address: row
            .try_get::<Option<serde_json::Value>, _>("shipping_address")?
            .map(serde_json::from_value)
            .transpose()?,
        billing_address: row
            .try_get::<Option<serde_json::Value>, _>("billing_address")?
            .map(serde_json::from_value)
            .transpose()?,
        totals: serde_json::from_value(row.try_get("totals")?)?,
        payment_method: payment_method.as_deref().map(str::parse).transpose()?,
        promo_codes: serde_json::from_value(row.try_get("promo_codes")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        expires_at: row.try_get("expires_at")?,
        order_id: row
            .try_get::<Option<Uuid>, _>("order_id")?
            .map(OrderId::from_uuid),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_number: OrderNumber::new(row.try_get::<String, _>("order_number")?),
        owner: serde_json::from_value(row.try_get("owner")?)?,
        currency: row.try_get::<String, _>("currency")?.parse()?,
        subtotal: common::Money::from_cents(row.try_get("subtotal")?),
        tax: common::Money::from_cents(row.try_get("tax")?),
        shipping: common::Money::from_cents(row.try_get("shipping")?),
        discount: common::Money::from_cents(row.try_get("discount")?),
        total: common::Money::from_cents(row.try_get("total")?),
        payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        checkout_session_id: row
            .try_get::<Option<Uuid>, _>("checkout_session_id")?
            .map(CheckoutSessionId::from_uuid),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderLineItem> {
    Ok(OrderLineItem {
        id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        merchant_id: common::MerchantId::from_uuid(row.try_get::<Uuid, _>("merchant_id")?),
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        product_name: row.try_get("product_name")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        quantity: row.try_get::<i32, _>("quantity")? as u32,
        unit_price: common::Money::from_cents(row.try_get("unit_price")?),
        line_total: common::Money::from_cents(row.try_get("line_total")?),
        currency: row.try_get::<String, _>("currency")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        fulfillment: serde_json::from_value(row.try_get("fulfillment")?)?,
        history: serde_json::from_value(row.try_get("history")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transition(row: &PgRow) -> Result<OrderStatusTransition> {
    let from_status: Option<String> = row.try_get("from_status")?;
    Ok(OrderStatusTransition {
        id: row.try_get("id")?,
        line_item_id: LineItemId::from_uuid(row.try_get::<Uuid, _>("line_item_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        from_status: from_status.as_deref().map(str::parse).transpose()?,
        to_status: row.try_get::<String, _>("to_status")?.parse()?,
        reason: row.try_get("reason")?,
        actor: row.try_get::<String, _>("actor")?.parse()?,
        occurred_at: row.try_get("occurred_at")?,
    })
}

fn row_to_outbox_event(row: &PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_kind: row.try_get::<String, _>("aggregate_kind")?.parse()?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        next_retry_at: row.try_get("next_retry_at")?,
        idempotency_key: row.try_get("idempotency_key")?,
        failure_log: serde_json::from_value(row.try_get("failure_log")?)?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_dlq_entry(row: &PgRow) -> Result<OutboxDlqEntry> {
    Ok(OutboxDlqEntry {
        id: DlqEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_kind: row.try_get::<String, _>("aggregate_kind")?.parse()?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        failure_log: serde_json::from_value(row.try_get("failure_log")?)?,
        reprocessed: row.try_get("reprocessed")?,
        created_at: row.try_get("created_at")?,
        reprocessed_at: row.try_get("reprocessed_at")?,
    })
}

fn row_to_stock(row: &PgRow) -> Result<StockLevel> {
    Ok(StockLevel {
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        on_hand: row.try_get::<i32, _>("on_hand")? as u32,
        enforce_limit: row.try_get("enforce_limit")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn checkout_session(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM checkout_sessions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn line_item(&self, id: LineItemId) -> Result<Option<OrderLineItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_line_items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn line_items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_line_items WHERE order_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn status_transitions_for_item(
        &self,
        item_id: LineItemId,
    ) -> Result<Vec<OrderStatusTransition>> {
        let rows = sqlx::query(
            "SELECT id, line_item_id, order_id, from_status, to_status, reason, actor, occurred_at \
             FROM order_status_transitions WHERE line_item_id = $1 ORDER BY occurred_at ASC, id ASC",
        )
        .bind(item_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transition).collect()
    }

    async fn stock_level(&self, variant_id: VariantId) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            "SELECT variant_id, on_hand, enforce_limit, updated_at FROM stock_levels \
             WHERE variant_id = $1",
        )
        .bind(variant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_stock).transpose()
    }

    async fn outbox_event(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM order_outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_outbox_event).transpose()
    }

    async fn dlq_entry(&self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>> {
        let sql = format!("SELECT {DLQ_COLUMNS} FROM order_outbox_dlq WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_dlq_entry).transpose()
    }

    async fn dlq_entries(&self) -> Result<Vec<OutboxDlqEntry>> {
        let sql =
            format!("SELECT {DLQ_COLUMNS} FROM order_outbox_dlq ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_dlq_entry).collect()
    }

    async fn outbox_stats(&self, now: DateTime<Utc>) -> Result<OutboxStats> {
        let counts = sqlx::query("SELECT status, COUNT(*) AS n FROM order_outbox GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut pending = 0u64;
        let mut processing = 0u64;
        let mut processed = 0u64;
        let mut failed = 0u64;
        for row in &counts {
            let status: OutboxStatus = row.try_get::<String, _>("status")?.parse()?;
            let n = row.try_get::<i64, _>("n")? as u64;
            match status {
                OutboxStatus::Pending => pending = n,
                OutboxStatus::Processing => processing = n,
                OutboxStatus::Processed => processed = n,
                OutboxStatus::Failed => failed = n,
            }
        }

        let dlq_size: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_outbox_dlq")
            .fetch_one(&self.pool)
            .await?;

        let avg_processing_millis: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(EXTRACT(EPOCH FROM (processed_at - created_at)) * 1000.0)::float8 \
             FROM order_outbox WHERE processed_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let retried_live: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM order_outbox WHERE retry_count > 0")
                .fetch_one(&self.pool)
                .await?;
        let live_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_outbox")
            .fetch_one(&self.pool)
            .await?;

        let oldest_pending: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(created_at) FROM order_outbox WHERE status IN ('pending', 'failed')",
        )
        .fetch_one(&self.pool)
        .await?;

        let observed = live_total as u64 + dlq_size as u64;
        let retried_fraction = if observed == 0 {
            0.0
        } else {
            (retried_live as u64 + dlq_size as u64) as f64 / observed as f64
        };

        Ok(OutboxStats {
            pending,
            processing,
            processed,
            failed,
            dlq_size: dlq_size as u64,
            avg_processing_millis,
            retried_fraction,
            oldest_pending_age_secs: oldest_pending.map(|oldest| (now - oldest).num_seconds()),
        })
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn insert_checkout_session(&mut self, session: &CheckoutSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO checkout_sessions \
             (id, owner, contact_email, cart, shipping_address, billing_address, totals, \
              payment_method, promo_codes, status, expires_at, order_id, created_at, \
              updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(session.id.as_uuid())
        .bind(serde_json::to_value(&session.owner)?)
        .bind(session.contact_email.as_deref())
        .bind(serde_json::to_value(&session.cart)?)
        .bind(
            session
                .shipping_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(
            session
                .billing_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(serde_json::to_value(session.totals)?)
        .bind(session.payment_method.map(|m| m.as_str()))
        .bind(serde_json::to_value(&session.promo_codes)?)
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.order_id.map(|id| id.as_uuid()))
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn checkout_session_for_update(
        &mut self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM checkout_sessions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn update_checkout_session(&mut self, session: &CheckoutSession) -> Result<()> {
        sqlx::query(
            "UPDATE checkout_sessions SET owner = $2, contact_email = $3, cart = $4, \
             shipping_address = $5, billing_address = $6, totals = $7, payment_method = $8, \
             promo_codes = $9, status = $10, expires_at = $11, order_id = $12, \
             updated_at = $13 WHERE id = $1",
        )
        .bind(session.id.as_uuid())
        .bind(serde_json::to_value(&session.owner)?)
        .bind(session.contact_email.as_deref())
        .bind(serde_json::to_value(&session.cart)?)
        .bind(
            session
                .shipping_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(
            session
                .billing_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(serde_json::to_value(session.totals)?)
        .bind(session.payment_method.map(|m| m.as_str()))
        .bind(serde_json::to_value(&session.promo_codes)?)
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.order_id.map(|id| id.as_uuid()))
        .bind(session.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders \
             (id, order_number, owner, currency, subtotal, tax, shipping, discount, total, \
              payment_status, status, checkout_session_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(serde_json::to_value(&order.owner)?)
        .bind(order.currency.as_str())
        .bind(order.subtotal.cents())
        .bind(order.tax.cents())
        .bind(order.shipping.cents())
        .bind(order.discount.cents())
        .bind(order.total.cents())
        .bind(order.payment_status.as_str())
        .bind(order.status.as_str())
        .bind(order.checkout_session_id.map(|id| id.as_uuid()))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET payment_status = $2, status = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(order.id.as_uuid())
        .bind(order.payment_status.as_str())
        .bind(order.status.as_str())
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn next_order_number(&mut self) -> Result<u64> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('order_numbers')")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(value as u64)
    }

    async fn insert_line_item(&mut self, item: &OrderLineItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_line_items \
             (id, order_id, merchant_id, variant_id, product_name, kind, quantity, unit_price, \
              line_total, currency, status, fulfillment, history, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(item.id.as_uuid())
        .bind(item.order_id.as_uuid())
        .bind(item.merchant_id.as_uuid())
        .bind(item.variant_id.as_uuid())
        .bind(&item.product_name)
        .bind(item.kind.as_str())
        .bind(item.quantity as i32)
        .bind(item.unit_price.cents())
        .bind(item.line_total.cents())
        .bind(item.currency.as_str())
        .bind(item.status.as_str())
        .bind(serde_json::to_value(&item.fulfillment)?)
        .bind(serde_json::to_value(&item.history)?)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn line_item_for_update(&mut self, id: LineItemId) -> Result<Option<OrderLineItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_line_items WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn update_line_item(&mut self, item: &OrderLineItem) -> Result<()> {
        sqlx::query(
            "UPDATE order_line_items SET status = $2, fulfillment = $3, history = $4, \
             updated_at = $5 WHERE id = $1",
        )
        .bind(item.id.as_uuid())
        .bind(item.status.as_str())
        .bind(serde_json::to_value(&item.fulfillment)?)
        .bind(serde_json::to_value(&item.history)?)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn line_items_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_line_items WHERE order_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn insert_status_transition(
        &mut self,
        transition: &OrderStatusTransition,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_status_transitions \
             (id, line_item_id, order_id, from_status, to_status, reason, actor, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(transition.id)
        .bind(transition.line_item_id.as_uuid())
        .bind(transition.order_id.as_uuid())
        .bind(transition.from_status.map(|s| s.as_str()))
        .bind(transition.to_status.as_str())
        .bind(&transition.reason)
        .bind(transition.actor.as_str())
        .bind(transition.occurred_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_outbox \
             (id, aggregate_id, aggregate_kind, event_type, payload, status, retry_count, \
              next_retry_at, idempotency_key, failure_log, created_at, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(event.id.as_uuid())
        .bind(event.aggregate_id)
        .bind(event.aggregate_kind.as_str())
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(event.next_retry_at)
        .bind(event.idempotency_key.as_deref())
        .bind(serde_json::to_value(&event.failure_log)?)
        .bind(event.created_at)
        .bind(event.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn outbox_event_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM order_outbox WHERE idempotency_key = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_outbox_event).transpose()
    }

    async fn ready_outbox_events(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM order_outbox \
             WHERE status IN ('pending', 'failed') AND next_retry_at <= $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2 FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_outbox_event).collect()
    }

    async fn update_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            "UPDATE order_outbox SET status = $2, retry_count = $3, next_retry_at = $4, \
             failure_log = $5, processed_at = $6 WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(event.next_retry_at)
        .bind(serde_json::to_value(&event.failure_log)?)
        .bind(event.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_outbox_event(&mut self, id: OutboxEventId) -> Result<()> {
        sqlx::query("DELETE FROM order_outbox WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn purge_processed_outbox_events(&mut self, older_than: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM order_outbox WHERE status = 'processed' AND created_at < $1")
                .bind(older_than)
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected())
    }

    async fn insert_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_outbox_dlq \
             (id, event_id, aggregate_id, aggregate_kind, event_type, payload, retry_count, \
              failure_log, reprocessed, created_at, reprocessed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_id.as_uuid())
        .bind(entry.aggregate_id)
        .bind(entry.aggregate_kind.as_str())
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.retry_count as i32)
        .bind(serde_json::to_value(&entry.failure_log)?)
        .bind(entry.reprocessed)
        .bind(entry.created_at)
        .bind(entry.reprocessed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn dlq_entry_for_update(&mut self, id: DlqEntryId) -> Result<Option<OutboxDlqEntry>> {
        let sql = format!("SELECT {DLQ_COLUMNS} FROM order_outbox_dlq WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_dlq_entry).transpose()
    }

    async fn update_dlq_entry(&mut self, entry: &OutboxDlqEntry) -> Result<()> {
        sqlx::query(
            "UPDATE order_outbox_dlq SET reprocessed = $2, reprocessed_at = $3 WHERE id = $1",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.reprocessed)
        .bind(entry.reprocessed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        sqlx::query(
            "INSERT INTO stock_levels (variant_id, on_hand, enforce_limit, updated_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(level.variant_id.as_uuid())
        .bind(level.on_hand as i32)
        .bind(level.enforce_limit)
        .bind(level.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn stock_level_for_update(
        &mut self,
        variant_id: VariantId,
    ) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            "SELECT variant_id, on_hand, enforce_limit, updated_at FROM stock_levels \
             WHERE variant_id = $1 FOR UPDATE",
        )
        .bind(variant_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_stock).transpose()
    }

    async fn update_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        sqlx::query(
            "UPDATE stock_levels SET on_hand = $2, updated_at = $3 WHERE variant_id = $1",
        )
        .bind(level.variant_id.as_uuid())
        .bind(level.on_hand as i32)
        .bind(level.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
