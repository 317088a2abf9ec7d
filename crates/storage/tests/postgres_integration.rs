//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{
    Actor, CheckoutSessionId, Currency, ItemKind, LineItemId, MerchantId, Money, OrderId,
    OrderNumber, VariantId,
};
use domain::checkout::{CartLine, CheckoutOwner, CheckoutSession, Totals};
use domain::item::{LineItemStatus, OrderLineItem, TransitionContext};
use domain::{
    AggregateKind, Order, OrderOwner, OrderStatusTransition, OutboxDlqEntry, OutboxEvent,
    PaymentStatus, StockLevel,
};
use sqlx::PgPool;
use storage::{PostgresStorage, Storage, UnitOfWork};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_core_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStorage {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE checkout_sessions, orders, order_line_items, \
         order_status_transitions, order_outbox, order_outbox_dlq, stock_levels",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStorage::new(pool)
}

fn cart_line(kind: ItemKind) -> CartLine {
    CartLine {
        variant_id: VariantId::new(),
        product_name: "Integration Widget".to_string(),
        merchant_id: MerchantId::new(),
        kind,
        quantity: 2,
        unit_price: Money::from_cents(1000),
        currency: Currency::Usd,
        slot_id: None,
        scheduled_at: None,
    }
}

fn session() -> CheckoutSession {
    let now = Utc::now();
    CheckoutSession::new(
        CheckoutSessionId::new(),
        CheckoutOwner::Anonymous {
            session_token: "tok-1".to_string(),
        },
        vec![cart_line(ItemKind::Physical), cart_line(ItemKind::Digital)],
        Totals::from_components(
            Money::from_cents(2500),
            Money::from_cents(150),
            Money::from_cents(500),
            Money::zero(),
            Currency::Usd,
        ),
        now + Duration::minutes(30),
        now,
    )
    .unwrap()
}

fn order(session: &CheckoutSession, seq: u64) -> Order {
    Order::new(
        OrderId::new(),
        OrderNumber::from_sequence(seq),
        OrderOwner::Guest {
            email: "guest@example.com".to_string(),
        },
        &session.totals,
        PaymentStatus::Paid,
        Some(session.id),
        Utc::now(),
    )
}

#[tokio::test]
async fn checkout_session_roundtrip() {
    let store = get_test_store().await;
    let session = session();

    let mut uow = store.begin().await.unwrap();
    uow.insert_checkout_session(&session).await.unwrap();
    uow.commit().await.unwrap();

    let read = store.checkout_session(session.id).await.unwrap().unwrap();
    assert_eq!(read.id, session.id);
    assert_eq!(read.cart.len(), 2);
    assert_eq!(read.totals.total.cents(), 3150);
    assert_eq!(read.status, session.status);
    assert!(read.order_id.is_none());
}

#[tokio::test]
async fn order_and_items_roundtrip_with_history() {
    let store = get_test_store().await;
    let session = session();
    let now = Utc::now();

    let mut uow = store.begin().await.unwrap();
    uow.insert_checkout_session(&session).await.unwrap();
    let seq = uow.next_order_number().await.unwrap();
    let order = order(&session, seq);
    uow.insert_order(&order).await.unwrap();

    let mut items = Vec::new();
    for line in &session.cart {
        let item = OrderLineItem::from_cart_line(LineItemId::new(), order.id, line, now).unwrap();
        uow.insert_line_item(&item).await.unwrap();
        uow.insert_status_transition(&OrderStatusTransition::initial(&item, now))
            .await
            .unwrap();
        items.push(item);
    }
    uow.commit().await.unwrap();

    let read_items = store.line_items_for_order(order.id).await.unwrap();
    assert_eq!(read_items.len(), 2);
    for item in &read_items {
        assert_eq!(item.status, LineItemStatus::Pending);
        assert_eq!(item.history.len(), 1);
    }

    // Transition one item and verify the persisted update + audit row.
    let mut uow = store.begin().await.unwrap();
    let mut item = uow
        .line_item_for_update(items[0].id)
        .await
        .unwrap()
        .unwrap();
    let ctx = TransitionContext::new(Actor::System, Utc::now());
    item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
        .unwrap();
    uow.update_line_item(&item).await.unwrap();
    uow.insert_status_transition(&OrderStatusTransition::record(
        &item,
        LineItemStatus::Pending,
        &ctx,
    ))
    .await
    .unwrap();
    uow.commit().await.unwrap();

    let read = store.line_item(items[0].id).await.unwrap().unwrap();
    assert_eq!(read.status, LineItemStatus::PaymentConfirmed);
    assert_eq!(read.history.len(), 2);

    let audit = store.status_transitions_for_item(items[0].id).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].from_status, None);
    assert_eq!(audit[1].from_status, Some(LineItemStatus::Pending));
    assert_eq!(audit[1].to_status, LineItemStatus::PaymentConfirmed);
}

#[tokio::test]
async fn order_number_sequence_is_monotonic_across_rollback() {
    let store = get_test_store().await;

    let mut uow = store.begin().await.unwrap();
    let first = uow.next_order_number().await.unwrap();
    uow.rollback().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let second = uow.next_order_number().await.unwrap();
    uow.commit().await.unwrap();

    assert!(second > first);
}

#[tokio::test]
async fn rollback_discards_all_writes() {
    let store = get_test_store().await;
    let session = session();

    let mut uow = store.begin().await.unwrap();
    uow.insert_checkout_session(&session).await.unwrap();
    uow.rollback().await.unwrap();

    assert!(store.checkout_session(session.id).await.unwrap().is_none());
}

#[tokio::test]
async fn outbox_poll_orders_by_creation_and_skips_future_retries() {
    let store = get_test_store().await;
    let now = Utc::now();

    let mut uow = store.begin().await.unwrap();
    let old = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::Order,
        "order.created",
        serde_json::json!({"n": 1}),
        None,
        now - Duration::minutes(10),
    );
    let mut backed_off = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::Order,
        "order.created",
        serde_json::json!({"n": 2}),
        None,
        now - Duration::minutes(5),
    );
    backed_off.record_failure("handler down", now + Duration::minutes(5), now);
    let fresh = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::OrderLineItem,
        "order.line_item.transitioned",
        serde_json::json!({"n": 3}),
        None,
        now,
    );
    uow.insert_outbox_event(&old).await.unwrap();
    uow.insert_outbox_event(&backed_off).await.unwrap();
    uow.insert_outbox_event(&fresh).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let ready = uow.ready_outbox_events(10, now).await.unwrap();
    uow.commit().await.unwrap();

    let ids: Vec<_> = ready.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![old.id, fresh.id]);
}

#[tokio::test]
async fn idempotency_key_lookup_and_uniqueness() {
    let store = get_test_store().await;
    let now = Utc::now();
    let key = "order-created-abc";

    let event = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::Order,
        "order.created",
        serde_json::json!({}),
        Some(key.to_string()),
        now,
    );
    let mut uow = store.begin().await.unwrap();
    uow.insert_outbox_event(&event).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let found = uow
        .outbox_event_by_idempotency_key(key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, event.id);

    // A second insert under the same key violates the unique constraint.
    let duplicate = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::Order,
        "order.created",
        serde_json::json!({}),
        Some(key.to_string()),
        now,
    );
    assert!(uow.insert_outbox_event(&duplicate).await.is_err());
}

#[tokio::test]
async fn dlq_roundtrip_and_stats() {
    let store = get_test_store().await;
    let now = Utc::now();

    let mut event = OutboxEvent::new(
        Uuid::new_v4(),
        AggregateKind::Order,
        "order.created",
        serde_json::json!({"x": 1}),
        None,
        now - Duration::seconds(120),
    );
    event.record_failure("boom", now, now - Duration::seconds(60));

    let mut uow = store.begin().await.unwrap();
    uow.insert_outbox_event(&event).await.unwrap();
    uow.insert_dlq_entry(&OutboxDlqEntry::from_event(&event, now))
        .await
        .unwrap();
    uow.delete_outbox_event(event.id).await.unwrap();
    uow.commit().await.unwrap();

    assert!(store.outbox_event(event.id).await.unwrap().is_none());
    let entries = store.dlq_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_id, event.id);
    assert_eq!(entries[0].failure_log.len(), 1);

    let stats = store.outbox_stats(now).await.unwrap();
    assert_eq!(stats.dlq_size, 1);
    assert_eq!(stats.pending + stats.processing + stats.processed + stats.failed, 0);
    assert_eq!(stats.retried_fraction, 1.0);
}

#[tokio::test]
async fn stock_level_lock_and_update() {
    let store = get_test_store().await;
    let now = Utc::now();
    let level = StockLevel::new(VariantId::new(), 3, true, now);

    let mut uow = store.begin().await.unwrap();
    uow.insert_stock_level(&level).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let mut locked = uow
        .stock_level_for_update(level.variant_id)
        .await
        .unwrap()
        .unwrap();
    locked.decrement(2, Utc::now());
    uow.update_stock_level(&locked).await.unwrap();
    uow.commit().await.unwrap();

    let read = store.stock_level(level.variant_id).await.unwrap().unwrap();
    assert_eq!(read.on_hand, 1);
}
