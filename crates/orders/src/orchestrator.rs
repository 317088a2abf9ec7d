//! The single atomic boundary converting a checkout session into an order.

use chrono::{DateTime, Utc};
use common::{CheckoutSessionId, LineItemId, OrderId, OrderNumber};
use domain::checkout::{CheckoutOwner, CheckoutStatus};
use domain::{AggregateKind, Order, OrderLineItem, OrderOwner, OrderStatusTransition, PaymentStatus};
use outbox::NewOutboxEvent;
use storage::{Storage, UnitOfWork};

use crate::error::{OrdersError, Result};
use crate::events::{ORDER_CREATED, OrderCreatedPayload};

/// Creates orders from completed checkout sessions.
pub struct OrderOrchestrator<S: Storage> {
    storage: S,
}

impl<S: Storage> OrderOrchestrator<S> {
    /// Creates an orchestrator over the given storage.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Converts a checkout session into a durable order.
    ///
    /// One transaction covers the session lock and re-validation, order
    /// number generation, order + line item + audit inserts, the session's
    /// completion mark, and the `order.created` outbox event. Any failure
    /// rolls the whole attempt back, leaving the session retryable.
    ///
    /// Idempotent per session: a second invocation (e.g. a retried payment
    /// webhook) fails with [`OrdersError::AlreadyExists`] and creates
    /// neither a duplicate order nor a duplicate event.
    #[tracing::instrument(skip(self))]
    pub async fn create_order_from_checkout(
        &self,
        session_id: CheckoutSessionId,
        payment_intent_ref: &str,
    ) -> Result<(Order, Vec<OrderLineItem>)> {
        self.create_order_from_checkout_at(session_id, payment_intent_ref, Utc::now())
            .await
    }

    /// [`Self::create_order_from_checkout`] with an explicit clock.
    pub async fn create_order_from_checkout_at(
        &self,
        session_id: CheckoutSessionId,
        payment_intent_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderLineItem>)> {
        let mut uow = self.storage.begin().await?;
        let mut session = uow
            .checkout_session_for_update(session_id)
            .await?
            .ok_or(OrdersError::NotFound {
                what: "checkout session",
                id: session_id.to_string(),
            })?;

        if session.order_id.is_some() {
            return Err(OrdersError::AlreadyExists(session_id));
        }
        if session.status == CheckoutStatus::InProgress && session.is_expired(now) {
            // Lazy expiry: persist the mark on its own, then report it.
            session.mark_expired(now);
            uow.update_checkout_session(&session).await?;
            uow.commit().await?;
            return Err(OrdersError::Expired(session_id));
        }
        if session.status != CheckoutStatus::InProgress {
            return Err(OrdersError::Conflict(format!(
                "checkout session {session_id} is {}, expected in_progress",
                session.status
            )));
        }

        let owner = match &session.owner {
            CheckoutOwner::Customer { customer_id } => OrderOwner::Customer {
                customer_id: *customer_id,
            },
            CheckoutOwner::Anonymous { .. } => OrderOwner::Guest {
                email: session.contact_email.clone().ok_or_else(|| {
                    OrdersError::Validation(
                        "guest checkout requires a contact email before ordering".to_string(),
                    )
                })?,
            },
        };

        let sequence = uow.next_order_number().await?;
        let order = Order::new(
            OrderId::new(),
            OrderNumber::from_sequence(sequence),
            owner,
            &session.totals,
            PaymentStatus::Paid,
            Some(session.id),
            now,
        );
        uow.insert_order(&order).await?;

        let mut items = Vec::with_capacity(session.cart.len());
        for line in &session.cart {
            let item = OrderLineItem::from_cart_line(LineItemId::new(), order.id, line, now)?;
            uow.insert_line_item(&item).await?;
            uow.insert_status_transition(&OrderStatusTransition::initial(&item, now))
                .await?;
            items.push(item);
        }

        session.complete(order.id, now)?;
        uow.update_checkout_session(&session).await?;

        let payload = OrderCreatedPayload::new(&order, &items, payment_intent_ref);
        outbox::enqueue_at(
            uow.as_mut(),
            NewOutboxEvent::new(
                order.id.as_uuid(),
                AggregateKind::Order,
                ORDER_CREATED,
                serde_json::to_value(&payload)?,
            )
            .with_idempotency_key(format!("order-created-{session_id}")),
            now,
        )
        .await?;

        uow.commit().await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = items.len(),
            total = %order.total,
            "order created from checkout session"
        );
        Ok((order, items))
    }
}
