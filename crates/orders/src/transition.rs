//! Line-item transitions with aggregate recomputation.

use chrono::{DateTime, Utc};
use common::{Actor, LineItemId};
use domain::item::{LineItemStatus, RefundDecision, TransitionContext};
use domain::{AggregateKind, OrderLineItem, OrderStatusTransition};
use outbox::NewOutboxEvent;
use storage::{Storage, UnitOfWork};

use crate::error::{OrdersError, Result};
use crate::events::{
    LINE_ITEM_TRANSITIONED, LineItemTransitionedPayload, ORDER_STATUS_CHANGED,
    OrderStatusChangedPayload,
};

/// One requested line-item transition.
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    pub item_id: LineItemId,
    pub to: LineItemStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub warehouse: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub booking_reference: Option<String>,
    /// When true (the default), a refund-requested transition is gated by
    /// the advisory refund-eligibility predicate.
    pub enforce_refund_policy: bool,
}

impl TransitionCommand {
    /// A command with no optional effect inputs.
    pub fn new(item_id: LineItemId, to: LineItemStatus, actor: Actor) -> Self {
        Self {
            item_id,
            to,
            actor,
            reason: None,
            warehouse: None,
            tracking_number: None,
            carrier: None,
            booking_reference: None,
            enforce_refund_policy: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    pub fn with_tracking(
        mut self,
        tracking_number: impl Into<String>,
        carrier: impl Into<String>,
    ) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self.carrier = Some(carrier.into());
        self
    }

    pub fn with_booking_reference(mut self, reference: impl Into<String>) -> Self {
        self.booking_reference = Some(reference.into());
        self
    }

    /// Skips the advisory refund gate (operator override).
    pub fn overriding_refund_policy(mut self) -> Self {
        self.enforce_refund_policy = false;
        self
    }

    fn context(&self, now: DateTime<Utc>) -> TransitionContext {
        TransitionContext {
            actor: self.actor,
            reason: self.reason.clone(),
            now,
            warehouse: self.warehouse.clone(),
            tracking_number: self.tracking_number.clone(),
            carrier: self.carrier.clone(),
            booking_reference: self.booking_reference.clone(),
        }
    }
}

/// Drives line items through their per-kind state machines.
pub struct LineItemService<S: Storage> {
    storage: S,
}

impl<S: Storage> LineItemService<S> {
    /// Creates a service over the given storage.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Applies one transition atomically with its side effects, audit row,
    /// outbox event, and the aggregate order-status recomputation.
    ///
    /// The item row is locked first, so a concurrent attempt re-validates
    /// against the then-current status and fails with a conflict naming
    /// the allowed set instead of corrupting state.
    #[tracing::instrument(skip(self, cmd), fields(item_id = %cmd.item_id, to = %cmd.to))]
    pub async fn transition(&self, cmd: TransitionCommand) -> Result<OrderLineItem> {
        self.transition_at(cmd, Utc::now()).await
    }

    /// [`Self::transition`] with an explicit clock.
    pub async fn transition_at(
        &self,
        cmd: TransitionCommand,
        now: DateTime<Utc>,
    ) -> Result<OrderLineItem> {
        let mut uow = self.storage.begin().await?;
        let mut item =
            uow.line_item_for_update(cmd.item_id)
                .await?
                .ok_or(OrdersError::NotFound {
                    what: "order line item",
                    id: cmd.item_id.to_string(),
                })?;

        if cmd.to == LineItemStatus::RefundRequested && cmd.enforce_refund_policy {
            if let RefundDecision::NotAllowed { reason } = item.refund_decision(now) {
                metrics::counter!("line_item_refunds_denied_total").increment(1);
                return Err(OrdersError::RefundNotAllowed { reason });
            }
        }

        let from = item.status;
        let ctx = cmd.context(now);
        item.apply_transition(cmd.to, &ctx)?;

        uow.update_line_item(&item).await?;
        uow.insert_status_transition(&OrderStatusTransition::record(&item, from, &ctx))
            .await?;

        let payload =
            LineItemTransitionedPayload::new(&item, from, cmd.actor, cmd.reason.clone(), now);
        outbox::enqueue_at(
            uow.as_mut(),
            NewOutboxEvent::new(
                item.id.as_uuid(),
                AggregateKind::OrderLineItem,
                LINE_ITEM_TRANSITIONED,
                serde_json::to_value(&payload)?,
            ),
            now,
        )
        .await?;

        // Recompute the aggregate from the full current snapshot; the
        // derivation is order-independent, so concurrent transitions on
        // sibling items converge.
        let mut order =
            uow.order_for_update(item.order_id)
                .await?
                .ok_or(OrdersError::NotFound {
                    what: "order",
                    id: item.order_id.to_string(),
                })?;
        let items = uow.line_items_for_order(item.order_id).await?;
        let previous = order.status;
        if order.recompute_status(&items, now) {
            uow.update_order(&order).await?;
            let payload = OrderStatusChangedPayload::new(&order, previous, now);
            outbox::enqueue_at(
                uow.as_mut(),
                NewOutboxEvent::new(
                    order.id.as_uuid(),
                    AggregateKind::Order,
                    ORDER_STATUS_CHANGED,
                    serde_json::to_value(&payload)?,
                ),
                now,
            )
            .await?;
        }

        uow.commit().await?;

        metrics::counter!("line_item_transitions_total").increment(1);
        tracing::info!(
            item_id = %item.id,
            order_id = %item.order_id,
            from = %from,
            to = %item.status,
            order_status = %order.status,
            "line item transitioned"
        );
        Ok(item)
    }
}
