//! Outbox event types and payloads emitted by the order operations.
//!
//! Payloads carry enough data for downstream handlers (confirmation
//! email, analytics, warehouse dispatch) to act without re-querying the
//! order.

use chrono::{DateTime, Utc};
use common::{
    Actor, CheckoutSessionId, Currency, ItemKind, LineItemId, MerchantId, Money, OrderId,
    OrderNumber, VariantId,
};
use domain::item::LineItemStatus;
use domain::{Order, OrderLineItem, OrderOwner, OrderStatus};
use serde::{Deserialize, Serialize};

/// A checkout session became a durable order.
pub const ORDER_CREATED: &str = "order.created";

/// The derived aggregate order status moved.
pub const ORDER_STATUS_CHANGED: &str = "order.status_changed";

/// A line item completed a fulfillment transition.
pub const LINE_ITEM_TRANSITIONED: &str = "order.line_item.transitioned";

/// Payload of [`ORDER_CREATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub checkout_session_id: Option<CheckoutSessionId>,
    pub payment_intent_ref: String,
    pub owner: OrderOwner,
    pub currency: Currency,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub items: Vec<OrderCreatedItem>,
    pub created_at: DateTime<Utc>,
}

/// One line of an [`OrderCreatedPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedItem {
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub merchant_id: MerchantId,
    pub product_name: String,
    pub kind: ItemKind,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderCreatedPayload {
    /// Builds the payload from the freshly created order and items.
    pub fn new(order: &Order, items: &[OrderLineItem], payment_intent_ref: &str) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            checkout_session_id: order.checkout_session_id,
            payment_intent_ref: payment_intent_ref.to_string(),
            owner: order.owner.clone(),
            currency: order.currency,
            subtotal: order.subtotal,
            tax: order.tax,
            shipping: order.shipping,
            discount: order.discount,
            total: order.total,
            items: items
                .iter()
                .map(|item| OrderCreatedItem {
                    line_item_id: item.id,
                    variant_id: item.variant_id,
                    merchant_id: item.merchant_id,
                    product_name: item.product_name.clone(),
                    kind: item.kind,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}

/// Payload of [`LINE_ITEM_TRANSITIONED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemTransitionedPayload {
    pub line_item_id: LineItemId,
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    pub variant_id: VariantId,
    pub kind: ItemKind,
    pub from: LineItemStatus,
    pub to: LineItemStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LineItemTransitionedPayload {
    /// Builds the payload after a successful transition on `item`.
    pub fn new(
        item: &OrderLineItem,
        from: LineItemStatus,
        actor: Actor,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            line_item_id: item.id,
            order_id: item.order_id,
            merchant_id: item.merchant_id,
            variant_id: item.variant_id,
            kind: item.kind,
            from,
            to: item.status,
            actor,
            reason,
            occurred_at,
        }
    }
}

/// Payload of [`ORDER_STATUS_CHANGED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChangedPayload {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub previous: OrderStatus,
    pub current: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

impl OrderStatusChangedPayload {
    /// Builds the payload for an aggregate status move.
    pub fn new(order: &Order, previous: OrderStatus, occurred_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            previous,
            current: order.status,
            occurred_at,
        }
    }
}
