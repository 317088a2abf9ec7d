//! Orders and the derived aggregate status.

use chrono::{DateTime, Utc};
use common::{CheckoutSessionId, Currency, CustomerId, InvalidEnumValue, Money, OrderId, OrderNumber};
use serde::{Deserialize, Serialize};

use crate::checkout::Totals;
use crate::item::{ItemProgress, OrderLineItem};

/// Aggregate status of an order.
///
/// Derived from the classifications of its line items after every
/// transition; never mutated independently except through that
/// recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Completed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            "partially_refunded" => Ok(OrderStatus::PartiallyRefunded),
            other => Err(InvalidEnumValue::new("order status", other)),
        }
    }
}

/// Payment state of the order as reported by the gateway callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(InvalidEnumValue::new("payment status", other)),
        }
    }
}

/// Who the order belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderOwner {
    /// A registered customer.
    Customer { customer_id: CustomerId },
    /// A guest purchase, reachable only by email.
    Guest { email: String },
}

/// A durable, fulfillable order.
///
/// Created exactly once from a completed checkout session; never deleted,
/// only transitioned through its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Globally unique, externally visible.
    pub order_number: OrderNumber,
    pub owner: OrderOwner,
    pub currency: Currency,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    /// Invariant: `total = max(0, subtotal + tax + shipping - discount)`.
    pub total: Money,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    /// Originating checkout session, resolved by lookup when needed.
    pub checkout_session_id: Option<CheckoutSessionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order from session totals, re-deriving the total
    /// so the clamp invariant holds regardless of what the session stored.
    pub fn new(
        id: OrderId,
        order_number: OrderNumber,
        owner: OrderOwner,
        totals: &Totals,
        payment_status: PaymentStatus,
        checkout_session_id: Option<CheckoutSessionId>,
        now: DateTime<Utc>,
    ) -> Self {
        let total =
            (totals.subtotal + totals.tax + totals.shipping - totals.discount).clamped_non_negative();
        Self {
            id,
            order_number,
            owner,
            currency: totals.currency,
            subtotal: totals.subtotal,
            tax: totals.tax,
            shipping: totals.shipping,
            discount: totals.discount,
            total,
            payment_status,
            status: OrderStatus::Pending,
            checkout_session_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recomputes the aggregate status from the current item snapshot.
    ///
    /// Returns true when the status changed.
    pub fn recompute_status(&mut self, items: &[OrderLineItem], now: DateTime<Utc>) -> bool {
        let derived = derive_order_status(items);
        if derived != self.status {
            self.status = derived;
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}

/// Derives the aggregate order status from a snapshot of its line items.
///
/// A pure function of the multiset of item classifications, so it is
/// idempotent and independent of the order transitions were applied in.
pub fn derive_order_status(items: &[OrderLineItem]) -> OrderStatus {
    if items.is_empty() {
        return OrderStatus::Pending;
    }

    let live: Vec<ItemProgress> = items
        .iter()
        .map(OrderLineItem::progress)
        .filter(|p| *p != ItemProgress::Cancelled)
        .collect();
    if live.is_empty() {
        return OrderStatus::Cancelled;
    }

    if live.iter().all(|p| *p == ItemProgress::Refunded) {
        return OrderStatus::Refunded;
    }
    if live.iter().any(|p| *p == ItemProgress::Refunded) {
        return OrderStatus::PartiallyRefunded;
    }

    // A requested-but-incomplete refund happens after fulfillment
    // concluded, so it keeps the order in the completed bucket.
    let fulfilled =
        |p: &ItemProgress| matches!(p, ItemProgress::Fulfilled | ItemProgress::RefundRequested);
    if live.iter().all(fulfilled) {
        return OrderStatus::Completed;
    }
    if live
        .iter()
        .any(|p| matches!(p, ItemProgress::Active) || fulfilled(p))
    {
        return OrderStatus::Processing;
    }
    if live.iter().any(|p| *p == ItemProgress::Confirmed) {
        return OrderStatus::Confirmed;
    }
    OrderStatus::Pending
}
