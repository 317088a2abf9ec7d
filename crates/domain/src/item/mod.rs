//! Order line items: records, per-kind state machines, side effects, and
//! the refund-eligibility predicate.

mod effects;
mod fsm;
mod refund;

pub use effects::{ACCESS_VALIDITY_DAYS, DEFAULT_MAX_DOWNLOADS, Effect, effect_for};
pub use fsm::{
    ItemProgress, LineItemStatus, allowed_transitions, can_transition, classify_progress,
    is_terminal, legal_statuses,
};
pub use refund::{
    DIGITAL_REFUND_WINDOW_DAYS, PHYSICAL_REFUND_WINDOW_DAYS, RefundDecision,
    SERVICE_CANCELLATION_CUTOFF_HOURS, refund_eligibility,
};

use chrono::{DateTime, Utc};
use common::{Actor, Currency, ItemKind, LineItemId, MerchantId, Money, OrderId, VariantId};
use serde::{Deserialize, Serialize};

use crate::checkout::CartLine;
use crate::error::DomainError;

/// One entry of a line item's append-only status history.
///
/// The history grows by exactly one entry per successful transition, and
/// the item's status always equals the `to` of the last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// `None` for the entry recorded at item creation.
    pub from: Option<LineItemStatus>,
    pub to: LineItemStatus,
    pub reason: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Kind-tagged fulfillment data, fixed in shape at item creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FulfillmentData {
    Physical {
        warehouse: Option<String>,
        tracking_number: Option<String>,
        carrier: Option<String>,
        packed_at: Option<DateTime<Utc>>,
        shipped_at: Option<DateTime<Utc>>,
        out_for_delivery_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    },
    Digital {
        access_token: Option<String>,
        access_granted_at: Option<DateTime<Utc>>,
        access_expires_at: Option<DateTime<Utc>>,
        download_count: u32,
        max_downloads: u32,
        first_downloaded_at: Option<DateTime<Utc>>,
    },
    Service {
        scheduled_at: Option<DateTime<Utc>>,
        booking_reference: Option<String>,
        confirmed_at: Option<DateTime<Utc>>,
        reminder_sent_at: Option<DateTime<Utc>>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        no_show_at: Option<DateTime<Utc>>,
    },
}

impl FulfillmentData {
    /// Kind-appropriate empty fulfillment data for a new item.
    ///
    /// `scheduled_at` seeds the booked time for service items and is
    /// ignored for the other kinds.
    pub fn new(kind: ItemKind, scheduled_at: Option<DateTime<Utc>>) -> Self {
        match kind {
            ItemKind::Physical => FulfillmentData::Physical {
                warehouse: None,
                tracking_number: None,
                carrier: None,
                packed_at: None,
                shipped_at: None,
                out_for_delivery_at: None,
                delivered_at: None,
            },
            ItemKind::Digital => FulfillmentData::Digital {
                access_token: None,
                access_granted_at: None,
                access_expires_at: None,
                download_count: 0,
                max_downloads: DEFAULT_MAX_DOWNLOADS,
                first_downloaded_at: None,
            },
            ItemKind::Service => FulfillmentData::Service {
                scheduled_at,
                booking_reference: None,
                confirmed_at: None,
                reminder_sent_at: None,
                started_at: None,
                completed_at: None,
                no_show_at: None,
            },
        }
    }

    /// Returns the kind this data belongs to.
    pub fn kind(&self) -> ItemKind {
        match self {
            FulfillmentData::Physical { .. } => ItemKind::Physical,
            FulfillmentData::Digital { .. } => ItemKind::Digital,
            FulfillmentData::Service { .. } => ItemKind::Service,
        }
    }
}

/// Inputs to a single line-item transition.
///
/// The clock is explicit so transitions are reproducible; the optional
/// fields feed kind-specific side effects (tracking data, booking
/// references, warehouse assignment).
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub actor: Actor,
    pub reason: Option<String>,
    pub now: DateTime<Utc>,
    pub warehouse: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub booking_reference: Option<String>,
}

impl TransitionContext {
    /// A context with no optional effect inputs.
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            reason: None,
            now,
            warehouse: None,
            tracking_number: None,
            carrier: None,
            booking_reference: None,
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
}

/// A purchased line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: LineItemId,
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    pub variant_id: VariantId,
    pub product_name: String,
    /// Fixed at creation, never changes.
    pub kind: ItemKind,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
    pub currency: Currency,
    pub status: LineItemStatus,
    pub fulfillment: FulfillmentData,
    /// Append-only; one entry per successful transition plus the creation
    /// entry.
    pub history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderLineItem {
    /// Materializes a line item from a cart snapshot line, starting
    /// `pending` with one initial history entry.
    pub fn from_cart_line(
        id: LineItemId,
        order_id: OrderId,
        line: &CartLine,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if line.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        Ok(Self {
            id,
            order_id,
            merchant_id: line.merchant_id,
            variant_id: line.variant_id,
            product_name: line.product_name.clone(),
            kind: line.kind,
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
            currency: line.currency,
            status: LineItemStatus::Pending,
            fulfillment: FulfillmentData::new(line.kind, line.scheduled_at),
            history: vec![StatusHistoryEntry {
                from: None,
                to: LineItemStatus::Pending,
                reason: None,
                actor: Actor::System,
                occurred_at: now,
            }],
            created_at: now,
            updated_at: now,
        })
    }

    /// The statuses this item may move to from its current status.
    pub fn allowed_transitions(&self) -> &'static [LineItemStatus] {
        fsm::allowed_transitions(self.kind, self.status)
    }

    /// Returns this item's position in its lifecycle.
    pub fn progress(&self) -> ItemProgress {
        fsm::classify_progress(self.kind, self.status)
    }

    /// Applies one transition: validates it against the kind's table, runs
    /// the bound side effect, then records the new status and exactly one
    /// history entry.
    ///
    /// The side effect runs before the status write so an effect failure
    /// aborts the whole transition.
    pub fn apply_transition(
        &mut self,
        to: LineItemStatus,
        ctx: &TransitionContext,
    ) -> Result<(), DomainError> {
        let from = self.status;
        if !fsm::can_transition(self.kind, from, to) {
            return Err(DomainError::InvalidTransition {
                kind: self.kind,
                from,
                to,
                allowed: fsm::allowed_transitions(self.kind, from),
            });
        }

        effects::apply(self, to, ctx)?;

        self.status = to;
        self.history.push(StatusHistoryEntry {
            from: Some(from),
            to,
            reason: ctx.reason.clone(),
            actor: ctx.actor,
            occurred_at: ctx.now,
        });
        self.updated_at = ctx.now;
        Ok(())
    }
}
