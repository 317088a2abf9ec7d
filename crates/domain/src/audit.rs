//! Append-only audit rows for line-item transitions.

use chrono::{DateTime, Utc};
use common::{Actor, LineItemId, OrderId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::{LineItemStatus, OrderLineItem, TransitionContext};

/// One audit row per successful line-item transition.
///
/// Write-once: audit rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusTransition {
    pub id: Uuid,
    pub line_item_id: LineItemId,
    pub order_id: OrderId,
    /// `None` for the row recorded at item creation.
    pub from_status: Option<LineItemStatus>,
    pub to_status: LineItemStatus,
    pub reason: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl OrderStatusTransition {
    /// Records the row for a transition that just succeeded on `item`.
    pub fn record(
        item: &OrderLineItem,
        from: LineItemStatus,
        ctx: &TransitionContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            line_item_id: item.id,
            order_id: item.order_id,
            from_status: Some(from),
            to_status: item.status,
            reason: ctx.reason.clone(),
            actor: ctx.actor,
            occurred_at: ctx.now,
        }
    }

    /// Records the creation row for a freshly materialized item.
    pub fn initial(item: &OrderLineItem, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            line_item_id: item.id,
            order_id: item.order_id,
            from_status: None,
            to_status: item.status,
            reason: None,
            actor: Actor::System,
            occurred_at: now,
        }
    }
}
