//! Side effects bound to line-item transitions.
//!
//! One dispatch table keyed by (kind, target status). Every legal
//! transition resolves to exactly one effect procedure; no-ops are
//! explicit entries so the table stays total and exhaustively testable.

use chrono::Duration;
use common::ItemKind;
use uuid::Uuid;

use crate::error::DomainError;

use super::{FulfillmentData, LineItemStatus, OrderLineItem, TransitionContext};

/// Downloads allowed per access grant unless the catalog overrides it.
pub const DEFAULT_MAX_DOWNLOADS: u32 = 5;

/// How long a granted access token stays valid.
pub const ACCESS_VALIDITY_DAYS: i64 = 30;

/// An effect procedure run inside a transition, before the status write.
pub type Effect = fn(&mut OrderLineItem, &TransitionContext) -> Result<(), DomainError>;

/// Resolves the effect bound to entering `to` on an item of `kind`.
///
/// Returns `None` only for pairs that no transition table reaches.
pub fn effect_for(kind: ItemKind, to: LineItemStatus) -> Option<Effect> {
    use LineItemStatus::*;

    match (kind, to) {
        (ItemKind::Physical, PaymentConfirmed) => Some(no_op),
        (ItemKind::Physical, Preparing) => Some(assign_warehouse),
        (ItemKind::Physical, ReadyToShip) => Some(stamp_packed),
        (ItemKind::Physical, Shipped) => Some(stamp_shipped),
        (ItemKind::Physical, OutForDelivery) => Some(stamp_out_for_delivery),
        (ItemKind::Physical, Delivered) => Some(stamp_delivered),
        (ItemKind::Physical, Cancelled | RefundRequested | Refunded) => Some(no_op),

        (ItemKind::Digital, PaymentConfirmed) => Some(no_op),
        (ItemKind::Digital, AccessGranted) => Some(grant_access),
        (ItemKind::Digital, Downloaded) => Some(record_download),
        (ItemKind::Digital, Cancelled | RefundRequested) => Some(no_op),
        (ItemKind::Digital, Refunded) => Some(revoke_access),

        (ItemKind::Service, PaymentConfirmed) => Some(no_op),
        (ItemKind::Service, BookingConfirmed) => Some(confirm_booking),
        (ItemKind::Service, ReminderSent) => Some(stamp_reminder),
        (ItemKind::Service, InProgress) => Some(stamp_started),
        (ItemKind::Service, Completed) => Some(stamp_completed),
        (ItemKind::Service, NoShow) => Some(stamp_no_show),
        (ItemKind::Service, Cancelled | RefundRequested | Refunded) => Some(no_op),

        _ => None,
    }
}

/// Runs the effect for entering `to`.
pub(super) fn apply(
    item: &mut OrderLineItem,
    to: LineItemStatus,
    ctx: &TransitionContext,
) -> Result<(), DomainError> {
    // The transition was validated against the kind's table, so a missing
    // entry would be a hole in the dispatch table itself.
    let effect = effect_for(item.kind, to).ok_or(DomainError::InvalidTransition {
        kind: item.kind,
        from: item.status,
        to,
        allowed: super::fsm::allowed_transitions(item.kind, item.status),
    })?;
    effect(item, ctx)
}

fn mismatch(item: &OrderLineItem) -> DomainError {
    DomainError::FulfillmentKindMismatch {
        expected: item.kind,
        found: item.fulfillment.kind(),
    }
}

fn no_op(_item: &mut OrderLineItem, _ctx: &TransitionContext) -> Result<(), DomainError> {
    Ok(())
}

fn assign_warehouse(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Physical { warehouse, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    if let Some(w) = &ctx.warehouse {
        *warehouse = Some(w.clone());
    }
    Ok(())
}

fn stamp_packed(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Physical { packed_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *packed_at = Some(ctx.now);
    Ok(())
}

fn stamp_shipped(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Physical {
        tracking_number,
        carrier,
        shipped_at,
        ..
    } = &mut item.fulfillment
    else {
        return Err(err);
    };
    *shipped_at = Some(ctx.now);
    if let Some(t) = &ctx.tracking_number {
        *tracking_number = Some(t.clone());
    }
    if let Some(c) = &ctx.carrier {
        *carrier = Some(c.clone());
    }
    Ok(())
}

fn stamp_out_for_delivery(
    item: &mut OrderLineItem,
    ctx: &TransitionContext,
) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Physical {
        out_for_delivery_at, ..
    } = &mut item.fulfillment
    else {
        return Err(err);
    };
    *out_for_delivery_at = Some(ctx.now);
    Ok(())
}

fn stamp_delivered(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Physical { delivered_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *delivered_at = Some(ctx.now);
    Ok(())
}

/// Issues a time-boxed access token with a fresh download budget.
fn grant_access(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Digital {
        access_token,
        access_granted_at,
        access_expires_at,
        ..
    } = &mut item.fulfillment
    else {
        return Err(err);
    };
    *access_token = Some(Uuid::new_v4().simple().to_string());
    *access_granted_at = Some(ctx.now);
    *access_expires_at = Some(ctx.now + Duration::days(ACCESS_VALIDITY_DAYS));
    Ok(())
}

/// Counts a download against the cap and stamps the first one.
fn record_download(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Digital {
        access_expires_at,
        download_count,
        max_downloads,
        first_downloaded_at,
        ..
    } = &mut item.fulfillment
    else {
        return Err(err);
    };
    if let Some(expires_at) = *access_expires_at
        && ctx.now > expires_at
    {
        return Err(DomainError::AccessExpired {
            expired_at: expires_at,
        });
    }
    if *download_count >= *max_downloads {
        return Err(DomainError::DownloadLimitExceeded {
            max_downloads: *max_downloads,
        });
    }
    *download_count += 1;
    first_downloaded_at.get_or_insert(ctx.now);
    Ok(())
}

fn revoke_access(item: &mut OrderLineItem, _ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Digital { access_token, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *access_token = None;
    Ok(())
}

fn confirm_booking(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Service {
        booking_reference,
        confirmed_at,
        ..
    } = &mut item.fulfillment
    else {
        return Err(err);
    };
    *confirmed_at = Some(ctx.now);
    *booking_reference = Some(
        ctx.booking_reference
            .clone()
            .unwrap_or_else(|| format!("BKG-{}", Uuid::new_v4().simple())),
    );
    Ok(())
}

fn stamp_reminder(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Service { reminder_sent_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *reminder_sent_at = Some(ctx.now);
    Ok(())
}

fn stamp_started(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Service { started_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *started_at = Some(ctx.now);
    Ok(())
}

fn stamp_completed(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Service { completed_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *completed_at = Some(ctx.now);
    Ok(())
}

fn stamp_no_show(item: &mut OrderLineItem, ctx: &TransitionContext) -> Result<(), DomainError> {
    let err = mismatch(item);
    let FulfillmentData::Service { no_show_at, .. } = &mut item.fulfillment else {
        return Err(err);
    };
    *no_show_at = Some(ctx.now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CartLine;
    use crate::item::fsm::{allowed_transitions, legal_statuses};
    use chrono::Utc;
    use common::{Actor, Currency, LineItemId, MerchantId, Money, OrderId, VariantId};

    fn item(kind: ItemKind) -> OrderLineItem {
        let line = CartLine {
            variant_id: VariantId::new(),
            product_name: "Thing".to_string(),
            merchant_id: MerchantId::new(),
            kind,
            quantity: 1,
            unit_price: Money::from_cents(999),
            currency: Currency::Usd,
            slot_id: None,
            scheduled_at: Some(Utc::now() + Duration::days(3)),
        };
        OrderLineItem::from_cart_line(LineItemId::new(), OrderId::new(), &line, Utc::now()).unwrap()
    }

    /// Every reachable (kind, transition) pair has exactly one effect.
    #[test]
    fn dispatch_table_is_total_over_reachable_transitions() {
        for kind in ItemKind::ALL {
            for from in legal_statuses(kind) {
                for to in allowed_transitions(kind, *from) {
                    assert!(
                        effect_for(kind, *to).is_some(),
                        "no effect bound for {kind}: {from} -> {to}"
                    );
                }
            }
        }
    }

    #[test]
    fn shipping_stamps_timestamps_and_tracking() {
        let mut item = item(ItemKind::Physical);
        let now = Utc::now();
        let ctx = TransitionContext::new(Actor::Merchant, now).with_tracking("1Z999", "ups");
        for to in [
            LineItemStatus::PaymentConfirmed,
            LineItemStatus::Preparing,
            LineItemStatus::ReadyToShip,
            LineItemStatus::Shipped,
        ] {
            item.apply_transition(to, &ctx).unwrap();
        }

        let FulfillmentData::Physical {
            tracking_number,
            carrier,
            packed_at,
            shipped_at,
            ..
        } = &item.fulfillment
        else {
            panic!("physical item lost its fulfillment shape");
        };
        assert_eq!(tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(carrier.as_deref(), Some("ups"));
        assert_eq!(*packed_at, Some(now));
        assert_eq!(*shipped_at, Some(now));
    }

    #[test]
    fn access_grant_issues_time_boxed_token() {
        let mut item = item(ItemKind::Digital);
        let now = Utc::now();
        let ctx = TransitionContext::new(Actor::System, now);
        item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::AccessGranted, &ctx)
            .unwrap();

        let FulfillmentData::Digital {
            access_token,
            access_granted_at,
            access_expires_at,
            download_count,
            max_downloads,
            ..
        } = &item.fulfillment
        else {
            panic!("digital item lost its fulfillment shape");
        };
        assert!(access_token.is_some());
        assert_eq!(*access_granted_at, Some(now));
        assert_eq!(
            *access_expires_at,
            Some(now + Duration::days(ACCESS_VALIDITY_DAYS))
        );
        assert_eq!(*download_count, 0);
        assert_eq!(*max_downloads, DEFAULT_MAX_DOWNLOADS);
    }

    #[test]
    fn download_counts_and_stamps_first() {
        let mut item = item(ItemKind::Digital);
        let now = Utc::now();
        let ctx = TransitionContext::new(Actor::Customer, now);
        item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::AccessGranted, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::Downloaded, &ctx)
            .unwrap();

        let FulfillmentData::Digital {
            download_count,
            first_downloaded_at,
            ..
        } = &item.fulfillment
        else {
            panic!("digital item lost its fulfillment shape");
        };
        assert_eq!(*download_count, 1);
        assert_eq!(*first_downloaded_at, Some(now));
    }

    #[test]
    fn download_after_access_expiry_fails() {
        let mut item = item(ItemKind::Digital);
        let granted = Utc::now();
        let ctx = TransitionContext::new(Actor::Customer, granted);
        item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::AccessGranted, &ctx)
            .unwrap();

        let late = TransitionContext::new(
            Actor::Customer,
            granted + Duration::days(ACCESS_VALIDITY_DAYS + 1),
        );
        let err = item
            .apply_transition(LineItemStatus::Downloaded, &late)
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessExpired { .. }));
    }

    #[test]
    fn refund_revokes_digital_access() {
        let mut item = item(ItemKind::Digital);
        let ctx = TransitionContext::new(Actor::System, Utc::now());
        for to in [
            LineItemStatus::PaymentConfirmed,
            LineItemStatus::AccessGranted,
            LineItemStatus::RefundRequested,
            LineItemStatus::Refunded,
        ] {
            item.apply_transition(to, &ctx).unwrap();
        }

        let FulfillmentData::Digital { access_token, .. } = &item.fulfillment else {
            panic!("digital item lost its fulfillment shape");
        };
        assert!(access_token.is_none());
    }

    #[test]
    fn booking_confirmation_generates_reference_when_absent() {
        let mut item = item(ItemKind::Service);
        let ctx = TransitionContext::new(Actor::System, Utc::now());
        item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::BookingConfirmed, &ctx)
            .unwrap();

        let FulfillmentData::Service {
            booking_reference,
            confirmed_at,
            ..
        } = &item.fulfillment
        else {
            panic!("service item lost its fulfillment shape");
        };
        assert!(booking_reference.as_deref().unwrap().starts_with("BKG-"));
        assert!(confirmed_at.is_some());
    }

    #[test]
    fn booking_confirmation_honors_supplied_reference() {
        let mut item = item(ItemKind::Service);
        let ctx = TransitionContext::new(Actor::Merchant, Utc::now())
            .with_booking_reference("BKG-EXTERNAL-1");
        item.apply_transition(LineItemStatus::PaymentConfirmed, &ctx)
            .unwrap();
        item.apply_transition(LineItemStatus::BookingConfirmed, &ctx)
            .unwrap();

        let FulfillmentData::Service { booking_reference, .. } = &item.fulfillment else {
            panic!("service item lost its fulfillment shape");
        };
        assert_eq!(booking_reference.as_deref(), Some("BKG-EXTERNAL-1"));
    }

    #[test]
    fn no_show_is_stamped() {
        let mut item = item(ItemKind::Service);
        let now = Utc::now();
        let ctx = TransitionContext::new(Actor::System, now);
        for to in [
            LineItemStatus::PaymentConfirmed,
            LineItemStatus::BookingConfirmed,
            LineItemStatus::ReminderSent,
            LineItemStatus::NoShow,
        ] {
            item.apply_transition(to, &ctx).unwrap();
        }

        let FulfillmentData::Service { no_show_at, .. } = &item.fulfillment else {
            panic!("service item lost its fulfillment shape");
        };
        assert_eq!(*no_show_at, Some(now));
    }
}
