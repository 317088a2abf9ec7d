//! Advisory refund-eligibility predicate.
//!
//! This gates whether a refund-requested transition may be initiated by a
//! caller; it is not part of the transition-table enforcement itself.

use chrono::{DateTime, Duration, Utc};

use super::{FulfillmentData, OrderLineItem};

/// Days after delivery during which a physical item is refundable.
pub const PHYSICAL_REFUND_WINDOW_DAYS: i64 = 14;

/// Days after access grant during which a downloaded digital item is
/// refundable.
pub const DIGITAL_REFUND_WINDOW_DAYS: i64 = 7;

/// Hours before the booked time after which a service is no longer
/// cancelable.
pub const SERVICE_CANCELLATION_CUTOFF_HOURS: i64 = 24;

/// Outcome of the refund-eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundDecision {
    Allowed,
    NotAllowed { reason: String },
}

impl RefundDecision {
    /// Returns true if a refund may be initiated.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RefundDecision::Allowed)
    }

    /// The denial reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            RefundDecision::Allowed => None,
            RefundDecision::NotAllowed { reason } => Some(reason),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        RefundDecision::NotAllowed {
            reason: reason.into(),
        }
    }
}

/// Decides whether a refund may be initiated for the item at `now`.
pub fn refund_eligibility(item: &OrderLineItem, now: DateTime<Utc>) -> RefundDecision {
    match &item.fulfillment {
        FulfillmentData::Physical { delivered_at, .. } => match delivered_at {
            None => RefundDecision::denied("item has not been delivered yet"),
            Some(delivered) => {
                if now - *delivered <= Duration::days(PHYSICAL_REFUND_WINDOW_DAYS) {
                    RefundDecision::Allowed
                } else {
                    RefundDecision::denied(format!(
                        "the {PHYSICAL_REFUND_WINDOW_DAYS}-day refund window after delivery has closed"
                    ))
                }
            }
        },
        FulfillmentData::Digital {
            download_count,
            access_granted_at,
            ..
        } => {
            if *download_count == 0 {
                return RefundDecision::Allowed;
            }
            match access_granted_at {
                None => RefundDecision::Allowed,
                Some(granted) => {
                    if now - *granted <= Duration::days(DIGITAL_REFUND_WINDOW_DAYS) {
                        RefundDecision::Allowed
                    } else {
                        RefundDecision::denied(format!(
                            "the {DIGITAL_REFUND_WINDOW_DAYS}-day refund window after access grant has closed"
                        ))
                    }
                }
            }
        }
        FulfillmentData::Service { scheduled_at, .. } => match scheduled_at {
            None => RefundDecision::Allowed,
            Some(scheduled) => {
                if *scheduled - now >= Duration::hours(SERVICE_CANCELLATION_CUTOFF_HOURS) {
                    RefundDecision::Allowed
                } else {
                    RefundDecision::denied(format!(
                        "bookings cannot be cancelled within {SERVICE_CANCELLATION_CUTOFF_HOURS} hours of the booked time"
                    ))
                }
            }
        },
    }
}

impl OrderLineItem {
    /// See [`refund_eligibility`]; the kind is implied by the item.
    pub fn refund_decision(&self, now: DateTime<Utc>) -> RefundDecision {
        debug_assert_eq!(self.kind, self.fulfillment.kind());
        refund_eligibility(self, now)
    }
}
