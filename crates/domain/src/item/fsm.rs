//! Per-kind line-item transition tables.
//!
//! The tables are the single source of truth for which statuses a line item
//! may move between. Terminal states have no outgoing edges. Statuses that
//! do not belong to a kind at all (e.g. `access_granted` on a physical
//! item) have no edges either; `legal_statuses` distinguishes the two.

use common::{InvalidEnumValue, ItemKind};
use serde::{Deserialize, Serialize};

/// Status of an order line item.
///
/// The full set is the union over all item kinds; which values are legal,
/// and which transitions are allowed, depends on the kind (see
/// [`allowed_transitions`] and [`legal_statuses`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Pending,
    PaymentConfirmed,
    // physical fulfillment
    Preparing,
    ReadyToShip,
    Shipped,
    OutForDelivery,
    Delivered,
    // digital fulfillment
    AccessGranted,
    Downloaded,
    // service fulfillment
    BookingConfirmed,
    ReminderSent,
    InProgress,
    Completed,
    NoShow,
    // shared tail
    Cancelled,
    RefundRequested,
    Refunded,
}

impl LineItemStatus {
    /// Every status across all kinds.
    pub const ALL: [LineItemStatus; 17] = [
        LineItemStatus::Pending,
        LineItemStatus::PaymentConfirmed,
        LineItemStatus::Preparing,
        LineItemStatus::ReadyToShip,
        LineItemStatus::Shipped,
        LineItemStatus::OutForDelivery,
        LineItemStatus::Delivered,
        LineItemStatus::AccessGranted,
        LineItemStatus::Downloaded,
        LineItemStatus::BookingConfirmed,
        LineItemStatus::ReminderSent,
        LineItemStatus::InProgress,
        LineItemStatus::Completed,
        LineItemStatus::NoShow,
        LineItemStatus::Cancelled,
        LineItemStatus::RefundRequested,
        LineItemStatus::Refunded,
    ];

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemStatus::Pending => "pending",
            LineItemStatus::PaymentConfirmed => "payment_confirmed",
            LineItemStatus::Preparing => "preparing",
            LineItemStatus::ReadyToShip => "ready_to_ship",
            LineItemStatus::Shipped => "shipped",
            LineItemStatus::OutForDelivery => "out_for_delivery",
            LineItemStatus::Delivered => "delivered",
            LineItemStatus::AccessGranted => "access_granted",
            LineItemStatus::Downloaded => "downloaded",
            LineItemStatus::BookingConfirmed => "booking_confirmed",
            LineItemStatus::ReminderSent => "reminder_sent",
            LineItemStatus::InProgress => "in_progress",
            LineItemStatus::Completed => "completed",
            LineItemStatus::NoShow => "no_show",
            LineItemStatus::Cancelled => "cancelled",
            LineItemStatus::RefundRequested => "refund_requested",
            LineItemStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for LineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LineItemStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LineItemStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| InvalidEnumValue::new("line item status", s))
    }
}

/// Returns the statuses reachable from `from` for the given kind.
///
/// Empty for terminal states and for statuses that do not belong to the
/// kind at all.
pub fn allowed_transitions(kind: ItemKind, from: LineItemStatus) -> &'static [LineItemStatus] {
    use LineItemStatus::*;

    match kind {
        ItemKind::Physical => match from {
            Pending => &[PaymentConfirmed, Cancelled],
            PaymentConfirmed => &[Preparing, Cancelled],
            Preparing => &[ReadyToShip, Cancelled],
            ReadyToShip => &[Shipped],
            Shipped => &[OutForDelivery, Delivered],
            OutForDelivery => &[Delivered],
            Delivered => &[RefundRequested],
            RefundRequested => &[Refunded],
            _ => &[],
        },
        ItemKind::Digital => match from {
            Pending => &[PaymentConfirmed, Cancelled],
            PaymentConfirmed => &[AccessGranted, Cancelled],
            AccessGranted => &[Downloaded, RefundRequested],
            Downloaded => &[RefundRequested],
            RefundRequested => &[Refunded],
            _ => &[],
        },
        ItemKind::Service => match from {
            Pending => &[PaymentConfirmed, Cancelled],
            PaymentConfirmed => &[BookingConfirmed, Cancelled],
            BookingConfirmed => &[ReminderSent, Cancelled],
            ReminderSent => &[InProgress, NoShow],
            InProgress => &[Completed],
            Completed => &[RefundRequested],
            NoShow => &[RefundRequested],
            RefundRequested => &[Refunded],
            _ => &[],
        },
    }
}

/// Returns true if `to` is reachable from `from` for the given kind.
pub fn can_transition(kind: ItemKind, from: LineItemStatus, to: LineItemStatus) -> bool {
    allowed_transitions(kind, from).contains(&to)
}

/// The statuses that belong to a kind's lifecycle at all.
pub fn legal_statuses(kind: ItemKind) -> &'static [LineItemStatus] {
    use LineItemStatus::*;

    match kind {
        ItemKind::Physical => &[
            Pending,
            PaymentConfirmed,
            Preparing,
            ReadyToShip,
            Shipped,
            OutForDelivery,
            Delivered,
            Cancelled,
            RefundRequested,
            Refunded,
        ],
        ItemKind::Digital => &[
            Pending,
            PaymentConfirmed,
            AccessGranted,
            Downloaded,
            Cancelled,
            RefundRequested,
            Refunded,
        ],
        ItemKind::Service => &[
            Pending,
            PaymentConfirmed,
            BookingConfirmed,
            ReminderSent,
            InProgress,
            Completed,
            NoShow,
            Cancelled,
            RefundRequested,
            Refunded,
        ],
    }
}

/// Returns true if the status is terminal for the kind (legal but with no
/// outgoing edges).
pub fn is_terminal(kind: ItemKind, status: LineItemStatus) -> bool {
    legal_statuses(kind).contains(&status) && allowed_transitions(kind, status).is_empty()
}

/// Coarse classification of a line item's position in its lifecycle.
///
/// This is the total function the aggregate order status is derived from;
/// never derived by matching on status names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemProgress {
    /// Awaiting payment confirmation.
    Pending,
    /// Payment confirmed, fulfillment not yet started.
    Confirmed,
    /// Fulfillment underway.
    Active,
    /// Fulfillment concluded (delivered, access granted, service done or
    /// no-show).
    Fulfilled,
    /// Line was cancelled before fulfillment.
    Cancelled,
    /// A refund was requested after fulfillment concluded.
    RefundRequested,
    /// The refund completed.
    Refunded,
}

/// Classifies a (kind, status) pair.
///
/// Total over every legal pair. The kind parameter keeps the
/// classification explicitly defined per kind even where the mapping
/// happens to coincide.
pub fn classify_progress(kind: ItemKind, status: LineItemStatus) -> ItemProgress {
    use LineItemStatus::*;

    let _ = kind;
    match status {
        Pending => ItemProgress::Pending,
        PaymentConfirmed => ItemProgress::Confirmed,
        Preparing | ReadyToShip | Shipped | OutForDelivery | BookingConfirmed | ReminderSent
        | InProgress => ItemProgress::Active,
        Delivered | AccessGranted | Downloaded | Completed | NoShow => ItemProgress::Fulfilled,
        Cancelled => ItemProgress::Cancelled,
        RefundRequested => ItemProgress::RefundRequested,
        Refunded => ItemProgress::Refunded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_roundtrip() {
        for status in LineItemStatus::ALL {
            assert_eq!(
                status.as_str().parse::<LineItemStatus>().unwrap(),
                status,
                "{status} did not roundtrip"
            );
        }
        assert!("teleported".parse::<LineItemStatus>().is_err());
    }

    #[test]
    fn every_edge_targets_a_legal_status() {
        for kind in ItemKind::ALL {
            for from in legal_statuses(kind) {
                for to in allowed_transitions(kind, *from) {
                    assert!(
                        legal_statuses(kind).contains(to),
                        "{kind}: {from} -> {to} targets a status outside the kind"
                    );
                }
            }
        }
    }

    #[test]
    fn statuses_outside_a_kind_have_no_edges() {
        for kind in ItemKind::ALL {
            for status in LineItemStatus::ALL {
                if !legal_statuses(kind).contains(&status) {
                    assert!(allowed_transitions(kind, status).is_empty());
                    assert!(!is_terminal(kind, status));
                }
            }
        }
    }

    #[test]
    fn terminal_states_per_kind() {
        use LineItemStatus::*;

        for kind in ItemKind::ALL {
            assert!(is_terminal(kind, Cancelled));
            assert!(is_terminal(kind, Refunded));
            assert!(!is_terminal(kind, Pending));
            assert!(!is_terminal(kind, RefundRequested));
        }
        // Delivered, Downloaded, Completed and NoShow still allow refunds.
        assert!(!is_terminal(ItemKind::Physical, Delivered));
        assert!(!is_terminal(ItemKind::Digital, Downloaded));
        assert!(!is_terminal(ItemKind::Service, Completed));
        assert!(!is_terminal(ItemKind::Service, NoShow));
    }

    #[test]
    fn physical_happy_path() {
        use LineItemStatus::*;

        let path = [
            Pending,
            PaymentConfirmed,
            Preparing,
            ReadyToShip,
            Shipped,
            OutForDelivery,
            Delivered,
            RefundRequested,
            Refunded,
        ];
        for pair in path.windows(2) {
            assert!(
                can_transition(ItemKind::Physical, pair[0], pair[1]),
                "physical {} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn shipped_can_skip_out_for_delivery() {
        use LineItemStatus::*;

        assert!(can_transition(ItemKind::Physical, Shipped, Delivered));
    }

    #[test]
    fn ready_to_ship_cannot_cancel() {
        use LineItemStatus::*;

        assert!(!can_transition(ItemKind::Physical, ReadyToShip, Cancelled));
    }

    #[test]
    fn digital_cannot_ship() {
        use LineItemStatus::*;

        assert!(!can_transition(ItemKind::Digital, PaymentConfirmed, Preparing));
        assert!(!can_transition(ItemKind::Digital, AccessGranted, Shipped));
    }

    #[test]
    fn service_reminder_branches() {
        use LineItemStatus::*;

        assert!(can_transition(ItemKind::Service, ReminderSent, InProgress));
        assert!(can_transition(ItemKind::Service, ReminderSent, NoShow));
        assert!(!can_transition(ItemKind::Service, ReminderSent, Cancelled));
    }

    #[test]
    fn classification_is_total_over_legal_pairs() {
        for kind in ItemKind::ALL {
            for status in legal_statuses(kind) {
                // Must not panic, and terminal successes classify as such.
                let _ = classify_progress(kind, *status);
            }
        }
        assert_eq!(
            classify_progress(ItemKind::Physical, LineItemStatus::Delivered),
            ItemProgress::Fulfilled
        );
        assert_eq!(
            classify_progress(ItemKind::Digital, LineItemStatus::AccessGranted),
            ItemProgress::Fulfilled
        );
        assert_eq!(
            classify_progress(ItemKind::Service, LineItemStatus::NoShow),
            ItemProgress::Fulfilled
        );
    }
}
