//! Domain error types.

use common::{Currency, ItemKind};
use thiserror::Error;

use crate::checkout::CheckoutStatus;
use crate::item::LineItemStatus;

fn format_statuses(statuses: &[LineItemStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur in pure domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The target status is not reachable from the current status for the
    /// item's kind. Carries the currently allowed set for the caller.
    #[error(
        "illegal {kind} item transition {from} -> {to} (allowed: [{}])",
        format_statuses(.allowed)
    )]
    InvalidTransition {
        kind: ItemKind,
        from: LineItemStatus,
        to: LineItemStatus,
        allowed: &'static [LineItemStatus],
    },

    /// Fulfillment data does not match the item's kind.
    #[error("fulfillment data is {found} but the item kind is {expected}")]
    FulfillmentKindMismatch { expected: ItemKind, found: ItemKind },

    /// A digital item hit its download cap.
    #[error("download limit of {max_downloads} reached")]
    DownloadLimitExceeded { max_downloads: u32 },

    /// A digital item's access window lapsed before the download.
    #[error("download access expired at {expired_at}")]
    AccessExpired { expired_at: chrono::DateTime<chrono::Utc> },

    /// Quantities must be strictly positive.
    #[error("invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A checkout snapshot must contain at least one line.
    #[error("cart snapshot is empty")]
    EmptyCart,

    /// All lines of one checkout must share a currency.
    #[error("cart mixes currencies: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    /// The checkout session is not in the status the operation requires.
    #[error("checkout session is {status}, expected in_progress")]
    SessionNotInProgress { status: CheckoutStatus },

    /// A checkout session's order reference is set at most once.
    #[error("checkout session already references an order")]
    SessionAlreadyCompleted,
}
