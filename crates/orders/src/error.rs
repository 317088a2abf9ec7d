//! Error taxonomy for order operations.
//!
//! Business-rule violations (conflict, insufficient-resource) are detected
//! synchronously inside the orchestrating transaction, roll it back, and
//! are returned typed to the caller; they are never queued or retried.
//! Side-effect failures live in the outbox and never surface here.

use common::{CheckoutSessionId, SlotId, VariantId};
use domain::DomainError;
use outbox::OutboxError;
use storage::StorageError;
use thiserror::Error;

/// Errors returned by the order operations.
#[derive(Debug, Error)]
pub enum OrdersError {
    /// Malformed input, rejected before any lock is taken.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced record does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The record is not in the status the operation requires.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The checkout session's TTL elapsed.
    #[error("checkout session {0} has expired")]
    Expired(CheckoutSessionId),

    /// The soft reservation lapsed or was never taken.
    #[error("reservation for checkout session {0} has lapsed")]
    ReservationExpired(CheckoutSessionId),

    /// Idempotent guard: the session already produced an order.
    #[error("checkout session {0} already produced an order")]
    AlreadyExists(CheckoutSessionId),

    /// Not enough unreserved stock for a variant.
    #[error(
        "insufficient inventory for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientInventory {
        variant_id: VariantId,
        requested: u32,
        available: u32,
    },

    /// Not enough remaining capacity on a booking slot.
    #[error(
        "booking slot {slot_id} unavailable: requested {requested}, remaining {remaining}"
    )]
    SlotUnavailable {
        slot_id: SlotId,
        requested: u32,
        remaining: u32,
    },

    /// The advisory refund predicate denied the request.
    #[error("refund not allowed: {reason}")]
    RefundNotAllowed { reason: String },

    /// A domain rule failed (illegal transition and friends). Transition
    /// conflicts carry the currently allowed next statuses.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// An error occurred in the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An error occurred staging an outbox event.
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// A payload failed to serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrdersError>;
