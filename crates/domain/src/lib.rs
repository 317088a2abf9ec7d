//! Domain layer for the checkout-to-order core.
//!
//! This crate holds the records and the pure logic only:
//! - checkout sessions with their immutable cart snapshots
//! - orders with clamped monetary totals and the derived aggregate status
//! - line items with per-kind transition tables, a total side-effect
//!   dispatch table, and the advisory refund-eligibility predicate
//! - append-only audit rows and status history
//! - outbox and dead-letter rows (the data model of the outbox pattern)
//! - the authoritative stock ledger row
//!
//! Nothing here performs I/O; persistence and orchestration live in the
//! `storage` and `orders` crates, which pass explicit transaction contexts
//! around these types.

pub mod audit;
pub mod checkout;
pub mod error;
pub mod item;
pub mod order;
pub mod outbox;
pub mod stock;

pub use audit::OrderStatusTransition;
pub use checkout::{
    Address, CartLine, CheckoutOwner, CheckoutSession, CheckoutStatus, PaymentMethod, Totals,
};
pub use error::DomainError;
pub use item::{
    FulfillmentData, LineItemStatus, OrderLineItem, RefundDecision, StatusHistoryEntry,
    TransitionContext, allowed_transitions, refund_eligibility,
};
pub use order::{Order, OrderOwner, OrderStatus, PaymentStatus, derive_order_status};
pub use outbox::{
    AggregateKind, FailureRecord, OutboxDlqEntry, OutboxEvent, OutboxStats, OutboxStatus,
};
pub use stock::StockLevel;
