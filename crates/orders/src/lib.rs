//! Order operations for the checkout-to-order core.
//!
//! This crate is the meeting point of the domain records, the storage
//! layer, and the outbox:
//! - [`OrderOrchestrator`] converts a completed checkout session into a
//!   durable order inside one transaction
//! - [`LineItemService`] drives per-item fulfillment transitions and keeps
//!   the aggregate order status derived
//! - [`ReservationManager`] soft-holds inventory and slot capacity while a
//!   checkout is in flight, and commits the ledger after payment
//! - [`CheckoutWorkflow`] wires the three together around the payment
//!   gateway's callback contract

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod payment;
pub mod reservation;
pub mod totals;
pub mod transition;
pub mod workflow;

pub use error::OrdersError;
pub use orchestrator::OrderOrchestrator;
pub use payment::{PaymentCallback, PaymentOutcome};
pub use reservation::{
    InMemoryReservationStore, ReservationConfig, ReservationLine, ReservationManager,
    ReservationManifest, ReservationStore, SlotReservation,
};
pub use totals::{FlatRateTotalsEngine, TotalsEngine};
pub use transition::{LineItemService, TransitionCommand};
pub use workflow::{CheckoutWorkflow, OpenSession};
