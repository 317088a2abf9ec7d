//! Shared identifier and value types for the checkout-to-order core.
//!
//! Everything here is plain data: UUID-backed identifier newtypes, integer
//! money, and the closed enumerations (currency, item kind, actor) that the
//! rest of the workspace builds on. Records never hold references to each
//! other, only identifiers from this crate.

pub mod types;

pub use types::{
    Actor, CheckoutSessionId, Currency, CustomerId, DlqEntryId, InvalidEnumValue, ItemKind,
    LineItemId, MerchantId, Money, OrderId, OrderNumber, OutboxEventId, SlotId, VariantId,
};
