//! Inventory reservation: TTL-bound soft holds over a fast store, with the
//! authoritative ledger only mutated at post-payment commit.

mod manager;
mod store;

pub use manager::{ReservationConfig, ReservationManager};
pub use store::{
    InMemoryReservationStore, ReservationLine, ReservationManifest, ReservationStore,
    SlotReservation,
};
