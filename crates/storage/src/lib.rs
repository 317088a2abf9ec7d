//! Transactional storage for the checkout-to-order core.
//!
//! The [`Storage`] trait hands out [`UnitOfWork`] transaction contexts
//! that are passed by value into every operation; there is no ambient or
//! global transaction state. Dropping an uncommitted unit of work rolls
//! its writes back.
//!
//! Two backends ship: [`InMemoryStorage`] (whole-store mutex, used by
//! tests and local wiring) and [`PostgresStorage`] (sqlx, row-level
//! `FOR UPDATE` locks).

pub mod error;
pub mod memory;
pub mod postgres;
pub mod uow;

pub use error::{Result, StorageError};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use uow::{Storage, UnitOfWork};
