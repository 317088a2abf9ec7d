//! Authoritative stock ledger rows.

use chrono::{DateTime, Utc};
use common::VariantId;
use serde::{Deserialize, Serialize};

/// On-hand stock for one product variant.
///
/// This is the source of truth. Soft reservations live in a separate TTL
/// store and never touch this row; the only mutation path is the
/// post-payment reservation commit, under a row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub variant_id: VariantId,
    pub on_hand: u32,
    /// When false the variant sells without an inventory limit and
    /// reservations always pass.
    pub enforce_limit: bool,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Creates a ledger row for a variant.
    pub fn new(variant_id: VariantId, on_hand: u32, enforce_limit: bool, now: DateTime<Utc>) -> Self {
        Self {
            variant_id,
            on_hand,
            enforce_limit,
            updated_at: now,
        }
    }

    /// Decrements on-hand stock, never below zero.
    pub fn decrement(&mut self, quantity: u32, now: DateTime<Utc>) {
        self.on_hand = self.on_hand.saturating_sub(quantity);
        self.updated_at = now;
    }
}
