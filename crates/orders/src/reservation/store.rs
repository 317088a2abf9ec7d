//! The fast TTL store for soft reservations.
//!
//! Holds are keyed by (variant, session) and (slot, session) with a
//! wall-clock expiry; a per-session manifest records everything one
//! checkout attempt reserved so it can be released or committed
//! atomically. Expiry is lazy: a lapsed hold simply stops counting on the
//! next availability check.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutSessionId, ItemKind, SlotId, VariantId};
use serde::{Deserialize, Serialize};

/// Capacity check for one booked service slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReservation {
    pub slot_id: SlotId,
    /// Catalog-supplied capacity of the slot.
    pub capacity: u32,
}

/// One line of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub variant_id: VariantId,
    pub kind: ItemKind,
    pub quantity: u32,
    /// Present for service lines, which reserve slot capacity instead of
    /// ledger stock.
    pub slot: Option<SlotReservation>,
}

impl ReservationLine {
    /// A stock-backed line (physical or digital).
    pub fn stock(variant_id: VariantId, kind: ItemKind, quantity: u32) -> Self {
        Self {
            variant_id,
            kind,
            quantity,
            slot: None,
        }
    }

    /// A slot-backed service line.
    pub fn slot(variant_id: VariantId, quantity: u32, slot_id: SlotId, capacity: u32) -> Self {
        Self {
            variant_id,
            kind: ItemKind::Service,
            quantity,
            slot: Some(SlotReservation { slot_id, capacity }),
        }
    }
}

/// Everything one session reserved, so the whole reservation can be found
/// and released atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationManifest {
    pub session_id: CheckoutSessionId,
    pub lines: Vec<ReservationLine>,
    pub expires_at: DateTime<Utc>,
}

impl ReservationManifest {
    /// Returns true once the reservation's TTL elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The fast shared store backing soft reservations.
///
/// Not the source of truth: an over-count here can only cause a false
/// "out of stock", never an oversell, because the ledger decrement happens
/// once, under lock, at commit time.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Unexpired quantity held against a variant, excluding one session's
    /// own holds when given (so re-reserving does not double-count).
    async fn reserved_quantity(
        &self,
        variant_id: VariantId,
        exclude: Option<CheckoutSessionId>,
        now: DateTime<Utc>,
    ) -> u32;

    /// Unexpired quantity held against a slot, with the same exclusion.
    async fn slot_reserved(
        &self,
        slot_id: SlotId,
        exclude: Option<CheckoutSessionId>,
        now: DateTime<Utc>,
    ) -> u32;

    /// Writes all holds of a manifest plus the manifest itself,
    /// replacing any previous reservation of the same session.
    async fn put_holds(&self, manifest: &ReservationManifest);

    /// Reads a session's manifest, expired or not.
    async fn manifest(&self, session_id: CheckoutSessionId) -> Option<ReservationManifest>;

    /// Drops a session's holds and manifest. Returns false when there was
    /// nothing to remove (already released or expired away).
    async fn remove(&self, session_id: CheckoutSessionId) -> bool;

    /// Pushes the expiry of a session's manifest and holds. Returns false
    /// when the session holds nothing.
    async fn extend(&self, session_id: CheckoutSessionId, expires_at: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Hold {
    quantity: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    stock_holds: HashMap<(VariantId, CheckoutSessionId), Hold>,
    slot_holds: HashMap<(SlotId, CheckoutSessionId), Hold>,
    manifests: HashMap<CheckoutSessionId, ReservationManifest>,
}

/// In-memory TTL store, the single-process stand-in for Redis-like
/// deployments.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryReservationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live manifests (test inspection).
    pub fn manifest_count(&self) -> usize {
        self.state.read().unwrap().manifests.len()
    }

    /// Drops expired holds and manifests. Optional hygiene only; expiry is
    /// already detected lazily on every read.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        state.stock_holds.retain(|_, h| h.expires_at > now);
        state.slot_holds.retain(|_, h| h.expires_at > now);
        state.manifests.retain(|_, m| !m.is_expired(now));
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn reserved_quantity(
        &self,
        variant_id: VariantId,
        exclude: Option<CheckoutSessionId>,
        now: DateTime<Utc>,
    ) -> u32 {
        let state = self.state.read().unwrap();
        state
            .stock_holds
            .iter()
            .filter(|((variant, session), hold)| {
                *variant == variant_id && Some(*session) != exclude && hold.expires_at > now
            })
            .map(|(_, hold)| hold.quantity)
            .sum()
    }

    async fn slot_reserved(
        &self,
        slot_id: SlotId,
        exclude: Option<CheckoutSessionId>,
        now: DateTime<Utc>,
    ) -> u32 {
        let state = self.state.read().unwrap();
        state
            .slot_holds
            .iter()
            .filter(|((slot, session), hold)| {
                *slot == slot_id && Some(*session) != exclude && hold.expires_at > now
            })
            .map(|(_, hold)| hold.quantity)
            .sum()
    }

    async fn put_holds(&self, manifest: &ReservationManifest) {
        let mut state = self.state.write().unwrap();
        let session = manifest.session_id;
        state.stock_holds.retain(|(_, s), _| *s != session);
        state.slot_holds.retain(|(_, s), _| *s != session);
        for line in &manifest.lines {
            let hold = Hold {
                quantity: line.quantity,
                expires_at: manifest.expires_at,
            };
            match &line.slot {
                Some(slot) => {
                    state.slot_holds.insert((slot.slot_id, session), hold);
                }
                None => {
                    state.stock_holds.insert((line.variant_id, session), hold);
                }
            }
        }
        state.manifests.insert(session, manifest.clone());
    }

    async fn manifest(&self, session_id: CheckoutSessionId) -> Option<ReservationManifest> {
        self.state.read().unwrap().manifests.get(&session_id).cloned()
    }

    async fn remove(&self, session_id: CheckoutSessionId) -> bool {
        let mut state = self.state.write().unwrap();
        state.stock_holds.retain(|(_, s), _| *s != session_id);
        state.slot_holds.retain(|(_, s), _| *s != session_id);
        state.manifests.remove(&session_id).is_some()
    }

    async fn extend(&self, session_id: CheckoutSessionId, expires_at: DateTime<Utc>) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(manifest) = state.manifests.get_mut(&session_id) else {
            return false;
        };
        manifest.expires_at = expires_at;
        for hold in state
            .stock_holds
            .iter_mut()
            .filter(|((_, s), _)| *s == session_id)
            .map(|(_, h)| h)
        {
            hold.expires_at = expires_at;
        }
        for hold in state
            .slot_holds
            .iter_mut()
            .filter(|((_, s), _)| *s == session_id)
            .map(|(_, h)| h)
        {
            hold.expires_at = expires_at;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn manifest(
        session: CheckoutSessionId,
        variant: VariantId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> ReservationManifest {
        ReservationManifest {
            session_id: session,
            lines: vec![ReservationLine::stock(variant, ItemKind::Physical, quantity)],
            expires_at,
        }
    }

    #[tokio::test]
    async fn holds_count_until_expiry() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let variant = VariantId::new();
        let session = CheckoutSessionId::new();

        store
            .put_holds(&manifest(session, variant, 2, now + Duration::minutes(15)))
            .await;

        assert_eq!(store.reserved_quantity(variant, None, now).await, 2);
        // Lazy expiry: the hold silently stops counting.
        assert_eq!(
            store
                .reserved_quantity(variant, None, now + Duration::minutes(16))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn own_session_holds_are_excluded() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let variant = VariantId::new();
        let session = CheckoutSessionId::new();

        store
            .put_holds(&manifest(session, variant, 2, now + Duration::minutes(15)))
            .await;

        assert_eq!(store.reserved_quantity(variant, Some(session), now).await, 0);
        assert_eq!(
            store
                .reserved_quantity(variant, Some(CheckoutSessionId::new()), now)
                .await,
            2
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let variant = VariantId::new();
        let session = CheckoutSessionId::new();

        store
            .put_holds(&manifest(session, variant, 2, now + Duration::minutes(15)))
            .await;

        assert!(store.remove(session).await);
        assert!(!store.remove(session).await);
        assert_eq!(store.reserved_quantity(variant, None, now).await, 0);
    }

    #[tokio::test]
    async fn extend_pushes_hold_expiry() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let variant = VariantId::new();
        let session = CheckoutSessionId::new();

        store
            .put_holds(&manifest(session, variant, 1, now + Duration::minutes(15)))
            .await;
        assert!(store.extend(session, now + Duration::minutes(45)).await);

        assert_eq!(
            store
                .reserved_quantity(variant, None, now + Duration::minutes(30))
                .await,
            1
        );
        assert!(!store.extend(CheckoutSessionId::new(), now).await);
    }

    #[tokio::test]
    async fn sweep_drops_lapsed_entries() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let session = CheckoutSessionId::new();
        store
            .put_holds(&manifest(session, VariantId::new(), 1, now + Duration::minutes(1)))
            .await;

        store.sweep(now + Duration::minutes(5));
        assert_eq!(store.manifest_count(), 0);
        assert!(store.manifest(session).await.is_none());
    }
}
