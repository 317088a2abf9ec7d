//! The reservation manager: availability checks under ledger locks, soft
//! holds, and the post-payment ledger commit.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use common::CheckoutSessionId;
use storage::{Storage, UnitOfWork};

use crate::error::{OrdersError, Result};

use super::store::{ReservationLine, ReservationManifest, ReservationStore};

/// Reservation tuning.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// How long a soft hold lasts before lapsing.
    pub ttl: StdDuration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ttl: StdDuration::from_secs(15 * 60),
        }
    }
}

impl ReservationConfig {
    fn ttl_chrono(&self) -> Duration {
        Duration::from_std(self.ttl).unwrap_or_else(|_| Duration::minutes(15))
    }
}

/// Prevents overselling while a checkout is in flight.
///
/// Availability checks run inside one transaction holding `FOR UPDATE`
/// ledger locks; the soft holds themselves live in the fast TTL store and
/// never touch the ledger. Only [`ReservationManager::commit`] mutates
/// on-hand stock, and only after payment succeeded.
pub struct ReservationManager<S: Storage, R: ReservationStore> {
    storage: S,
    store: R,
    config: ReservationConfig,
}

impl<S: Storage, R: ReservationStore> ReservationManager<S, R> {
    /// Creates a manager over the ledger storage and the TTL store.
    pub fn new(storage: S, store: R, config: ReservationConfig) -> Self {
        Self {
            storage,
            store,
            config,
        }
    }

    /// Soft-reserves every line for a checkout session, all-or-nothing.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve(
        &self,
        session_id: CheckoutSessionId,
        lines: &[ReservationLine],
    ) -> Result<ReservationManifest> {
        self.reserve_at(session_id, lines, Utc::now()).await
    }

    /// [`Self::reserve`] with an explicit clock.
    pub async fn reserve_at(
        &self,
        session_id: CheckoutSessionId,
        lines: &[ReservationLine],
        now: DateTime<Utc>,
    ) -> Result<ReservationManifest> {
        for line in lines {
            if line.quantity == 0 {
                return Err(OrdersError::Validation(
                    "reservation quantities must be greater than 0".to_string(),
                ));
            }
        }

        // Validate every line under ledger row locks before holding
        // anything, so a failed line leaves no partial holds behind.
        let mut uow = self.storage.begin().await?;
        for line in lines {
            match &line.slot {
                Some(slot) => {
                    let held = self
                        .store
                        .slot_reserved(slot.slot_id, Some(session_id), now)
                        .await;
                    let remaining = slot.capacity.saturating_sub(held);
                    if line.quantity > remaining {
                        metrics::counter!("reservation_conflicts_total").increment(1);
                        return Err(OrdersError::SlotUnavailable {
                            slot_id: slot.slot_id,
                            requested: line.quantity,
                            remaining,
                        });
                    }
                }
                None => {
                    let Some(level) = uow.stock_level_for_update(line.variant_id).await? else {
                        // Variants without a ledger row sell untracked.
                        continue;
                    };
                    if !level.enforce_limit {
                        continue;
                    }
                    let held = self
                        .store
                        .reserved_quantity(line.variant_id, Some(session_id), now)
                        .await;
                    let available = level.on_hand.saturating_sub(held);
                    if line.quantity > available {
                        metrics::counter!("reservation_conflicts_total").increment(1);
                        return Err(OrdersError::InsufficientInventory {
                            variant_id: line.variant_id,
                            requested: line.quantity,
                            available,
                        });
                    }
                }
            }
        }

        let manifest = ReservationManifest {
            session_id,
            lines: lines.to_vec(),
            expires_at: now + self.config.ttl_chrono(),
        };
        self.store.put_holds(&manifest).await;
        // The transaction only held validation locks; releasing them now
        // lets the next checkout see these holds through the store.
        uow.commit().await?;

        metrics::counter!("reservations_taken_total").increment(1);
        Ok(manifest)
    }

    /// Releases a session's reservation. Idempotent: a missing manifest is
    /// a no-op, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, session_id: CheckoutSessionId) -> Result<()> {
        if self.store.remove(session_id).await {
            metrics::counter!("reservations_released_total").increment(1);
        }
        Ok(())
    }

    /// Commits a reservation after payment: decrements the ledger by each
    /// reserved quantity (never below zero) under row locks, then drops
    /// the soft holds. The only operation that mutates on-hand stock.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn commit(
        &self,
        session_id: CheckoutSessionId,
        lines: &[ReservationLine],
    ) -> Result<()> {
        self.commit_at(session_id, lines, Utc::now()).await
    }

    /// [`Self::commit`] with an explicit clock.
    pub async fn commit_at(
        &self,
        session_id: CheckoutSessionId,
        lines: &[ReservationLine],
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Payment already succeeded, so a lapsed-but-present manifest
        // still commits; only a vanished reservation is an error.
        if self.store.manifest(session_id).await.is_none() {
            return Err(OrdersError::ReservationExpired(session_id));
        }

        let mut uow = self.storage.begin().await?;
        for line in lines {
            if line.slot.is_some() {
                continue;
            }
            if let Some(mut level) = uow.stock_level_for_update(line.variant_id).await? {
                level.decrement(line.quantity, now);
                uow.update_stock_level(&level).await?;
            }
        }
        uow.commit().await?;

        self.store.remove(session_id).await;
        metrics::counter!("reservations_committed_total").increment(1);
        Ok(())
    }

    /// Refreshes an active reservation's TTL. Fails once the reservation
    /// already lapsed.
    #[tracing::instrument(skip(self))]
    pub async fn extend(&self, session_id: CheckoutSessionId) -> Result<ReservationManifest> {
        self.extend_at(session_id, Utc::now()).await
    }

    /// [`Self::extend`] with an explicit clock.
    pub async fn extend_at(
        &self,
        session_id: CheckoutSessionId,
        now: DateTime<Utc>,
    ) -> Result<ReservationManifest> {
        let Some(manifest) = self.store.manifest(session_id).await else {
            return Err(OrdersError::ReservationExpired(session_id));
        };
        if manifest.is_expired(now) {
            return Err(OrdersError::ReservationExpired(session_id));
        }

        let expires_at = now + self.config.ttl_chrono();
        self.store.extend(session_id, expires_at).await;
        Ok(ReservationManifest {
            expires_at,
            ..manifest
        })
    }

    /// Reads a session's manifest from the fast store.
    pub async fn manifest(&self, session_id: CheckoutSessionId) -> Option<ReservationManifest> {
        self.store.manifest(session_id).await
    }
}
