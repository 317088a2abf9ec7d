//! The surrounding checkout workflow: session opening with reservation,
//! and the payment-callback driven handoff into order creation.

use chrono::{DateTime, Duration, Utc};
use common::{Actor, CheckoutSessionId};
use domain::checkout::{
    Address, CartLine, CheckoutOwner, CheckoutSession, CheckoutStatus, PaymentMethod,
};
use domain::item::LineItemStatus;
use domain::Order;
use storage::{Storage, UnitOfWork};

use crate::error::{OrdersError, Result};
use crate::orchestrator::OrderOrchestrator;
use crate::payment::{PaymentCallback, PaymentOutcome};
use crate::reservation::{ReservationConfig, ReservationLine, ReservationManager, ReservationStore};
use crate::totals::TotalsEngine;
use crate::transition::{LineItemService, TransitionCommand};

/// How long a checkout session stays open.
const SESSION_TTL_MINUTES: i64 = 30;

/// Wires the orchestrator, the line-item service, and the reservation
/// manager around the checkout lifecycle.
pub struct CheckoutWorkflow<S: Storage + Clone, R: ReservationStore> {
    storage: S,
    orchestrator: OrderOrchestrator<S>,
    items: LineItemService<S>,
    reservations: ReservationManager<S, R>,
}

/// Inputs to open a checkout session.
pub struct OpenSession {
    pub owner: CheckoutOwner,
    pub contact_email: Option<String>,
    pub cart: Vec<CartLine>,
    pub shipping_address: Option<Address>,
    pub promo_codes: Vec<String>,
    /// Reservation lines derived from the cart plus catalog capacity
    /// lookups for booked slots.
    pub reservation_lines: Vec<ReservationLine>,
}

impl<S: Storage + Clone, R: ReservationStore> CheckoutWorkflow<S, R> {
    /// Creates a workflow over the given storage and reservation store.
    pub fn new(storage: S, reservation_store: R, reservation_config: ReservationConfig) -> Self {
        Self {
            orchestrator: OrderOrchestrator::new(storage.clone()),
            items: LineItemService::new(storage.clone()),
            reservations: ReservationManager::new(
                storage.clone(),
                reservation_store,
                reservation_config,
            ),
            storage,
        }
    }

    /// The reservation manager, for direct extend/release calls.
    pub fn reservations(&self) -> &ReservationManager<S, R> {
        &self.reservations
    }

    /// The line-item service, for merchant fulfillment calls.
    pub fn items(&self) -> &LineItemService<S> {
        &self.items
    }

    /// Opens a checkout session: takes the soft reservation first, then
    /// persists the session with its computed totals and TTL. A failed
    /// reservation means no session is created.
    #[tracing::instrument(skip(self, input, totals), fields(cart = input.cart.len()))]
    pub async fn open_session(
        &self,
        input: OpenSession,
        totals: &dyn TotalsEngine,
    ) -> Result<CheckoutSession> {
        self.open_session_at(input, totals, Utc::now()).await
    }

    /// [`Self::open_session`] with an explicit clock.
    pub async fn open_session_at(
        &self,
        input: OpenSession,
        totals: &dyn TotalsEngine,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession> {
        let session_id = CheckoutSessionId::new();
        self.reservations
            .reserve_at(session_id, &input.reservation_lines, now)
            .await?;

        let computed = totals.compute_totals(
            &input.cart,
            input.shipping_address.as_ref(),
            &input.promo_codes,
        );
        let session = CheckoutSession::new(
            session_id,
            input.owner,
            input.cart,
            computed,
            now + Duration::minutes(SESSION_TTL_MINUTES),
            now,
        );
        let mut session = match session {
            Ok(session) => session,
            Err(err) => {
                // Validation failed after the holds were taken; free them.
                self.reservations.release(session_id).await?;
                return Err(err.into());
            }
        };
        session.contact_email = input.contact_email;
        session.shipping_address = input.shipping_address;
        session.promo_codes = input.promo_codes;

        let persisted = async {
            let mut uow = self.storage.begin().await?;
            uow.insert_checkout_session(&session).await?;
            uow.commit().await
        }
        .await;
        if let Err(err) = persisted {
            self.reservations.release(session_id).await?;
            return Err(err.into());
        }

        tracing::info!(session_id = %session.id, "checkout session opened");
        Ok(session)
    }

    /// Records the shipping address and recomputes totals.
    pub async fn set_shipping_address(
        &self,
        session_id: CheckoutSessionId,
        address: Address,
        totals: &dyn TotalsEngine,
    ) -> Result<CheckoutSession> {
        self.update_open_session_at(session_id, Utc::now(), |session| {
            session.shipping_address = Some(address);
            session.totals = totals.compute_totals(
                &session.cart,
                session.shipping_address.as_ref(),
                &session.promo_codes,
            );
        })
        .await
    }

    /// Records the chosen payment method.
    pub async fn choose_payment_method(
        &self,
        session_id: CheckoutSessionId,
        method: PaymentMethod,
    ) -> Result<CheckoutSession> {
        self.update_open_session_at(session_id, Utc::now(), |session| {
            session.payment_method = Some(method);
        })
        .await
    }

    /// Applies a promo code and recomputes totals. Codes are deduplicated.
    pub async fn apply_promo_code(
        &self,
        session_id: CheckoutSessionId,
        code: impl Into<String>,
        totals: &dyn TotalsEngine,
    ) -> Result<CheckoutSession> {
        let code = code.into();
        self.update_open_session_at(session_id, Utc::now(), |session| {
            if !session.promo_codes.contains(&code) {
                session.promo_codes.push(code);
            }
            session.totals = totals.compute_totals(
                &session.cart,
                session.shipping_address.as_ref(),
                &session.promo_codes,
            );
        })
        .await
    }

    /// Locks the session, re-validates it is still open (detecting lapsed
    /// TTLs on the way), applies the mutation, and persists it.
    async fn update_open_session_at<F>(
        &self,
        session_id: CheckoutSessionId,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<CheckoutSession>
    where
        F: FnOnce(&mut CheckoutSession),
    {
        let mut uow = self.storage.begin().await?;
        let mut session = uow
            .checkout_session_for_update(session_id)
            .await?
            .ok_or(OrdersError::NotFound {
                what: "checkout session",
                id: session_id.to_string(),
            })?;
        if session.status == CheckoutStatus::InProgress && session.is_expired(now) {
            session.mark_expired(now);
            uow.update_checkout_session(&session).await?;
            uow.commit().await?;
            return Err(OrdersError::Expired(session_id));
        }
        if session.status != CheckoutStatus::InProgress {
            return Err(OrdersError::Conflict(format!(
                "checkout session {session_id} is {}, expected in_progress",
                session.status
            )));
        }

        mutate(&mut session);
        session.updated_at = now;
        uow.update_checkout_session(&session).await?;
        uow.commit().await?;
        Ok(session)
    }

    /// Reacts to the payment gateway's callback.
    ///
    /// Success creates the order, commits the reservation to the ledger,
    /// and confirms payment on every line item. Failure or cancellation
    /// terminates the session and releases the holds. Returns the created
    /// order on success.
    #[tracing::instrument(skip(self, callback), fields(session_id = %callback.checkout_session_id, outcome = ?callback.outcome))]
    pub async fn handle_payment_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<Option<Order>> {
        self.handle_payment_callback_at(callback, Utc::now()).await
    }

    /// [`Self::handle_payment_callback`] with an explicit clock.
    pub async fn handle_payment_callback_at(
        &self,
        callback: PaymentCallback,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let session_id = callback.checkout_session_id;
        match callback.outcome {
            PaymentOutcome::Succeeded => {
                let (order, items) = self
                    .orchestrator
                    .create_order_from_checkout_at(session_id, &callback.intent_ref, now)
                    .await?;

                // Decrement the ledger by what the session held. A vanished
                // reservation cannot unwind the paid order; it only means
                // the holds lapsed before the webhook arrived.
                match self.reservations.manifest(session_id).await {
                    Some(manifest) => {
                        self.reservations
                            .commit_at(session_id, &manifest.lines, now)
                            .await?;
                    }
                    None => {
                        tracing::error!(
                            %session_id,
                            "reservation lapsed before payment callback; ledger not decremented"
                        );
                    }
                }

                for item in &items {
                    self.items
                        .transition_at(
                            TransitionCommand::new(
                                item.id,
                                LineItemStatus::PaymentConfirmed,
                                Actor::System,
                            )
                            .with_reason("payment confirmed"),
                            now,
                        )
                        .await?;
                }
                Ok(Some(order))
            }
            PaymentOutcome::Failed => {
                self.terminate_session(session_id, CheckoutStatus::Failed, now)
                    .await?;
                Ok(None)
            }
            PaymentOutcome::Canceled => {
                self.terminate_session(session_id, CheckoutStatus::Cancelled, now)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn terminate_session(
        &self,
        session_id: CheckoutSessionId,
        status: CheckoutStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut uow = self.storage.begin().await?;
        if let Some(mut session) = uow.checkout_session_for_update(session_id).await?
            && session.status == CheckoutStatus::InProgress
        {
            match status {
                CheckoutStatus::Cancelled => session.mark_cancelled(now),
                _ => session.mark_failed(now),
            }
            uow.update_checkout_session(&session).await?;
            uow.commit().await?;
        }
        self.reservations.release(session_id).await?;
        Ok(())
    }
}
