//! Checkout sessions and their immutable cart snapshots.

use chrono::{DateTime, Utc};
use common::{
    CheckoutSessionId, Currency, CustomerId, InvalidEnumValue, ItemKind, MerchantId, Money,
    OrderId, SlotId, VariantId,
};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Lifecycle status of a checkout session.
///
/// `Completed` is monotonic and irreversible: once an order reference is
/// stamped the session never leaves this status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    #[default]
    InProgress,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl CheckoutStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::InProgress => "in_progress",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Expired => "expired",
            CheckoutStatus::Cancelled => "cancelled",
            CheckoutStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CheckoutStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(CheckoutStatus::InProgress),
            "completed" => Ok(CheckoutStatus::Completed),
            "expired" => Ok(CheckoutStatus::Expired),
            "cancelled" => Ok(CheckoutStatus::Cancelled),
            "failed" => Ok(CheckoutStatus::Failed),
            other => Err(InvalidEnumValue::new("checkout status", other)),
        }
    }
}

/// Who owns a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutOwner {
    /// A signed-in customer.
    Customer { customer_id: CustomerId },
    /// An anonymous visitor identified only by their browser session.
    Anonymous { session_token: String },
}

/// How the customer chose to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Paypal,
    BankTransfer,
}

impl PaymentMethod {
    /// Returns the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "paypal" => Ok(PaymentMethod::Paypal),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(InvalidEnumValue::new("payment method", other)),
        }
    }
}

/// A postal address, stored as entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// Computed monetary totals for a checkout or order.
///
/// Invariant: `total = max(0, subtotal + tax + shipping - discount)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: Currency,
}

impl Totals {
    /// Builds totals from components, computing the clamped total.
    pub fn from_components(
        subtotal: Money,
        tax: Money,
        shipping: Money,
        discount: Money,
        currency: Currency,
    ) -> Self {
        let total = (subtotal + tax + shipping - discount).clamped_non_negative();
        Self {
            subtotal,
            tax,
            shipping,
            discount,
            total,
            currency,
        }
    }

    /// Zero totals in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self::from_components(
            Money::zero(),
            Money::zero(),
            Money::zero(),
            Money::zero(),
            currency,
        )
    }
}

/// One line of an immutable cart snapshot.
///
/// Captured when the checkout session is created; prices and quantities
/// never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub product_name: String,
    pub merchant_id: MerchantId,
    pub kind: ItemKind,
    pub quantity: u32,
    pub unit_price: Money,
    pub currency: Currency,
    /// Booked slot, service items only.
    pub slot_id: Option<SlotId>,
    /// Scheduled time of the booked service, service items only.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CartLine {
    /// Returns the extended price of this line.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A shopping checkout in flight.
///
/// Created when checkout starts, mutated through the address/payment/promo
/// steps, and terminated exactly once by completion, cancellation, or TTL
/// expiry (detected lazily on the next read).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub owner: CheckoutOwner,
    /// Where order updates go for guest checkouts; optional for signed-in
    /// customers.
    pub contact_email: Option<String>,
    pub cart: Vec<CartLine>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub totals: Totals,
    pub payment_method: Option<PaymentMethod>,
    pub promo_codes: Vec<String>,
    pub status: CheckoutStatus,
    pub expires_at: DateTime<Utc>,
    /// Set at most once, when the session completes into an order.
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Creates a new in-progress session over a validated cart snapshot.
    pub fn new(
        id: CheckoutSessionId,
        owner: CheckoutOwner,
        cart: Vec<CartLine>,
        totals: Totals,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if cart.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        let currency = cart[0].currency;
        for line in &cart {
            if line.quantity == 0 {
                return Err(DomainError::InvalidQuantity { quantity: 0 });
            }
            if line.currency != currency {
                return Err(DomainError::CurrencyMismatch {
                    expected: currency,
                    found: line.currency,
                });
            }
        }
        Ok(Self {
            id,
            owner,
            contact_email: None,
            cart,
            shipping_address: None,
            billing_address: None,
            totals,
            payment_method: None,
            promo_codes: Vec::new(),
            status: CheckoutStatus::InProgress,
            expires_at,
            order_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true once the session's TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Stamps the order reference and moves to `Completed`.
    ///
    /// Fails if the session already references an order or is not in
    /// progress; completion is irreversible.
    pub fn complete(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.order_id.is_some() {
            return Err(DomainError::SessionAlreadyCompleted);
        }
        if self.status != CheckoutStatus::InProgress {
            return Err(DomainError::SessionNotInProgress {
                status: self.status,
            });
        }
        self.order_id = Some(order_id);
        self.status = CheckoutStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Marks a lapsed session `Expired` (lazy detection on read).
    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = CheckoutStatus::Expired;
        self.updated_at = now;
    }

    /// Marks the session `Cancelled`.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = CheckoutStatus::Cancelled;
        self.updated_at = now;
    }

    /// Marks the session `Failed` (payment declined or similar).
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = CheckoutStatus::Failed;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn line(kind: ItemKind, quantity: u32, cents: i64) -> CartLine {
        CartLine {
            variant_id: VariantId::new(),
            product_name: "Widget".to_string(),
            merchant_id: MerchantId::new(),
            kind,
            quantity,
            unit_price: Money::from_cents(cents),
            currency: Currency::Usd,
            slot_id: None,
            scheduled_at: None,
        }
    }

    fn session_with(cart: Vec<CartLine>) -> Result<CheckoutSession, DomainError> {
        let now = Utc::now();
        CheckoutSession::new(
            CheckoutSessionId::new(),
            CheckoutOwner::Anonymous {
                session_token: "tok".to_string(),
            },
            cart,
            Totals::zero(Currency::Usd),
            now + Duration::minutes(30),
            now,
        )
    }

    #[test]
    fn totals_clamp_negative_to_zero() {
        let totals = Totals::from_components(
            Money::from_cents(1000),
            Money::zero(),
            Money::zero(),
            Money::from_cents(5000),
            Currency::Usd,
        );
        assert_eq!(totals.total, Money::zero());
    }

    #[test]
    fn totals_formula() {
        let totals = Totals::from_components(
            Money::from_cents(2500),
            Money::from_cents(150),
            Money::from_cents(500),
            Money::zero(),
            Currency::Usd,
        );
        assert_eq!(totals.total.cents(), 3150);
    }

    #[test]
    fn empty_cart_rejected() {
        assert!(matches!(session_with(vec![]), Err(DomainError::EmptyCart)));
    }

    #[test]
    fn zero_quantity_rejected() {
        let result = session_with(vec![line(ItemKind::Physical, 0, 1000)]);
        assert!(matches!(
            result,
            Err(DomainError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn mixed_currency_rejected() {
        let mut eur_line = line(ItemKind::Digital, 1, 500);
        eur_line.currency = Currency::Eur;
        let result = session_with(vec![line(ItemKind::Physical, 1, 1000), eur_line]);
        assert!(matches!(result, Err(DomainError::CurrencyMismatch { .. })));
    }

    #[test]
    fn completion_is_monotonic() {
        let mut session = session_with(vec![line(ItemKind::Physical, 2, 1000)]).unwrap();
        let now = Utc::now();
        session.complete(OrderId::new(), now).unwrap();
        assert_eq!(session.status, CheckoutStatus::Completed);

        let err = session.complete(OrderId::new(), now).unwrap_err();
        assert_eq!(err, DomainError::SessionAlreadyCompleted);
    }

    #[test]
    fn cannot_complete_cancelled_session() {
        let mut session = session_with(vec![line(ItemKind::Physical, 1, 1000)]).unwrap();
        let now = Utc::now();
        session.mark_cancelled(now);
        assert!(matches!(
            session.complete(OrderId::new(), now),
            Err(DomainError::SessionNotInProgress { .. })
        ));
    }

    #[test]
    fn expiry_is_lazy() {
        let session = session_with(vec![line(ItemKind::Service, 1, 4000)]).unwrap();
        assert!(!session.is_expired(session.expires_at - Duration::seconds(1)));
        assert!(session.is_expired(session.expires_at));
    }

    #[test]
    fn line_total() {
        assert_eq!(line(ItemKind::Physical, 3, 1250).line_total().cents(), 3750);
    }
}
