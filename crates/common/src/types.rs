use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when decoding a closed enumeration from its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what} value: {value}")]
pub struct InvalidEnumValue {
    pub what: &'static str,
    pub value: String,
}

impl InvalidEnumValue {
    pub fn new(what: &'static str, value: impl Into<String>) -> Self {
        Self {
            what,
            value: value.into(),
        }
    }
}

/// Defines a UUID-backed identifier newtype.
///
/// Wrapping the UUID prevents mixing up identifiers of different record
/// types at compile time.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order.
    OrderId
);
uuid_id!(
    /// Unique identifier for an order line item.
    LineItemId
);
uuid_id!(
    /// Unique identifier for a checkout session.
    CheckoutSessionId
);
uuid_id!(
    /// Unique identifier for a product variant.
    VariantId
);
uuid_id!(
    /// Unique identifier for a merchant.
    MerchantId
);
uuid_id!(
    /// Unique identifier for a customer.
    CustomerId
);
uuid_id!(
    /// Unique identifier for a bookable service slot.
    SlotId
);
uuid_id!(
    /// Unique identifier for an outbox event.
    OutboxEventId
);
uuid_id!(
    /// Unique identifier for a dead-letter queue entry.
    DlqEntryId
);

/// Human-readable order number, globally unique and externally visible.
///
/// Generated from the storage sequence at order creation; never derived
/// from client-side randomness alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Creates an order number from a string.
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Formats the canonical order number for a sequence value.
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("ORD-{seq:08}"))
    }

    /// Returns the order number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole-dollar portion.
    pub fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents remainder after dollars.
    pub fn cents_part(&self) -> i64 {
        self.0.abs() % 100
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Self(self.0 * i64::from(quantity))
    }

    /// Clamps negative amounts to zero.
    ///
    /// Order totals are clamped so a discount larger than the rest of the
    /// total never produces a negative charge.
    pub fn clamped_non_negative(&self) -> Money {
        Self(self.0.max(0))
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

/// ISO 4217 currency of an amount. All amounts within one checkout session
/// and its resulting order share a single currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "GBP")]
    Gbp,
}

impl Currency {
    /// Returns the ISO 4217 code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Currency {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(InvalidEnumValue::new("currency", other)),
        }
    }
}

/// The kind of a purchased item. Fixed at creation; the set of legal
/// line-item statuses and transitions depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Warehouse-fulfilled goods that ship to an address.
    Physical,
    /// Downloadable goods delivered by access grant.
    Digital,
    /// Booked services delivered at a scheduled time.
    Service,
}

impl ItemKind {
    /// All item kinds.
    pub const ALL: [ItemKind; 3] = [ItemKind::Physical, ItemKind::Digital, ItemKind::Service];

    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Physical => "physical",
            ItemKind::Digital => "digital",
            ItemKind::Service => "service",
        }
    }

    /// Returns true for kinds whose reservation is backed by the stock
    /// ledger (services reserve slot capacity instead).
    pub fn uses_stock_ledger(&self) -> bool {
        matches!(self, ItemKind::Physical | ItemKind::Digital)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(ItemKind::Physical),
            "digital" => Ok(ItemKind::Digital),
            "service" => Ok(ItemKind::Service),
            other => Err(InvalidEnumValue::new("item kind", other)),
        }
    }
}

/// Who performed a state-changing action, recorded on every audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// Automated transition driven by the core itself.
    System,
    /// The purchasing customer.
    Customer,
    /// The fulfilling merchant.
    Merchant,
    /// A human operator acting through admin tooling.
    Operator,
}

impl Actor {
    /// Returns the actor name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::System => "system",
            Actor::Customer => "customer",
            Actor::Merchant => "merchant",
            Actor::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Actor {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Actor::System),
            "customer" => Ok(Actor::Customer),
            "merchant" => Ok(Actor::Merchant),
            "operator" => Ok(Actor::Operator),
            other => Err(InvalidEnumValue::new("actor", other)),
        }
    }
}
