//! The totals-engine input contract.
//!
//! Tax/shipping/discount computation is an external collaborator consumed
//! as a pure function; only the contract lives here, plus a flat-rate
//! implementation for wiring and tests.

use common::{ItemKind, Money};
use domain::checkout::{Address, CartLine, Totals};

/// Computes checkout totals from a cart snapshot. Pure, no side effects.
pub trait TotalsEngine: Send + Sync {
    fn compute_totals(
        &self,
        lines: &[CartLine],
        address: Option<&Address>,
        promo_codes: &[String],
    ) -> Totals;
}

/// Flat-rate totals: proportional tax, flat shipping on physical lines, a
/// fixed discount per recognized promo code.
#[derive(Debug, Clone)]
pub struct FlatRateTotalsEngine {
    /// Tax rate in basis points (e.g. 600 = 6%).
    pub tax_rate_bps: i64,
    /// Shipping charged when the cart contains at least one physical line.
    pub flat_shipping: Money,
    /// Discount granted per applied promo code.
    pub discount_per_code: Money,
}

impl Default for FlatRateTotalsEngine {
    fn default() -> Self {
        Self {
            tax_rate_bps: 600,
            flat_shipping: Money::from_cents(500),
            discount_per_code: Money::from_cents(500),
        }
    }
}

impl TotalsEngine for FlatRateTotalsEngine {
    fn compute_totals(
        &self,
        lines: &[CartLine],
        _address: Option<&Address>,
        promo_codes: &[String],
    ) -> Totals {
        let currency = lines
            .first()
            .map(|line| line.currency)
            .unwrap_or_default();
        let subtotal: Money = lines.iter().map(CartLine::line_total).sum();
        let tax = Money::from_cents(subtotal.cents() * self.tax_rate_bps / 10_000);
        let shipping = if lines.iter().any(|l| l.kind == ItemKind::Physical) {
            self.flat_shipping
        } else {
            Money::zero()
        };
        let discount = self.discount_per_code.multiply(promo_codes.len() as u32);
        Totals::from_components(subtotal, tax, shipping, discount, currency)
    }
}
